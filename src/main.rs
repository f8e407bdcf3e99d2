use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;

use offline_translator::clipboard::{read_clipboard, write_clipboard};
use offline_translator::installer::{spawn_install, ModelInstaller, NoopInstaller, PackageInstaller};
use offline_translator::ir::LanguageMode;
use offline_translator::pipeline::{
    build_translator, init_default_config, ConfigOverrides, MixedLanguageTranslator,
    TranslatorConfig,
};
use offline_translator::progress::ConsoleProgress;
use offline_translator::readiness::{ModelState, ReadinessHandle};

#[derive(Parser, Debug)]
#[command(name = "offline-translator")]
#[command(
    about = "Offline Chinese <-> English translator for mixed-language text",
    long_about = None
)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Text to translate (default: read stdin)
    #[arg(value_name = "TEXT")]
    text: Option<String>,

    /// Read the text from a file
    #[arg(long, value_name = "PATH", conflicts_with_all = ["text", "paste"])]
    file: Option<PathBuf>,

    /// Read the text from the clipboard
    #[arg(long, conflicts_with = "text")]
    paste: bool,

    /// Also copy the translation to the clipboard
    #[arg(long)]
    copy: bool,

    /// Source language: auto, zh, en
    #[arg(long, value_name = "LANG")]
    from: Option<LanguageMode>,

    /// Target language: auto, zh, en
    #[arg(long, value_name = "LANG")]
    to: Option<LanguageMode>,

    /// Translate blank-line separated blocks from stdin as they arrive
    #[arg(short, long)]
    interactive: bool,

    /// No status output on stderr
    #[arg(short, long)]
    quiet: bool,

    /// Config file path (default: search for offline-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine kind: command or llama
    #[arg(long)]
    engine: Option<String>,

    /// Program run by the command engine
    #[arg(long)]
    program: Option<String>,

    /// Directory holding installed models
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Directory searched for model packages (.argosmodel / .zip)
    #[arg(long, value_name = "DIR")]
    package_dir: Option<PathBuf>,

    /// Threads for llama.cpp (default: -1 = auto)
    #[arg(long)]
    threads: Option<i32>,

    /// GPU layers for llama.cpp (default: -1 = auto)
    #[arg(long)]
    gpu_layers: Option<i32>,

    /// Write per-request segment traces
    #[arg(long)]
    trace: bool,

    /// Skip model discovery/installation and treat the engine as ready
    #[arg(long)]
    no_model_check: bool,

    /// Install only from local packages; never run the package downloader
    #[arg(long)]
    no_download: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let overrides = ConfigOverrides {
        engine: args.engine.clone(),
        program: args.program.clone(),
        model_dir: args.model_dir.clone(),
        package_dir: args.package_dir.clone(),
        threads: args.threads,
        gpu_layers: args.gpu_layers,
        trace: args.trace.then_some(true),
        download: args.no_download.then_some(false),
    };
    let cfg = TranslatorConfig::from_path_and_args(args.config.clone(), overrides)
        .context("build config")?;
    progress.info(format!("Config: {}", cfg.config_path.display()));

    let source = args.from.unwrap_or(cfg.default_source);
    let target = args.to.unwrap_or(cfg.default_target);

    let handle = ReadinessHandle::new();
    let translator = build_translator(&cfg, handle.view(), progress.clone())?;

    let installer: Arc<dyn ModelInstaller> = if args.no_model_check {
        Arc::new(NoopInstaller)
    } else {
        Arc::new(PackageInstaller::from_config(&cfg))
    };
    let install = spawn_install(installer, handle.clone(), progress.status_callback())?;

    if args.interactive {
        return run_interactive(&translator, source, target, args.copy);
    }

    let input = read_input(&args)?;
    install
        .join()
        .map_err(|_| anyhow!("model install thread panicked"))?;
    if let ModelState::Failed(reason) = handle.state() {
        return Err(anyhow!("model preparation failed: {reason}"));
    }

    let out = translator.translate(&input, source, target);
    emit(&out, args.copy)
}

fn read_input(args: &Args) -> anyhow::Result<String> {
    if let Some(text) = args.text.as_ref() {
        return Ok(text.clone());
    }
    if let Some(path) = args.file.as_ref() {
        let bytes = std::fs::read(path).with_context(|| format!("read: {}", path.display()))?;
        let (text, _, _) = encoding_rs::UTF_8.decode(&bytes);
        return Ok(text.into_owned());
    }
    if args.paste {
        return read_clipboard();
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("read stdin")?;
    Ok(buf)
}

fn run_interactive(
    translator: &MixedLanguageTranslator,
    source: LanguageMode,
    target: LanguageMode,
    copy: bool,
) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut block = String::new();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        if line.trim().is_empty() {
            flush_block(translator, &mut block, source, target, copy)?;
            continue;
        }
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(&line);
    }
    flush_block(translator, &mut block, source, target, copy)
}

fn flush_block(
    translator: &MixedLanguageTranslator,
    block: &mut String,
    source: LanguageMode,
    target: LanguageMode,
    copy: bool,
) -> anyhow::Result<()> {
    if block.is_empty() {
        return Ok(());
    }
    let out = translator.translate(block, source, target);
    block.clear();
    emit(&out, copy)?;
    println!();
    Ok(())
}

fn emit(out: &str, copy: bool) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{out}").context("write stdout")?;
    stdout.flush().context("flush stdout")?;
    if copy {
        write_clipboard(out)?;
    }
    Ok(())
}
