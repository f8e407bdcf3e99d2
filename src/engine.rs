use std::io::{self, Write};
use std::process::{Command, Output, Stdio};

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;

use crate::ir::LanguageCode;
use crate::pipeline::prompts::render_template;
use crate::pipeline::{EngineKind, TranslatorConfig};

/// Sentence-level machine translation between two fixed languages.
///
/// Implementations are opaque to the pipeline: it calls them and awaits the result, and any
/// error is treated as "this text could not be translated".
pub trait TranslationEngine: Send + Sync {
    fn translate(&self, text: &str, src: LanguageCode, tgt: LanguageCode)
        -> anyhow::Result<String>;

    fn name(&self) -> &str;
}

impl<T: TranslationEngine + ?Sized> TranslationEngine for Box<T> {
    fn translate(
        &self,
        text: &str,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> anyhow::Result<String> {
        (**self).translate(text, src, tgt)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: TranslationEngine + ?Sized> TranslationEngine for std::sync::Arc<T> {
    fn translate(
        &self,
        text: &str,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> anyhow::Result<String> {
        (**self).translate(text, src, tgt)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

pub const DEFAULT_PROGRAM: &str = "argos-translate";

pub fn default_command_args() -> Vec<String> {
    vec![
        "--from-lang".to_string(),
        "{{source_lang}}".to_string(),
        "--to-lang".to_string(),
        "{{target_lang}}".to_string(),
        "{{text}}".to_string(),
    ]
}

/// Argos Translate reads and installs packages under `ARGOS_PACKAGES_DIR`; pointing it at
/// the model directory keeps the engine and the installer on one store.
pub fn default_command_env() -> Vec<(String, String)> {
    vec![(
        "ARGOS_PACKAGES_DIR".to_string(),
        "{{model_dir}}".to_string(),
    )]
}

/// Runs an offline translation CLI once per call.
///
/// Argument templates may reference `{{source_lang}}`, `{{target_lang}}` and `{{text}}`.
/// When no argument mentions `{{text}}`, the text goes to the child's stdin instead.
/// `env` is added to the child's environment (e.g. `ARGOS_PACKAGES_DIR`).
#[derive(Clone, Debug)]
pub struct CommandEngine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    fn text_in_args(&self) -> bool {
        self.args.iter().any(|a| a.contains("{{text}}"))
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, default_command_args())
    }
}

impl TranslationEngine for CommandEngine {
    fn translate(
        &self,
        text: &str,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> anyhow::Result<String> {
        let vars = [
            ("source_lang", src.as_str()),
            ("target_lang", tgt.as_str()),
            ("text", text),
        ];
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| render_template(a, &vars))
            .collect();
        let input = if self.text_in_args() { None } else { Some(text) };

        let out = run_program(&self.program, &args, &self.env, input)?;
        let (stdout, _, _) = UTF_8.decode(&out.stdout);
        if !out.status.success() {
            let (stderr, _, _) = UTF_8.decode(&out.stderr);
            return Err(anyhow!(
                "{} {}->{} failed ({}): {}",
                self.program,
                src,
                tgt,
                out.status,
                stderr.trim()
            ));
        }
        Ok(strip_one_newline(&stdout).to_string())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Runs `program` to completion, feeding `input` (if any) to its stdin while stdout and
/// stderr are drained, so a child that streams output as it reads cannot stall on a full pipe.
pub fn run_program(
    program: &str,
    args: &[String],
    env: &[(String, String)],
    input: Option<&str>,
) -> anyhow::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let stdin = child.stdin.take();
    std::thread::scope(|scope| -> anyhow::Result<Output> {
        let writer = match (input, stdin) {
            (Some(text), Some(mut stdin)) => Some(scope.spawn(move || {
                // A child that exits without reading is judged by its status instead.
                match stdin.write_all(text.as_bytes()) {
                    Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err),
                    _ => Ok(()),
                }
            })),
            _ => None,
        };
        let out = child
            .wait_with_output()
            .with_context(|| format!("wait {program}"))?;
        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| anyhow!("stdin writer for {program} panicked"))?
                .with_context(|| format!("write stdin of {program}"))?;
        }
        Ok(out)
    })
}

fn strip_one_newline(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}

/// Builds the engine named by the resolved configuration.
pub fn engine_from_config(cfg: &TranslatorConfig) -> anyhow::Result<Box<dyn TranslationEngine>> {
    match cfg.engine {
        EngineKind::Command => Ok(Box::new(
            CommandEngine::new(cfg.command_program.clone(), cfg.command_args.clone())
                .with_env(cfg.command_env.clone()),
        )),
        #[cfg(feature = "llama")]
        EngineKind::Llama => Ok(Box::new(crate::models::native::LlamaEngine::new(
            cfg.llama.clone(),
        )?)),
        #[cfg(not(feature = "llama"))]
        EngineKind::Llama => Err(anyhow!(
            "engine kind \"llama\" requires building with --features llama"
        )),
    }
}
