use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{
    find_default_config, load_config, resolve_relative, AppConfig, CONFIG_ENV,
    DEFAULT_CONFIG_FILE,
};
use crate::engine::{default_command_args, default_command_env, DEFAULT_PROGRAM};
use crate::installer::{default_install_args, default_update_args, DEFAULT_DOWNLOADER};
use crate::ir::{LanguageCode, LanguageMode};
use crate::pipeline::prompts::{render_template, DEFAULT_TRANSLATE_PROMPT};

pub const DEFAULT_NOT_READY_MESSAGE: &str = "模型尚未加载完毕，请稍候...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    Command,
    Llama,
}

impl EngineKind {
    pub fn parse(s: Option<&str>) -> anyhow::Result<Self> {
        match s.unwrap_or("command").trim().to_ascii_lowercase().as_str() {
            "command" | "cli" | "argos" => Ok(Self::Command),
            "llama" | "gguf" => Ok(Self::Llama),
            other => Err(anyhow!("unknown engine kind: {other}")),
        }
    }
}

/// One translation direction and where its installed model lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelPairSettings {
    pub src: LanguageCode,
    pub tgt: LanguageCode,
    pub path: PathBuf,
    pub sha256: Option<String>,
}

impl ModelPairSettings {
    pub fn key(&self) -> String {
        pair_key(self.src, self.tgt)
    }
}

pub fn pair_key(src: LanguageCode, tgt: LanguageCode) -> String {
    format!("{src}_{tgt}")
}

#[derive(Clone, Debug)]
pub struct LlamaSettings {
    pub pairs: Vec<ModelPairSettings>,
    pub template_hint: Option<String>,
    pub ctx_size: u32,
    pub threads: i32,
    pub gpu_layers: i32,
    pub max_tokens: u32,
    pub prompt: String,
}

/// Package manager invocation for pairs with no local package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadSettings {
    pub program: String,
    pub update_args: Vec<String>,
    pub install_args: Vec<String>,
}

/// Command-line values that win over the config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub engine: Option<String>,
    pub program: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub package_dir: Option<PathBuf>,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub trace: Option<bool>,
    pub download: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct TranslatorConfig {
    pub config_path: PathBuf,

    pub default_source: LanguageMode,
    pub default_target: LanguageMode,
    pub not_ready_message: String,
    pub log_max_chars: usize,

    pub engine: EngineKind,
    pub command_program: String,
    pub command_args: Vec<String>,
    /// Shared by the engine and the downloader, so both see the same model store.
    pub command_env: Vec<(String, String)>,
    pub llama: LlamaSettings,

    pub model_dir: PathBuf,
    pub package_dir: PathBuf,
    pub pairs: Vec<ModelPairSettings>,
    pub download: Option<DownloadSettings>,

    pub trace_dir: PathBuf,
    pub trace_enabled: bool,
}

impl TranslatorConfig {
    /// Locates and loads the config file (explicit path, env var, then upward search) and
    /// applies `overrides`. A missing file is not an error: built-in defaults apply.
    pub fn from_path_and_args(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> anyhow::Result<Self> {
        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(DEFAULT_CONFIG_FILE));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        let cfg_path = match cfg_file {
            Some(p) => p,
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_CONFIG_FILE),
        };
        Self::from_app_config(cfg_path, &file_cfg, overrides)
    }

    pub fn from_app_config(
        cfg_path: PathBuf,
        file_cfg: &AppConfig,
        overrides: ConfigOverrides,
    ) -> anyhow::Result<Self> {
        let config_dir = cfg_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let default_source = parse_mode(file_cfg.translator.source.as_deref(), "source")?;
        let default_target = parse_mode(file_cfg.translator.target.as_deref(), "target")?;
        let not_ready_message = file_cfg
            .translator
            .not_ready_message
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NOT_READY_MESSAGE.to_string());
        let log_max_chars = file_cfg.translator.log_max_chars.unwrap_or(80).max(8);

        let engine = EngineKind::parse(
            overrides
                .engine
                .as_deref()
                .or(file_cfg.engine.kind.as_deref()),
        )?;
        let command_program = overrides
            .program
            .or_else(|| file_cfg.engine.command.program.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
        let command_args = file_cfg
            .engine
            .command
            .args
            .clone()
            .unwrap_or_else(default_command_args);

        let model_dir = overrides
            .model_dir
            .or_else(|| file_cfg.models.model_dir.clone())
            .map(|p| resolve_relative(&config_dir, &p))
            .unwrap_or_else(|| config_dir.join("models"));
        let package_dir = overrides
            .package_dir
            .or_else(|| file_cfg.models.package_dir.clone())
            .map(|p| resolve_relative(&config_dir, &p))
            .unwrap_or_else(|| config_dir.join("packages"));

        let dir_vars = [
            ("model_dir", model_dir.to_string_lossy().into_owned()),
            ("package_dir", package_dir.to_string_lossy().into_owned()),
        ];
        let dir_vars: Vec<(&str, &str)> =
            dir_vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let mut command_env: Vec<(String, String)> = file_cfg
            .engine
            .command
            .env
            .clone()
            .map(|m| m.into_iter().collect())
            .unwrap_or_else(default_command_env)
            .into_iter()
            .map(|(k, v)| (k, render_template(&v, &dir_vars)))
            .collect();
        command_env.sort();

        let dl = &file_cfg.models.download;
        let download = overrides
            .download
            .or(dl.enabled)
            .unwrap_or(engine == EngineKind::Command)
            .then(|| DownloadSettings {
                program: dl
                    .program
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_DOWNLOADER)
                    .to_string(),
                update_args: dl.update_args.clone().unwrap_or_else(default_update_args),
                install_args: dl.install_args.clone().unwrap_or_else(default_install_args),
            });

        let pairs: Vec<ModelPairSettings> = [
            (LanguageCode::Zh, LanguageCode::En),
            (LanguageCode::En, LanguageCode::Zh),
        ]
        .into_iter()
        .map(|(src, tgt)| {
            let key = pair_key(src, tgt);
            let entry = file_cfg.models.pairs.get(&key);
            let rel = entry
                .and_then(|e| e.path.clone())
                .unwrap_or_else(|| PathBuf::from(format!("translate-{key}")));
            ModelPairSettings {
                src,
                tgt,
                path: resolve_relative(&model_dir, &rel),
                sha256: entry
                    .and_then(|e| e.sha256.clone())
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty()),
            }
        })
        .collect();

        let llama_cfg = &file_cfg.engine.llama;
        let prompt = match llama_cfg.prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => {
                let path = resolve_relative(&config_dir, Path::new(p));
                std::fs::read_to_string(&path)
                    .with_context(|| format!("read prompt: {}", path.display()))?
            }
            _ => DEFAULT_TRANSLATE_PROMPT.to_string(),
        };
        let llama = LlamaSettings {
            pairs: pairs.clone(),
            template_hint: llama_cfg
                .template_hint
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ctx_size: llama_cfg.ctx_size.unwrap_or(4096),
            threads: overrides.threads.or(llama_cfg.threads).unwrap_or(-1),
            gpu_layers: overrides.gpu_layers.or(llama_cfg.gpu_layers).unwrap_or(-1),
            max_tokens: llama_cfg.max_tokens.unwrap_or(1024).max(16),
            prompt,
        };

        let trace_dir = file_cfg
            .trace
            .dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = resolve_relative(&config_dir, Path::new(&trace_dir));
        let trace_enabled = overrides
            .trace
            .or(file_cfg.trace.enabled)
            .unwrap_or(false);

        Ok(Self {
            config_path: cfg_path,
            default_source,
            default_target,
            not_ready_message,
            log_max_chars,
            engine,
            command_program,
            command_args,
            command_env,
            llama,
            model_dir,
            package_dir,
            pairs,
            download,
            trace_dir,
            trace_enabled,
        })
    }
}

fn parse_mode(s: Option<&str>, field: &str) -> anyhow::Result<LanguageMode> {
    match s {
        None => Ok(LanguageMode::Auto),
        Some(v) => v
            .parse::<LanguageMode>()
            .with_context(|| format!("translator.{field}")),
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    for sub in ["models", "packages"] {
        let p = dir.join(sub);
        std::fs::create_dir_all(&p)
            .with_context(|| format!("create dir: {}", p.display()))?;
    }

    let cfg_path = dir.join(DEFAULT_CONFIG_FILE);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[translator]
# "auto", "zh" or "en"
source = "auto"
target = "auto"
not_ready_message = "模型尚未加载完毕，请稍候..."
log_max_chars = 80

[engine]
# "command": run an offline translation CLI per text run (Argos Translate by default).
# "llama": local GGUF model (build with --features llama).
kind = "command"

[engine.command]
program = "argos-translate"
# {{text}} in an argument passes the text inline; otherwise it is written to stdin.
args = ["--from-lang", "{{source_lang}}", "--to-lang", "{{target_lang}}", "{{text}}"]

# Environment for the engine and the downloader; points Argos at models.model_dir.
[engine.command.env]
ARGOS_PACKAGES_DIR = "{{model_dir}}"

[engine.llama]
# template_hint = "chatml"
ctx_size = 4096
threads = -1
gpu_layers = -1
max_tokens = 1024
# prompt = "prompts/translate.txt"

[models]
model_dir = "models"
# Installable packages: translate-zh_en*.argosmodel / translate-en_zh*.zip
package_dir = "packages"

# [models.pairs.zh_en]
# path = "translate-zh_en"
# sha256 = "<hex digest of the package archive>"

# [models.pairs.en_zh]
# path = "translate-en_zh"

# Used for pairs with no local package (defaults on for the command engine).
[models.download]
enabled = true
program = "argospm"
update_args = ["update"]
install_args = ["install", "translate-{{source_lang}}_{{target_lang}}"]

[trace]
enabled = false
dir = "_trace"
"#;
