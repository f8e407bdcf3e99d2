use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "offline-translator.toml";
pub const CONFIG_ENV: &str = "OFFLINE_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub translator: TranslatorSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub trace: TraceSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslatorSection {
    /// Default source mode: "auto", "zh" or "en".
    #[serde(default)]
    pub source: Option<String>,
    /// Default target mode: "auto", "zh" or "en".
    #[serde(default)]
    pub target: Option<String>,
    /// Returned by `translate` while models are still being prepared.
    #[serde(default)]
    pub not_ready_message: Option<String>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineSection {
    /// "command" (external offline CLI) or "llama" (local GGUF model).
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub command: CommandSection,
    #[serde(default)]
    pub llama: LlamaSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CommandSection {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Extra environment for the engine and the package downloader. Values may use
    /// `{{model_dir}}` and `{{package_dir}}`.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LlamaSection {
    #[serde(default)]
    pub template_hint: Option<String>,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Prompt template file; built-in prompt when unset.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    /// Where installed models live. Relative to the config file directory.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    /// Where installable packages (`.argosmodel` / `.zip`) are looked up.
    #[serde(default)]
    pub package_dir: Option<PathBuf>,
    /// Per-direction overrides keyed as `zh_en` / `en_zh`.
    #[serde(default)]
    pub pairs: HashMap<String, ModelPair>,
    #[serde(default)]
    pub download: DownloadSection,
}

/// Package manager used when no local package is found for a missing pair.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct DownloadSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub program: Option<String>,
    /// Run once before the first download (refreshes the package index).
    #[serde(default)]
    pub update_args: Option<Vec<String>>,
    /// Run per missing pair; may use `{{source_lang}}` and `{{target_lang}}`.
    #[serde(default)]
    pub install_args: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelPair {
    /// Installed model file or directory, relative to `model_dir`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Expected SHA-256 (hex) of the package archive.
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TraceSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub dir: Option<String>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 4) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Resolves `p` against `base` unless it is already absolute.
pub fn resolve_relative(base: &Path, p: &Path) -> PathBuf {
    if p.is_relative() {
        base.join(p)
    } else {
        p.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
[translator]
source = "auto"
target = "en"
not_ready_message = "loading"

[engine]
kind = "command"

[engine.command]
program = "argos-translate"
args = ["--from-lang", "{{source_lang}}"]

[engine.command.env]
ARGOS_PACKAGES_DIR = "{{model_dir}}"

[models]
model_dir = "models"
package_dir = "packages"

[models.download]
enabled = false
program = "argospm"
install_args = ["install", "translate-{{source_lang}}_{{target_lang}}"]

[models.pairs.zh_en]
path = "translate-zh_en"
sha256 = "abcd"

[trace]
enabled = true
dir = "_trace"
"#,
        )
        .unwrap();
        assert_eq!(cfg.translator.target.as_deref(), Some("en"));
        assert_eq!(cfg.engine.kind.as_deref(), Some("command"));
        assert_eq!(cfg.engine.command.args.as_ref().unwrap().len(), 2);
        assert_eq!(cfg.models.pairs["zh_en"].sha256.as_deref(), Some("abcd"));
        assert_eq!(
            cfg.engine.command.env.as_ref().unwrap()["ARGOS_PACKAGES_DIR"],
            "{{model_dir}}"
        );
        assert_eq!(cfg.models.download.enabled, Some(false));
        assert!(cfg.models.download.update_args.is_none());
        assert_eq!(cfg.trace.enabled, Some(true));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert!(cfg.translator.source.is_none());
        assert!(cfg.models.pairs.is_empty());
    }

    #[test]
    fn finds_file_in_parent_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        let found = find_file_upwards(&nested, DEFAULT_CONFIG_FILE, 8).unwrap();
        assert_eq!(found, root.path().join(DEFAULT_CONFIG_FILE));
        assert!(find_file_upwards(&nested, DEFAULT_CONFIG_FILE, 1).is_none());
    }

    #[test]
    fn relative_paths_join_base() {
        let base = Path::new("/etc/app");
        assert_eq!(
            resolve_relative(base, Path::new("models")),
            PathBuf::from("/etc/app/models")
        );
        assert_eq!(
            resolve_relative(base, Path::new("/opt/models")),
            PathBuf::from("/opt/models")
        );
    }
}
