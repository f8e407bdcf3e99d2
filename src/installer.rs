use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::engine::run_program;
use crate::pipeline::prompts::render_template;
use crate::pipeline::{DownloadSettings, ModelPairSettings, TranslatorConfig};
use crate::readiness::ReadinessHandle;

pub const PACKAGE_EXTENSIONS: [&str; 2] = ["argosmodel", "zip"];
pub const DEFAULT_DOWNLOADER: &str = "argospm";

pub fn default_update_args() -> Vec<String> {
    vec!["update".to_string()]
}

pub fn default_install_args() -> Vec<String> {
    vec![
        "install".to_string(),
        "translate-{{source_lang}}_{{target_lang}}".to_string(),
    ]
}

/// Makes sure the translation models exist before the translator is opened.
pub trait ModelInstaller: Send + Sync {
    fn ensure_ready(&self, progress: &dyn Fn(&str)) -> anyhow::Result<()>;
}

/// Fetches packages through an external package manager (`argospm` by default), with the
/// same environment the engine runs under.
#[derive(Clone, Debug)]
pub struct PackageDownloader {
    pub program: String,
    pub update_args: Vec<String>,
    pub install_args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl PackageDownloader {
    pub fn new(settings: &DownloadSettings, env: Vec<(String, String)>) -> Self {
        Self {
            program: settings.program.clone(),
            update_args: settings.update_args.clone(),
            install_args: settings.install_args.clone(),
            env,
        }
    }

    /// Refreshes the package index. No-op when `update_args` is empty.
    pub fn update_index(&self) -> anyhow::Result<()> {
        if self.update_args.is_empty() {
            return Ok(());
        }
        self.run(&self.update_args).context("update package index")
    }

    pub fn install(&self, pair: &ModelPairSettings) -> anyhow::Result<()> {
        let vars = [
            ("source_lang", pair.src.as_str()),
            ("target_lang", pair.tgt.as_str()),
        ];
        let args: Vec<String> = self
            .install_args
            .iter()
            .map(|a| render_template(a, &vars))
            .collect();
        self.run(&args)
            .with_context(|| format!("download {} -> {}", pair.src, pair.tgt))
    }

    fn run(&self, args: &[String]) -> anyhow::Result<()> {
        let out = run_program(&self.program, args, &self.env, None)?;
        if !out.status.success() {
            let (stderr, _, _) = encoding_rs::UTF_8.decode(&out.stderr);
            return Err(anyhow!(
                "{} {} failed ({}): {}",
                self.program,
                args.join(" "),
                out.status,
                stderr.trim()
            ));
        }
        Ok(())
    }
}

/// Checks installed models and installs missing ones, from local package archives first and
/// through the downloader otherwise.
#[derive(Clone, Debug)]
pub struct PackageInstaller {
    pub pairs: Vec<ModelPairSettings>,
    pub model_dir: PathBuf,
    pub package_dir: PathBuf,
    pub downloader: Option<PackageDownloader>,
}

impl PackageInstaller {
    pub fn from_config(cfg: &TranslatorConfig) -> Self {
        Self {
            pairs: cfg.pairs.clone(),
            model_dir: cfg.model_dir.clone(),
            package_dir: cfg.package_dir.clone(),
            downloader: cfg
                .download
                .as_ref()
                .map(|d| PackageDownloader::new(d, cfg.command_env.clone())),
        }
    }

    /// The configured path exists, or the model store holds a `translate-<src>_<tgt>*` entry
    /// (the layout a package manager such as `argospm` installs into).
    pub fn is_installed(&self, pair: &ModelPairSettings) -> bool {
        if pair.path.exists() {
            return true;
        }
        let prefix = format!("translate-{}", pair.key());
        let Ok(entries) = std::fs::read_dir(&self.model_dir) else {
            return false;
        };
        entries.flatten().any(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.to_ascii_lowercase().starts_with(&prefix))
                .unwrap_or(false)
        })
    }

    pub fn missing_pairs(&self) -> Vec<&ModelPairSettings> {
        self.pairs.iter().filter(|p| !self.is_installed(p)).collect()
    }

    /// First package (by file name) named `translate-<src>_<tgt>*` with a known extension.
    pub fn find_package(&self, pair: &ModelPairSettings) -> anyhow::Result<Option<PathBuf>> {
        if !self.package_dir.is_dir() {
            return Ok(None);
        }
        let prefix = format!("translate-{}", pair.key());
        let mut found: Vec<PathBuf> = Vec::new();
        let entries = std::fs::read_dir(&self.package_dir)
            .with_context(|| format!("read package dir: {}", self.package_dir.display()))?;
        for ent in entries {
            let path = ent.context("package dir entry")?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| {
                    PACKAGE_EXTENSIONS
                        .iter()
                        .any(|k| e.eq_ignore_ascii_case(k))
                })
                .unwrap_or(false);
            if ext_ok && name.to_ascii_lowercase().starts_with(&prefix) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found.into_iter().next())
    }

    pub fn install_pair(&self, pair: &ModelPairSettings, package: &Path) -> anyhow::Result<()> {
        if let Some(expected) = pair.sha256.as_deref() {
            let actual = sha256_file(package)?;
            if actual != expected {
                return Err(anyhow!(
                    "checksum mismatch for {}: expected {expected}, got {actual}",
                    package.display()
                ));
            }
        }

        std::fs::create_dir_all(&self.model_dir)
            .with_context(|| format!("create model dir: {}", self.model_dir.display()))?;
        let staging = self.model_dir.join(format!(".staging-{}", pair.key()));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)
                .with_context(|| format!("clear staging: {}", staging.display()))?;
        }
        let res =
            extract_archive(package, &staging).and_then(|()| place_staged(&staging, &pair.path));
        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        res.with_context(|| format!("install {} -> {}", package.display(), pair.path.display()))
    }
}

impl ModelInstaller for PackageInstaller {
    fn ensure_ready(&self, progress: &dyn Fn(&str)) -> anyhow::Result<()> {
        progress("正在检查离线模型...");
        let missing = self.missing_pairs();
        if missing.is_empty() {
            progress("模型已就绪");
            return Ok(());
        }

        progress("首次运行，正在安装模型...");
        let mut index_updated = false;
        for pair in missing {
            if let Some(package) = self.find_package(pair)? {
                progress(&format!("安装：{} → {} ...", pair.src, pair.tgt));
                self.install_pair(pair, &package)?;
                continue;
            }
            let Some(downloader) = self.downloader.as_ref() else {
                return Err(anyhow!(
                    "no package for {} -> {} in {} (expected translate-{}*.argosmodel)",
                    pair.src,
                    pair.tgt,
                    self.package_dir.display(),
                    pair.key()
                ));
            };
            if !index_updated {
                progress("正在更新模型索引(可能需几分钟)...");
                downloader.update_index()?;
                index_updated = true;
            }
            progress(&format!("下载安装：{} → {} ...", pair.src, pair.tgt));
            downloader.install(pair)?;
            if !self.is_installed(pair) {
                return Err(anyhow!(
                    "{} finished but no {} -> {} model appeared in {}",
                    downloader.program,
                    pair.src,
                    pair.tgt,
                    self.model_dir.display()
                ));
            }
        }
        progress("模型安装完成！");
        Ok(())
    }
}

/// For engines that manage their own models.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInstaller;

impl ModelInstaller for NoopInstaller {
    fn ensure_ready(&self, progress: &dyn Fn(&str)) -> anyhow::Result<()> {
        progress("模型已就绪");
        Ok(())
    }
}

/// Runs `installer` on a background thread and drives `handle` through
/// `Loading` to `Ready` or `Failed`.
pub fn spawn_install(
    installer: Arc<dyn ModelInstaller>,
    handle: ReadinessHandle,
    callback: impl Fn(&str) + Send + 'static,
) -> anyhow::Result<JoinHandle<()>> {
    handle.begin_loading();
    std::thread::Builder::new()
        .name("model-install".to_string())
        .spawn(move || match installer.ensure_ready(&callback) {
            Ok(()) => handle.mark_ready(),
            Err(err) => {
                let reason = format!("{err:#}");
                callback(&format!("模型加载失败: {reason}"));
                handle.mark_failed(reason);
            }
        })
        .context("spawn model install thread")
}

pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path).with_context(|| format!("open: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher).with_context(|| format!("hash: {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

fn extract_archive(package: &Path, dest: &Path) -> anyhow::Result<()> {
    let f = File::open(package).with_context(|| format!("open package: {}", package.display()))?;
    let mut zip = ZipArchive::new(f).context("read zip")?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("create staging: {}", dest.display()))?;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).context("zip entry")?;
        let rel = file
            .enclosed_name()
            .ok_or_else(|| anyhow!("unsafe path in package: {}", file.name()))?;
        let out = dest.join(rel);
        if file.is_dir() {
            std::fs::create_dir_all(&out)
                .with_context(|| format!("create dir: {}", out.display()))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let mut w = File::create(&out).with_context(|| format!("create: {}", out.display()))?;
        io::copy(&mut file, &mut w).with_context(|| format!("extract: {}", out.display()))?;
    }
    Ok(())
}

/// Moves the extracted content to `target`: a lone top-level entry is moved itself,
/// otherwise the whole staging directory becomes `target`.
fn place_staged(staging: &Path, target: &Path) -> anyhow::Result<()> {
    let mut top: Vec<PathBuf> = std::fs::read_dir(staging)
        .with_context(|| format!("read staging: {}", staging.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .context("staging entry")?;
    if top.is_empty() {
        return Err(anyhow!("package is empty"));
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let source = if top.len() == 1 {
        top.remove(0)
    } else {
        staging.to_path_buf()
    };
    std::fs::rename(&source, target)
        .with_context(|| format!("move {} -> {}", source.display(), target.display()))?;
    Ok(())
}
