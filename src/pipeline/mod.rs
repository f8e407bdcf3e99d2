mod config;
pub mod prompts;
pub mod recovery;
pub mod trace;
mod translator;

pub use config::{
    init_default_config, pair_key, ConfigOverrides, DownloadSettings, EngineKind, LlamaSettings,
    ModelPairSettings, TranslatorConfig, DEFAULT_NOT_READY_MESSAGE,
};
pub use recovery::{RecoveryFailure, Strategy, StrategyError};
pub use trace::TraceWriter;
pub use translator::{
    resolve_languages, MixedLanguageTranslator, Outcome, SegmentedOutput, Translation,
};

use crate::engine::engine_from_config;
use crate::progress::ConsoleProgress;
use crate::readiness::ReadinessView;

/// Wires a translator from resolved configuration.
pub fn build_translator(
    cfg: &TranslatorConfig,
    readiness: ReadinessView,
    progress: ConsoleProgress,
) -> anyhow::Result<MixedLanguageTranslator> {
    let engine = engine_from_config(cfg)?;
    let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_enabled)?;
    progress.info(format!("Engine: {}", engine.name()));
    Ok(MixedLanguageTranslator::new(engine, readiness)
        .with_not_ready_message(cfg.not_ready_message.clone())
        .with_trace(trace)
        .with_log_max_chars(cfg.log_max_chars)
        .with_progress(progress))
}
