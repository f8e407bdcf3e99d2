pub mod clipboard;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod installer;
pub mod ir;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod readiness;
pub mod segmenter;
pub mod textutil;

pub use engine::{CommandEngine, TranslationEngine};
pub use ir::{LanguageCode, LanguageMode, Segment, SegmentKind, TranslationRequest};
pub use pipeline::{MixedLanguageTranslator, Outcome};
pub use readiness::{ModelState, ReadinessHandle, ReadinessView};
pub use segmenter::tokenize;
