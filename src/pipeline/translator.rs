use anyhow::anyhow;

use crate::engine::TranslationEngine;
use crate::ir::{LanguageCode, LanguageMode, Segment, TranslationRequest};
use crate::pipeline::config::DEFAULT_NOT_READY_MESSAGE;
use crate::pipeline::recovery::{run_chain, RecoveryFailure, Strategy, DEFAULT_CHAIN};
use crate::pipeline::trace::{RequestTrace, SegmentTrace, TraceWriter};
use crate::progress::ConsoleProgress;
use crate::readiness::{ReadinessHandle, ReadinessView};
use crate::segmenter::tokenize;
use crate::textutil::{detect_language, is_chunk_language, preview};

/// Turns `auto` modes into a concrete pair. Never fails: an unresolved target is the
/// complement of the source.
pub fn resolve_languages(
    source: LanguageMode,
    target: LanguageMode,
    text: &str,
) -> (LanguageCode, LanguageCode) {
    let src = match source {
        LanguageMode::Auto => detect_language(text),
        LanguageMode::Fixed(code) => code,
    };
    let tgt = match target {
        LanguageMode::Auto => src.complement(),
        LanguageMode::Fixed(code) => code,
    };
    (src, tgt)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub src: LanguageCode,
    pub tgt: LanguageCode,
    pub strategy: Strategy,
    /// Source-language segments the engine failed on and that were kept verbatim.
    pub preserved_failures: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Blank input, or source and target resolved to the same language.
    Unchanged(String),
    /// Models are not ready; carries the status message.
    NotReady(String),
    Translated(Translation),
}

impl Outcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Unchanged(t) | Self::NotReady(t) => t,
            Self::Translated(t) => &t.text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Unchanged(t) | Self::NotReady(t) => t,
            Self::Translated(t) => t.text,
        }
    }
}

/// Result of translating run by run.
#[derive(Clone, Debug)]
pub struct SegmentedOutput {
    pub text: String,
    pub preserved_failures: usize,
    pub segments: Vec<SegmentTrace>,
}

/// Translates the source-language runs of mixed Chinese/English text and leaves the
/// rest untouched.
pub struct MixedLanguageTranslator<E = Box<dyn TranslationEngine>> {
    engine: E,
    readiness: ReadinessView,
    not_ready_message: String,
    chain: Vec<Strategy>,
    trace: TraceWriter,
    progress: ConsoleProgress,
    log_max_chars: usize,
}

impl<E: TranslationEngine> MixedLanguageTranslator<E> {
    pub fn new(engine: E, readiness: ReadinessView) -> Self {
        Self {
            engine,
            readiness,
            not_ready_message: DEFAULT_NOT_READY_MESSAGE.to_string(),
            chain: DEFAULT_CHAIN.to_vec(),
            trace: TraceWriter::disabled(),
            progress: ConsoleProgress::quiet(),
            log_max_chars: 80,
        }
    }

    /// A translator whose engine needs no model preparation.
    pub fn always_ready(engine: E) -> Self {
        Self::new(engine, ReadinessHandle::ready().view())
    }

    pub fn with_not_ready_message(mut self, msg: impl Into<String>) -> Self {
        self.not_ready_message = msg.into();
        self
    }

    pub fn with_chain(mut self, chain: Vec<Strategy>) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_progress(mut self, progress: ConsoleProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_log_max_chars(mut self, n: usize) -> Self {
        self.log_max_chars = n;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn readiness(&self) -> &ReadinessView {
        &self.readiness
    }

    pub fn resolve_languages(
        &self,
        source: LanguageMode,
        target: LanguageMode,
        text: &str,
    ) -> (LanguageCode, LanguageCode) {
        resolve_languages(source, target, text)
    }

    /// Never fails: every error path comes back as text.
    pub fn translate(&self, text: &str, source: LanguageMode, target: LanguageMode) -> String {
        match self.translate_detailed(text, source, target) {
            Ok(outcome) => outcome.into_text(),
            Err(failure) => failure.to_string(),
        }
    }

    pub fn translate_request(&self, req: &TranslationRequest) -> String {
        self.translate(&req.text, req.source, req.target)
    }

    /// Same as [`translate`](Self::translate) but keeps the structure of what happened.
    pub fn translate_detailed(
        &self,
        text: &str,
        source: LanguageMode,
        target: LanguageMode,
    ) -> Result<Outcome, RecoveryFailure> {
        if text.trim().is_empty() {
            return Ok(Outcome::Unchanged(text.to_string()));
        }
        if !self.is_ready() {
            return Ok(Outcome::NotReady(self.not_ready_message.clone()));
        }

        let (src, tgt) = resolve_languages(source, target, text);
        if src == tgt {
            return Ok(Outcome::Unchanged(text.to_string()));
        }
        self.progress.info(format!(
            "Translate {src} -> {tgt}: {}",
            preview(text, self.log_max_chars)
        ));

        let res = run_chain(&self.chain, |strategy| match strategy {
            Strategy::Segmented => self
                .run_segmented(text, src, tgt)
                .map(|out| (out.text, out.preserved_failures)),
            Strategy::Direct => self.engine.translate(text, src, tgt).map(|t| (t, 0)),
        });
        match res {
            Ok((strategy, (out, preserved_failures))) => {
                if strategy != Strategy::Segmented {
                    self.progress
                        .warn(format!("Recovered with {strategy} translation"));
                }
                Ok(Outcome::Translated(Translation {
                    text: out,
                    src,
                    tgt,
                    strategy,
                    preserved_failures,
                }))
            }
            Err(failure) => {
                self.progress.warn(failure.to_string());
                Err(failure)
            }
        }
    }

    pub fn segment_and_translate(
        &self,
        text: &str,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> anyhow::Result<String> {
        self.run_segmented(text, src, tgt).map(|out| out.text)
    }

    /// Tokenize, translate source-language runs, keep the rest, join, trim the end.
    pub fn run_segmented(
        &self,
        text: &str,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> anyhow::Result<SegmentedOutput> {
        if src == tgt {
            return Err(anyhow!("source and target are both {src}"));
        }
        let segments = tokenize(text);

        let mut joined = String::with_capacity(text.len());
        let mut traces = Vec::with_capacity(segments.len());
        let mut preserved_failures = 0usize;
        for (index, seg) in segments.iter().enumerate() {
            let st = self.translate_segment(index, seg, src, tgt);
            if st.error.is_some() {
                preserved_failures += 1;
            }
            joined.push_str(&st.output);
            traces.push(st);
        }
        let out = joined.trim_end().to_string();

        if self.trace.enabled() {
            let req = RequestTrace {
                src,
                tgt,
                input: text.to_string(),
                segments: traces.clone(),
                output: out.clone(),
            };
            if let Err(err) = self.trace.write_request(&req) {
                self.progress.warn(format!("trace: {err:#}"));
            }
        }

        Ok(SegmentedOutput {
            text: out,
            preserved_failures,
            segments: traces,
        })
    }

    fn translate_segment(
        &self,
        index: usize,
        seg: &Segment,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> SegmentTrace {
        let source_language = is_chunk_language(&seg.text, src);
        let mut st = SegmentTrace {
            index,
            kind: seg.kind,
            source_language,
            text: seg.text.clone(),
            output: seg.text.clone(),
            error: None,
        };
        if !source_language {
            return st;
        }
        match self.engine.translate(&seg.text, src, tgt) {
            Ok(t) => st.output = t,
            Err(err) => {
                self.progress.warn(format!(
                    "segment {index} kept untranslated ({}): {err:#}",
                    preview(&seg.text, self.log_max_chars)
                ));
                st.error = Some(format!("{err:#}"));
            }
        }
        st
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const EN: LanguageMode = LanguageMode::Fixed(LanguageCode::En);
    const ZH: LanguageMode = LanguageMode::Fixed(LanguageCode::Zh);
    const AUTO: LanguageMode = LanguageMode::Auto;

    /// Uppercases, fails on configured inputs, records every call.
    #[derive(Default)]
    struct StubEngine {
        fail_on: Vec<String>,
        fail_all: bool,
        calls: Mutex<Vec<String>>,
    }

    impl StubEngine {
        fn failing_on(texts: &[&str]) -> Self {
            Self {
                fail_on: texts.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TranslationEngine for StubEngine {
        fn translate(
            &self,
            text: &str,
            _src: LanguageCode,
            _tgt: LanguageCode,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail_all || self.fail_on.iter().any(|f| f == text) {
                return Err(anyhow!("engine rejected {text:?}"));
            }
            Ok(text.to_uppercase())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    /// Tags text with the direction, so tests can see which pair was used.
    struct TagEngine;

    impl TranslationEngine for TagEngine {
        fn translate(
            &self,
            text: &str,
            src: LanguageCode,
            tgt: LanguageCode,
        ) -> anyhow::Result<String> {
            Ok(format!("<{src}>{tgt}:{text}"))
        }

        fn name(&self) -> &str {
            "tag"
        }
    }

    #[test]
    fn resolves_auto_pairs() {
        assert_eq!(
            resolve_languages(AUTO, AUTO, "你好 hello"),
            (LanguageCode::Zh, LanguageCode::En)
        );
        assert_eq!(
            resolve_languages(AUTO, AUTO, "hello there"),
            (LanguageCode::En, LanguageCode::Zh)
        );
        assert_eq!(
            resolve_languages(EN, AUTO, "你好"),
            (LanguageCode::En, LanguageCode::Zh)
        );
        assert_eq!(
            resolve_languages(AUTO, ZH, "你好"),
            (LanguageCode::Zh, LanguageCode::Zh)
        );
    }

    #[test]
    fn mixed_sentence_translates_only_english_runs() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::default());
        let out = t.translate("I love 苹果 very much", EN, ZH);
        assert_eq!(out, "I LOVE 苹果 VERY MUCH");
        assert_eq!(t.engine().calls(), vec!["I love ", " very much"]);
    }

    #[test]
    fn chinese_source_leaves_english_runs() {
        let t = MixedLanguageTranslator::always_ready(TagEngine);
        let out = t.translate("我爱 Rust 语言", AUTO, AUTO);
        assert_eq!(out, "<zh>en:我爱 Rust <zh>en:语言");
    }

    #[test]
    fn blank_input_is_returned_verbatim() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::default());
        assert_eq!(t.translate("", AUTO, AUTO), "");
        assert_eq!(t.translate("   \n", EN, ZH), "   \n");
        assert!(t.engine().calls().is_empty());
    }

    #[test]
    fn blank_input_wins_over_not_ready() {
        let handle = ReadinessHandle::new();
        let t = MixedLanguageTranslator::new(StubEngine::default(), handle.view());
        assert_eq!(t.translate(" ", AUTO, AUTO), " ");
    }

    #[test]
    fn same_language_is_a_no_op() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::default());
        let text = "你好 world\n";
        assert_eq!(t.translate(text, ZH, ZH), text);
        assert_eq!(t.translate("hello", AUTO, EN), "hello");
        assert!(t.engine().calls().is_empty());
    }

    #[test]
    fn not_ready_returns_status_message() {
        let handle = ReadinessHandle::new();
        let t = MixedLanguageTranslator::new(StubEngine::default(), handle.view())
            .with_not_ready_message("still loading");
        assert_eq!(t.translate("hello", AUTO, AUTO), "still loading");
        assert!(!t.is_ready());

        handle.begin_loading();
        assert_eq!(
            t.translate_detailed("hello", AUTO, AUTO).unwrap(),
            Outcome::NotReady("still loading".to_string())
        );

        handle.mark_ready();
        assert_eq!(t.translate("hello", AUTO, AUTO), "HELLO");
        assert_eq!(t.engine().calls(), vec!["hello"]);
    }

    #[test]
    fn failed_models_keep_the_gate_closed() {
        let handle = ReadinessHandle::new();
        let t = MixedLanguageTranslator::new(StubEngine::default(), handle.view());
        handle.mark_failed("no packages");
        assert_eq!(t.translate("hello", EN, ZH), DEFAULT_NOT_READY_MESSAGE);
    }

    #[test]
    fn failing_segment_is_preserved() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::failing_on(&[" very much"]));
        let outcome = t
            .translate_detailed("I love 苹果 very much", EN, ZH)
            .unwrap();
        match outcome {
            Outcome::Translated(tr) => {
                assert_eq!(tr.text, "I LOVE 苹果 very much");
                assert_eq!(tr.strategy, Strategy::Segmented);
                assert_eq!(tr.preserved_failures, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn only_trailing_whitespace_is_trimmed() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::default());
        let with_tail = t
            .segment_and_translate("  Hello 你好\n\n", LanguageCode::En, LanguageCode::Zh)
            .unwrap();
        let without_tail = t
            .segment_and_translate("  Hello 你好", LanguageCode::En, LanguageCode::Zh)
            .unwrap();
        assert_eq!(with_tail, "  HELLO 你好");
        assert_eq!(with_tail, without_tail);
    }

    #[test]
    fn internal_newlines_survive() {
        let t = MixedLanguageTranslator::always_ready(TagEngine);
        let out = t.translate("第一行\n\n第二行\n", ZH, EN);
        assert_eq!(out, "<zh>en:第一行\n\n<zh>en:第二行");
    }

    #[test]
    fn digits_and_ascii_punctuation_are_kept() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::default());
        let out = t.translate("Version 2.0 发布了!", EN, ZH);
        assert_eq!(out, "VERSION 2.0 发布了!");
    }

    #[test]
    fn segment_panic_falls_back_to_direct_translation() {
        struct PanicOnRun;
        impl TranslationEngine for PanicOnRun {
            fn translate(
                &self,
                text: &str,
                _src: LanguageCode,
                _tgt: LanguageCode,
            ) -> anyhow::Result<String> {
                if text == "hello " {
                    panic!("engine crashed");
                }
                Ok(format!("[{text}]"))
            }
            fn name(&self) -> &str {
                "panic"
            }
        }
        let t = MixedLanguageTranslator::always_ready(PanicOnRun);
        let outcome = t.translate_detailed("hello 世界", EN, ZH).unwrap();
        match outcome {
            Outcome::Translated(tr) => {
                assert_eq!(tr.strategy, Strategy::Direct);
                assert_eq!(tr.text, "[hello 世界]");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn both_failures_are_reported_together() {
        struct PanicThenFail;
        impl TranslationEngine for PanicThenFail {
            fn translate(
                &self,
                text: &str,
                _src: LanguageCode,
                _tgt: LanguageCode,
            ) -> anyhow::Result<String> {
                if text == "hello " {
                    panic!("segment crash");
                }
                Err(anyhow!("engine offline"))
            }
            fn name(&self) -> &str {
                "broken"
            }
        }
        let t = MixedLanguageTranslator::always_ready(PanicThenFail);
        let failure = t.translate_detailed("hello 世界", EN, ZH).unwrap_err();
        assert_eq!(failure.attempts.len(), 2);
        assert!(failure
            .error_for(Strategy::Segmented)
            .unwrap()
            .to_string()
            .contains("segment crash"));

        let text = t.translate("hello 世界", EN, ZH);
        assert!(text.starts_with("翻译出错: "));
        assert!(text.contains("segment crash"));
        assert!(text.contains(" 或 engine offline"));
    }

    #[test]
    fn every_segment_failing_still_returns_input() {
        let engine = StubEngine {
            fail_all: true,
            ..Default::default()
        };
        let t = MixedLanguageTranslator::always_ready(engine);
        assert_eq!(t.translate("one 二 three\n", EN, ZH), "one 二 three");
    }

    #[test]
    fn direct_only_chain_skips_segmentation() {
        let t = MixedLanguageTranslator::always_ready(TagEngine).with_chain(vec![Strategy::Direct]);
        assert_eq!(t.translate("hi 你", EN, ZH), "<en>zh:hi 你");
    }

    #[test]
    fn segmented_output_records_each_decision() {
        let t = MixedLanguageTranslator::always_ready(StubEngine::default());
        let out = t
            .run_segmented("ok, 好的 1", LanguageCode::En, LanguageCode::Zh)
            .unwrap();
        let decisions: Vec<(&str, bool)> = out
            .segments
            .iter()
            .map(|s| (s.text.as_str(), s.source_language))
            .collect();
        assert_eq!(
            decisions,
            vec![
                ("ok", true),
                (",", false),
                (" ", false),
                ("好的", false),
                (" ", false),
                ("1", false),
            ]
        );
        assert_eq!(out.text, "OK, 好的 1");
    }

    #[test]
    fn trace_files_are_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let trace = TraceWriter::new(dir.path().to_path_buf(), true).unwrap();
        let t = MixedLanguageTranslator::always_ready(StubEngine::default()).with_trace(trace);
        t.translate("hi 你", EN, ZH);
        assert!(dir.path().join("req_000001.json").exists());
        assert!(dir.path().join("req_000001.segments.txt").exists());
    }
}
