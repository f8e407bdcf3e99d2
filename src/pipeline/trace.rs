use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use serde::Serialize;

use crate::ir::{LanguageCode, SegmentKind};

/// How one segment was handled.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentTrace {
    pub index: usize,
    pub kind: SegmentKind,
    pub source_language: bool,
    pub text: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestTrace {
    pub src: LanguageCode,
    pub tgt: LanguageCode,
    pub input: String,
    pub segments: Vec<SegmentTrace>,
    pub output: String,
}

pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
    next_id: AtomicUsize,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self {
            dir,
            enabled,
            next_id: AtomicUsize::new(1),
        })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `req_<n>.json` and `req_<n>.segments.txt`; returns the request number.
    pub fn write_request(&self, trace: &RequestTrace) -> anyhow::Result<Option<usize>> {
        if !self.enabled {
            return Ok(None);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let json = serde_json::to_vec_pretty(trace).context("serialize request trace")?;
        let json_path = self.dir.join(format!("req_{id:06}.json"));
        std::fs::write(&json_path, json)
            .with_context(|| format!("write trace: {}", json_path.display()))?;

        let mut table = String::new();
        table.push_str(&format!("# {} -> {}\n", trace.src, trace.tgt));
        for s in &trace.segments {
            let mark = match (&s.error, s.source_language) {
                (Some(_), _) => "FAIL",
                (None, true) => "xlat",
                (None, false) => "keep",
            };
            table.push_str(&format!(
                "{:04} {:5} {} {:?} => {:?}\n",
                s.index,
                format!("{:?}", s.kind).to_lowercase(),
                mark,
                s.text,
                s.output
            ));
        }
        let txt_path = self.dir.join(format!("req_{id:06}.segments.txt"));
        std::fs::write(&txt_path, table)
            .with_context(|| format!("write trace: {}", txt_path.display()))?;
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RequestTrace {
        RequestTrace {
            src: LanguageCode::En,
            tgt: LanguageCode::Zh,
            input: "hi 你".to_string(),
            segments: vec![
                SegmentTrace {
                    index: 0,
                    kind: SegmentKind::Latin,
                    source_language: true,
                    text: "hi ".to_string(),
                    output: "嗨".to_string(),
                    error: None,
                },
                SegmentTrace {
                    index: 1,
                    kind: SegmentKind::Cjk,
                    source_language: false,
                    text: "你".to_string(),
                    output: "你".to_string(),
                    error: None,
                },
            ],
            output: "嗨你".to_string(),
        }
    }

    #[test]
    fn disabled_writer_touches_nothing() {
        let w = TraceWriter::disabled();
        assert_eq!(w.write_request(&sample()).unwrap(), None);
    }

    #[test]
    fn writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let w = TraceWriter::new(dir.path().join("trace"), true).unwrap();
        assert_eq!(w.write_request(&sample()).unwrap(), Some(1));
        assert_eq!(w.write_request(&sample()).unwrap(), Some(2));

        let json = std::fs::read_to_string(w.dir().join("req_000001.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["src"], "en");
        assert_eq!(v["segments"][1]["kind"], "cjk");
        assert!(v["segments"][0].get("error").is_none());

        let table = std::fs::read_to_string(w.dir().join("req_000002.segments.txt")).unwrap();
        assert!(table.starts_with("# en -> zh\n"));
        assert!(table.contains("xlat \"hi \""));
        assert!(table.contains("keep \"你\""));
    }
}
