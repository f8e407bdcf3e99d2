use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{Segment, SegmentKind};

/// Full-width punctuation that travels with Chinese runs:
/// 。？！，、；：“”‘’（）《》
pub const CJK_PUNCTUATION: &str =
    "\u{3002}\u{ff1f}\u{ff01}\u{ff0c}\u{3001}\u{ff1b}\u{ff1a}\u{201c}\u{201d}\u{2018}\u{2019}\u{ff08}\u{ff09}\u{300a}\u{300b}";

static SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?P<latin>[A-Za-z\s]+)|(?P<cjk>[\u4e00-\u9fff{CJK_PUNCTUATION}]+)"
    ))
    .expect("split regex")
});

/// Splits `text` into maximal Latin and CJK runs.
///
/// Characters outside both classes come back as `Other` runs, so the segments always
/// concatenate to the input. Empty segments are never produced.
pub fn tokenize(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last = 0usize;
    for caps in SPLIT_RE.captures_iter(text) {
        let (m, kind) = match (caps.name("latin"), caps.name("cjk")) {
            (Some(m), _) => (m, SegmentKind::Latin),
            (None, Some(m)) => (m, SegmentKind::Cjk),
            (None, None) => continue,
        };
        if m.start() > last {
            out.push(Segment::new(&text[last..m.start()], SegmentKind::Other));
        }
        out.push(Segment::new(m.as_str(), kind));
        last = m.end();
    }
    if last < text.len() {
        out.push(Segment::new(&text[last..], SegmentKind::Other));
    }
    out
}

pub fn join_segments(segments: &[Segment]) -> String {
    let mut out = String::with_capacity(segments.iter().map(|s| s.text.len()).sum());
    for s in segments {
        out.push_str(&s.text);
    }
    out
}
