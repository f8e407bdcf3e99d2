use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::Serialize;

/// One of the two languages the translator works between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    Zh,
    En,
}

impl LanguageCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
        }
    }

    /// The other language of the pair. Only meaningful while the domain stays bilingual.
    pub fn complement(self) -> Self {
        match self {
            Self::Zh => Self::En,
            Self::En => Self::Zh,
        }
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // zh-CN, zh_Hans, en-US ... collapse to the base code.
        let base = s
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match base.as_str() {
            "zh" | "cn" | "chinese" | "中文" => Ok(Self::Zh),
            "en" | "english" => Ok(Self::En),
            _ => Err(anyhow!("unsupported language code: {s:?} (expected zh or en)")),
        }
    }
}

/// A language selection as made by a caller: either fixed or resolved per request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LanguageMode {
    #[default]
    Auto,
    Fixed(LanguageCode),
}

impl LanguageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Fixed(code) => code.as_str(),
        }
    }
}

impl From<LanguageCode> for LanguageMode {
    fn from(code: LanguageCode) -> Self {
        Self::Fixed(code)
    }
}

impl fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.is_empty()
            || t.eq_ignore_ascii_case("auto")
            || t == "自动检测"
            || t == "自动匹配"
        {
            return Ok(Self::Auto);
        }
        t.parse::<LanguageCode>().map(Self::Fixed)
    }
}

/// Which tokenizer alternative produced a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// ASCII letters and whitespace.
    Latin,
    /// CJK ideographs and full-width CJK punctuation.
    Cjk,
    /// Anything between the two: digits, ASCII punctuation, symbols.
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn new(text: impl Into<String>, kind: SegmentKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub source: LanguageMode,
    pub target: LanguageMode,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source: LanguageMode, target: LanguageMode) -> Self {
        Self {
            text: text.into(),
            source,
            target,
        }
    }
}
