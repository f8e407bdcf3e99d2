use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::LanguageCode;

static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u4e00-\u9fff]").expect("cjk"));

/// Share of alphabetic characters a chunk needs before it counts as English.
pub const EN_LETTER_RATIO: f64 = 0.5;

pub fn is_cjk_ideograph(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

pub fn contains_cjk(text: &str) -> bool {
    CJK_RE.is_match(text)
}

/// Presence test: a single ideograph anywhere makes the whole text Chinese.
pub fn detect_language(text: &str) -> LanguageCode {
    if contains_cjk(text) {
        LanguageCode::Zh
    } else {
        LanguageCode::En
    }
}

/// Whether a chunk counts as written in `lang`.
///
/// Chinese is a presence test. English needs more than half of the trimmed length to be
/// letters, so punctuation or digit runs never count; ideographs are not letters here.
pub fn is_chunk_language(text: &str, lang: LanguageCode) -> bool {
    match lang {
        LanguageCode::Zh => contains_cjk(text),
        LanguageCode::En => {
            let letters = text
                .chars()
                .filter(|c| c.is_alphabetic() && !is_cjk_ideograph(*c))
                .count();
            let len = text.trim().chars().count();
            letters as f64 > len as f64 * EN_LETTER_RATIO
        }
    }
}

pub fn lang_label(code: LanguageCode) -> &'static str {
    match code {
        LanguageCode::Zh => "Chinese (Simplified)",
        LanguageCode::En => "English",
    }
}

/// Shortens text for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', "\\n");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ideograph_forces_chinese() {
        assert_eq!(detect_language("hello 你 there"), LanguageCode::Zh);
        assert_eq!(detect_language("hello there"), LanguageCode::En);
        assert_eq!(detect_language(""), LanguageCode::En);
    }

    #[test]
    fn punctuation_alone_is_not_chinese() {
        assert!(!contains_cjk("。，？"));
        assert!(!is_chunk_language("。，？", LanguageCode::Zh));
        assert!(is_chunk_language("好。", LanguageCode::Zh));
    }

    #[test]
    fn english_needs_letter_majority() {
        assert!(is_chunk_language("I love ", LanguageCode::En));
        assert!(is_chunk_language("ab1", LanguageCode::En));
        assert!(!is_chunk_language("a1", LanguageCode::En));
        assert!(!is_chunk_language("123", LanguageCode::En));
        assert!(!is_chunk_language(" \n ", LanguageCode::En));
        assert!(!is_chunk_language("", LanguageCode::En));
    }

    #[test]
    fn ideographs_do_not_count_as_english_letters() {
        assert!(!is_chunk_language("苹果", LanguageCode::En));
        // A CJK run with full-width punctuation is never sent as English text.
        assert!(!is_chunk_language("你好，", LanguageCode::En));
    }

    #[test]
    fn whitespace_is_excluded_from_the_length() {
        // 2 letters against a trimmed length of 3.
        assert!(is_chunk_language("  a.b  ", LanguageCode::En));
    }

    #[test]
    fn preview_truncates_and_flattens() {
        assert_eq!(preview("a\nb", 10), "a\\nb");
        assert_eq!(preview("abcdef", 3), "abc…");
    }
}
