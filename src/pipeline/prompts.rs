pub const DEFAULT_TRANSLATE_PROMPT: &str = r#"Translate the following text from {{source_lang}} to {{target_lang}}.

Rules:
- Output ONLY the translation; no notes, no quotes, no explanations.
- Do NOT omit content; do NOT summarize.
- Preserve all digits (0-9) exactly.

TEXT:
{{text}}"#;

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}
