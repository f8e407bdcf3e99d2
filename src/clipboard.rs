use anyhow::{anyhow, Context};
use arboard::Clipboard;

pub fn read_clipboard() -> anyhow::Result<String> {
    let mut cb = Clipboard::new().context("open clipboard")?;
    let text = cb.get_text().context("read clipboard text")?;
    if text.is_empty() {
        return Err(anyhow!("clipboard is empty"));
    }
    Ok(text)
}

pub fn write_clipboard(text: &str) -> anyhow::Result<()> {
    let mut cb = Clipboard::new().context("open clipboard")?;
    cb.set_text(text.to_string())
        .context("write clipboard text")?;
    Ok(())
}
