use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn save_json(data: &serde_json::Value, path: &Path) -> std::io::Result<()> {
    let pretty = serde_json::to_string_pretty(data).map_err(std::io::Error::other)?;
    save_bytes(pretty.as_bytes(), path)
}

pub fn save_bytes(content: &[u8], path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    tracing::info!("{} written ({} bytes)", path.display(), content.len());
    Ok(())
}

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}
