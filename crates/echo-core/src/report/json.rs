use crate::model::Experiment;
use std::path::Path;

/// Writes the full experiment document, transcripts included.
pub fn write_json(exp: &Experiment, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_string_pretty(exp)?;
    std::fs::write(path, body)?;
    Ok(())
}
