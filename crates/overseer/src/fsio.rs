//! Small async file helpers for session artifacts.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Append `text` to `path`, creating the file (and its parent) if needed.
pub async fn append_text(path: &Path, text: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    file.write_all(text.as_bytes())
        .await
        .map_err(|e| format!("failed to append to {}: {e}", path.display()))?;
    file.flush()
        .await
        .map_err(|e| format!("failed to flush {}: {e}", path.display()))
}

/// Replace the contents of `path` via a temp file and rename.
pub async fn write_text(path: &Path, text: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text)
        .await
        .map_err(|e| format!("failed to write {}: {e}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| format!("failed to replace {}: {e}", path.display()))
}
