//! Timestamped notes that survive context compaction.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

pub const NO_NOTES: &str = "No supervisor notes yet.";

/// One file per note under the session's notes directory.
#[derive(Debug, Clone)]
pub struct NotesStore {
    dir: PathBuf,
}

impl NotesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `note_<YYYYmmdd_HHMMSS>.txt`, suffixed when the second is taken.
    pub async fn write(&self, content: &str) -> Result<PathBuf, String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| format!("failed to create {}: {e}", self.dir.display()))?;
        let now = Utc::now();
        let stem = format!("note_{}", now.format("%Y%m%d_%H%M%S"));
        let mut path = self.dir.join(format!("{stem}.txt"));
        let mut n = 2;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self.dir.join(format!("{stem}_{n}.txt"));
            n += 1;
        }
        let text = format!("[{}] {content}\n", now.format("%Y-%m-%d %H:%M:%S UTC"));
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| format!("failed to write note: {e}"))?;
        info!("Wrote note {}", path.display());
        Ok(path)
    }

    /// Every note in chronological order, one per line.
    pub async fn read_all(&self) -> Result<String, String> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(NO_NOTES.to_string()),
            Err(e) => return Err(format!("failed to read notes: {e}")),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| format!("failed to read notes: {e}"))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("note_") && name.ends_with(".txt") {
                files.push((note_order(&name), entry.path()));
            }
        }
        if files.is_empty() {
            return Ok(NO_NOTES.to_string());
        }
        files.sort();

        let mut notes = Vec::with_capacity(files.len());
        for (_, path) in files {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            notes.push(content.trim().to_string());
        }
        Ok(notes.join("\n"))
    }
}

/// Sort key of a note file: its timestamp, then the same-second suffix
/// compared numerically (an unsuffixed note counts as 1).
fn note_order(name: &str) -> (String, u32) {
    let stem = name.trim_start_matches("note_").trim_end_matches(".txt");
    let mut parts = stem.splitn(3, '_');
    let date = parts.next().unwrap_or_default();
    let time = parts.next().unwrap_or_default();
    let n = parts.next().and_then(|n| n.parse().ok()).unwrap_or(1);
    (format!("{date}_{time}"), n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_store_reports_no_notes() {
        let dir = tempfile::tempdir().unwrap();
        let store = NotesStore::new(dir.path().join("notes"));
        assert_eq!(store.read_all().await.unwrap(), NO_NOTES);
    }

    #[tokio::test]
    async fn notes_are_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = NotesStore::new(dir.path());
        let first = store.write("admin panel at /manage").await.unwrap();
        let second = store.write("creds: test/test").await.unwrap();
        assert_ne!(first, second);

        let all = store.read_all().await.unwrap();
        let lines: Vec<&str> = all.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] admin panel at /manage"));
        assert!(lines[1].ends_with("] creds: test/test"));
        assert!(lines[0].starts_with('['));
    }

    #[tokio::test]
    async fn same_second_suffixes_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in [
            ("note_20260101_120000_10.txt", "tenth"),
            ("note_20260101_120000_2.txt", "second"),
            ("note_20260101_120001.txt", "next second"),
            ("note_20260101_120000.txt", "first"),
            ("note_20260101_120000_9.txt", "ninth"),
        ] {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        let store = NotesStore::new(dir.path());

        let all = store.read_all().await.unwrap();

        assert_eq!(all, "first\nsecond\nninth\ntenth\nnext second");
    }

    #[test]
    fn note_order_parses_the_suffix() {
        assert_eq!(
            note_order("note_20260101_120000.txt"),
            ("20260101_120000".to_string(), 1)
        );
        assert_eq!(
            note_order("note_20260101_120000_12.txt"),
            ("20260101_120000".to_string(), 12)
        );
    }
}
