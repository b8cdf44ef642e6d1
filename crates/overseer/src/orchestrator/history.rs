//! Per-round records of the primary conversation.
//!
//! Every round appends `supervisor_iteration_<NNN>.json` holding the
//! messages that round added. Compaction never touches these files, so the
//! driving model can read back or search details that were summarized away.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Message;
use crate::context::{DEFAULT_CHARS_PER_TOKEN, estimate_text_tokens, format_transcript};
use crate::fsio::write_text;

const FILE_PREFIX: &str = "supervisor_iteration_";

pub const NO_HISTORY: &str = "No supervisor conversation history found.";

/// Token budget of one search result.
pub const SEARCH_MAX_TOKENS: usize = 10_000;

/// Default lines of context around a search hit.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Messages added during one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub iteration: usize,
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl RoundRecord {
    fn header(&self) -> String {
        format!(
            "=== Iteration {} ({}) ===",
            self.iteration,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Header followed by the transcript, one entry per line.
    fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.header()];
        lines.extend(format_transcript(&self.messages).lines().map(str::to_string));
        lines
    }
}

/// Options of a history search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub context_lines: usize,
    pub case_sensitive: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            context_lines: DEFAULT_CONTEXT_LINES,
            case_sensitive: false,
        }
    }
}

pub fn file_name(iteration: usize) -> String {
    format!("{FILE_PREFIX}{iteration:03}.json")
}

fn iteration_of(name: &str) -> Option<usize> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// The round records of one session.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the record of one round.
    pub async fn record(&self, iteration: usize, messages: &[Message]) -> Result<PathBuf, String> {
        let record = RoundRecord {
            iteration,
            timestamp: Utc::now(),
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| format!("failed to serialize round {iteration}: {e}"))?;
        let path = self.dir.join(file_name(iteration));
        write_text(&path, &json).await?;
        debug!("Recorded round {iteration} ({} message(s))", messages.len());
        Ok(path)
    }

    /// Records in iteration order, limited to `range` (inclusive) when set.
    pub async fn load(&self, range: Option<(usize, usize)>) -> Result<Vec<RoundRecord>, String> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(format!("failed to read history: {e}")),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| format!("failed to read history: {e}"))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(iteration) = iteration_of(&name) else {
                continue;
            };
            if let Some((from, to)) = range
                && !(from..=to).contains(&iteration)
            {
                continue;
            }
            files.push((iteration, entry.path()));
        }
        files.sort();

        let mut records = Vec::with_capacity(files.len());
        for (_, path) in files {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            let record: RoundRecord = serde_json::from_str(&text)
                .map_err(|e| format!("malformed {}: {e}", path.display()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Render the recorded conversation, keeping the last `tail_lines`
    /// lines when set.
    pub async fn read(
        &self,
        range: Option<(usize, usize)>,
        tail_lines: Option<usize>,
    ) -> Result<String, String> {
        let records = self.load(range).await?;
        if records.is_empty() {
            return Ok(NO_HISTORY.to_string());
        }
        let mut lines = Vec::new();
        for record in &records {
            lines.extend(record.lines());
            lines.push(String::new());
        }
        if let Some(tail) = tail_lines {
            let skip = lines.len().saturating_sub(tail);
            lines.drain(..skip);
        }
        let text = lines.join("\n");
        if text.trim().is_empty() {
            Ok("No conversation content found.".to_string())
        } else {
            Ok(text)
        }
    }

    /// Find lines matching `query` with surrounding context.
    ///
    /// `query` is a regular expression; an invalid one is matched literally.
    /// Output stops at [`SEARCH_MAX_TOKENS`].
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<String, String> {
        let records = self.load(None).await?;
        if records.is_empty() {
            return Ok("No supervisor conversation history to search.".to_string());
        }
        let pattern = compile(query, options.case_sensitive)?;

        let mut hits = Vec::new();
        for record in &records {
            let lines = record.lines();
            for (idx, line) in lines.iter().enumerate() {
                if !pattern.is_match(line) {
                    continue;
                }
                let start = idx.saturating_sub(options.context_lines);
                let end = (idx + options.context_lines + 1).min(lines.len());
                let context = (start..end)
                    .map(|i| {
                        let marker = if i == idx { ">>> " } else { "    " };
                        format!("{marker}{}", lines[i])
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                hits.push(format!(
                    "{} (iteration {}, line {idx}):\n{context}",
                    file_name(record.iteration),
                    record.iteration
                ));
            }
        }
        if hits.is_empty() {
            return Ok(format!("No matches found for query: {query}"));
        }

        let header = format!("Found {} matches for: {query}", hits.len());
        let mut used = estimate_text_tokens(&header, DEFAULT_CHARS_PER_TOKEN);
        let mut out = vec![header, String::new()];
        let mut included = 0;
        for hit in &hits {
            let tokens = estimate_text_tokens(hit, DEFAULT_CHARS_PER_TOKEN);
            if used + tokens > SEARCH_MAX_TOKENS {
                break;
            }
            out.push(hit.clone());
            out.push(String::new());
            used += tokens;
            included += 1;
        }
        if included < hits.len() {
            out.push(format!(
                "... and {} more matches (truncated to stay within token limit)",
                hits.len() - included
            ));
        }
        Ok(out.join("\n").trim_end().to_string())
    }
}

fn compile(query: &str, case_sensitive: bool) -> Result<Regex, String> {
    RegexBuilder::new(query)
        .case_insensitive(!case_sensitive)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(query))
                .case_insensitive(!case_sensitive)
                .build()
        })
        .map_err(|e| format!("invalid query: {e}"))
}
