//! Files a worker writes into its log directory.
//!
//! | File | Shape |
//! |------|-------|
//! | `status.json` | `{"status": "<state>"}` |
//! | `realtime_conversation.json` | `[message, ...]` |
//! | `final_result.json` | `{"conversation": [message, ...]}` |
//!
//! Workers write these; the supervisor only reads them. A missing file means
//! "not yet available", never an error.

use std::path::Path;
use std::time::SystemTime;

use serde::Deserialize;
use tracing::debug;

use super::InstanceStatus;
use crate::ToolCall;

pub const STATUS_FILE: &str = "status.json";
pub const REALTIME_CONVERSATION_FILE: &str = "realtime_conversation.json";
pub const FINAL_RESULT_FILE: &str = "final_result.json";

/// Text returned when no assistant message can be found.
pub const NO_RESPONSE: &str = "No response available";

/// Longest excerpt (in characters) before an ellipsis is appended.
pub const EXCERPT_CHARS: usize = 200;

#[derive(Deserialize)]
struct StatusArtifact {
    status: String,
}

#[derive(Deserialize)]
struct FinalResultArtifact {
    #[serde(default)]
    conversation: Vec<ArtifactMessage>,
}

/// A message as written by a worker. Lenient: content may be a string, null
/// or structured JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ArtifactMessage {
    /// Content rendered as plain text.
    pub fn text(&self) -> String {
        match &self.content {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("failed to read {}: {e}", path.display())),
    }
}

/// Last modification time of an artifact, `None` when it is absent.
pub async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Read a status artifact. `Ok(None)` when the file is absent or names an
/// unknown state.
pub async fn read_status(path: &Path) -> Result<Option<InstanceStatus>, String> {
    let Some(text) = read_optional(path).await? else {
        return Ok(None);
    };
    let artifact: StatusArtifact = serde_json::from_str(&text)
        .map_err(|e| format!("malformed status file {}: {e}", path.display()))?;
    let status = InstanceStatus::parse(&artifact.status);
    if status.is_none() {
        debug!("Ignoring unknown worker status '{}'", artifact.status);
    }
    Ok(status)
}

/// Read the live conversation artifact. `Ok(None)` when absent.
pub async fn read_realtime_conversation(
    log_dir: &Path,
) -> Result<Option<Vec<ArtifactMessage>>, String> {
    let path = log_dir.join(REALTIME_CONVERSATION_FILE);
    let Some(text) = read_optional(&path).await? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| format!("malformed {}: {e}", path.display()))
}

/// Read the conversation from the finalized-result artifact. `Ok(None)` when
/// absent.
pub async fn read_final_conversation(
    log_dir: &Path,
) -> Result<Option<Vec<ArtifactMessage>>, String> {
    let path = log_dir.join(FINAL_RESULT_FILE);
    let Some(text) = read_optional(&path).await? else {
        return Ok(None);
    };
    serde_json::from_str::<FinalResultArtifact>(&text)
        .map(|a| Some(a.conversation))
        .map_err(|e| format!("malformed {}: {e}", path.display()))
}

/// Cut text to [`EXCERPT_CHARS`] characters, appending `...` when cut.
pub fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let head: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Excerpt of the last assistant message, if any.
pub fn last_assistant_excerpt(messages: &[ArtifactMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "assistant")
        .map(|m| excerpt(&m.text()))
}

/// Last assistant excerpt from the live conversation, or [`NO_RESPONSE`].
pub async fn realtime_excerpt(log_dir: &Path) -> String {
    match read_realtime_conversation(log_dir).await {
        Ok(Some(messages)) => last_assistant_excerpt(&messages),
        Ok(None) => None,
        Err(e) => {
            debug!("{e}");
            None
        }
    }
    .unwrap_or_else(|| NO_RESPONSE.to_string())
}

/// Last assistant excerpt from the finalized result, or [`NO_RESPONSE`].
pub async fn final_result_excerpt(log_dir: &Path) -> String {
    match read_final_conversation(log_dir).await {
        Ok(Some(messages)) => last_assistant_excerpt(&messages),
        Ok(None) => None,
        Err(e) => {
            debug!("{e}");
            None
        }
    }
    .unwrap_or_else(|| NO_RESPONSE.to_string())
}
