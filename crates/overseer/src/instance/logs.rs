//! Readable rendering of a worker's conversation artifact.

use std::path::Path;

use super::artifacts::{ArtifactMessage, read_final_conversation, read_realtime_conversation};
use crate::context::{DEFAULT_CHARS_PER_TOKEN, estimate_text_tokens};

/// Default number of trailing lines returned by `read_instance_logs`.
pub const DEFAULT_TAIL_LINES: usize = 50;

/// Marker prepended when lines are dropped to fit a token limit.
pub const TRUNCATION_MARKER: &str = "[... earlier logs truncated due to token limit]";

/// Render messages as `[role] content` lines with tool calls inline.
pub fn render_conversation(messages: &[ArtifactMessage]) -> String {
    let mut out = String::new();
    for msg in messages {
        let role = if msg.role.is_empty() { "unknown" } else { msg.role.as_str() };
        out.push_str(&format!("[{role}] {}\n", msg.text()));
        for call in msg.tool_calls.as_deref().unwrap_or(&[]) {
            out.push_str(&format!(
                "  -> {}({})\n",
                call.function.name, call.function.arguments
            ));
        }
    }
    out
}

/// Keep the last `n` lines.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}

/// Drop lines from the front until the text fits `max_tokens`, prefixing
/// [`TRUNCATION_MARKER`] when anything was dropped.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let cpt = DEFAULT_CHARS_PER_TOKEN;
    if estimate_text_tokens(text, cpt) <= max_tokens {
        return text.to_string();
    }
    let available = max_tokens.saturating_sub(estimate_text_tokens(TRUNCATION_MARKER, cpt));
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = 0;
    let mut used = 0;
    for line in lines.iter().rev() {
        let cost = estimate_text_tokens(line, cpt) + 1;
        if used + cost > available {
            break;
        }
        used += cost;
        kept += 1;
    }
    let tail = lines[lines.len() - kept..].join("\n");
    format!("{TRUNCATION_MARKER}\n\n{tail}")
}

/// Read and render a worker's logs.
///
/// Prefers the live conversation artifact and falls back to the finalized
/// result. `Ok(None)` when the worker has written neither yet.
pub async fn read_logs(
    log_dir: &Path,
    tail: usize,
    max_tokens: Option<usize>,
) -> Result<Option<String>, String> {
    let messages = match read_realtime_conversation(log_dir).await? {
        Some(m) => m,
        None => match read_final_conversation(log_dir).await? {
            Some(m) => m,
            None => return Ok(None),
        },
    };
    let rendered = tail_lines(&render_conversation(&messages), tail);
    Ok(Some(match max_tokens {
        Some(limit) => truncate_to_tokens(&rendered, limit),
        None => rendered,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(json: &str) -> Vec<ArtifactMessage> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn render_includes_tool_calls() {
        let rendered = render_conversation(&messages(
            r#"[
                {"role": "user", "content": "scan host"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"cmd\":\"nmap\"}"}}
                ]}
            ]"#,
        ));
        assert_eq!(
            rendered,
            "[user] scan host\n[assistant] \n  -> shell({\"cmd\":\"nmap\"})\n"
        );
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail_lines("a\nb", 10), "a\nb");
    }

    #[test]
    fn truncation_keeps_recent_lines_and_marks() {
        let text: String = (0..100).map(|i| format!("line number {i}\n")).collect();
        let cut = truncate_to_tokens(&text, 40);
        assert!(cut.starts_with(TRUNCATION_MARKER));
        assert!(cut.ends_with("line number 99"));
        assert!(!cut.contains("line number 0\n"));
        assert!(estimate_text_tokens(&cut, DEFAULT_CHARS_PER_TOKEN) <= 60);
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_tokens("hello", 100), "hello");
    }

    #[tokio::test]
    async fn read_logs_falls_back_to_final_result() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_logs(dir.path(), 50, None).await, Ok(None));

        std::fs::write(
            dir.path().join("final_result.json"),
            r#"{"conversation": [{"role": "assistant", "content": "done"}]}"#,
        )
        .unwrap();
        let logs = read_logs(dir.path(), 50, None).await.unwrap().unwrap();
        assert_eq!(logs, "[assistant] done");
    }
}
