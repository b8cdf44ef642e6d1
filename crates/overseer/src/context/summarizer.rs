//! LLM-backed summarization of a conversation span.
//!
//! The span is flattened into a role-tagged transcript and sent to the
//! summarization model in a single call. Summarization never fails: on any
//! error a deterministic placeholder is produced instead.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{ChatRequest, CompletionService, Message, MessageRole, DEFAULT_SUMMARY_MODEL};

/// Instructions sent ahead of the transcript.
const SUMMARIZATION_PROMPT: &str = "\
You are compressing the history of a supervisor that coordinates autonomous \
worker instances. Summarize the transcript below so the supervisor can keep \
working without it. Focus on:
- Instances spawned, their tasks, and their last known status
- Findings submitted and the outcome of their review
- Key observations, decisions, and failed approaches
- Follow-ups sent and what each instance was asked to do next
- What remains to be done

Rules:
- Only include facts explicitly stated in the transcript. Do not infer.
- Preserve instance ids, hostnames, paths, and error messages verbatim.
- Start the summary with the heading \"## Session Summary\".";

/// Configuration for the summarizer.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Model used for summarization.
    pub model: String,
    /// Maximum tokens for the summarization response.
    pub max_summary_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_SUMMARY_MODEL.to_string(),
            max_summary_tokens: 10_000,
        }
    }
}

/// Summarizes transcripts through an injected [`CompletionService`].
#[derive(Clone)]
pub struct Summarizer {
    client: Arc<dyn CompletionService>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(client: Arc<dyn CompletionService>, config: SummarizerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Build the one-shot summarization request for a transcript.
    pub fn build_request(&self, transcript: &str) -> ChatRequest {
        ChatRequest {
            model: Some(self.config.model.clone()),
            messages: vec![Message::user(format!(
                "{SUMMARIZATION_PROMPT}\n\n=== TRANSCRIPT ===\n{transcript}"
            ))],
            max_tokens: self.config.max_summary_tokens,
            ..Default::default()
        }
    }

    /// Summarize a transcript. Falls back to [`fallback_summary`] on a
    /// transport error or an empty reply.
    pub async fn summarize(&self, transcript: &str) -> String {
        let request = self.build_request(transcript);
        match self.client.chat(&request).await {
            Ok(completion) => match completion.content {
                Some(text) if !text.trim().is_empty() => {
                    debug!("Summary received ({} chars)", text.len());
                    text
                }
                _ => {
                    warn!("Summarization returned no content, using fallback summary");
                    fallback_summary(transcript)
                }
            },
            Err(e) => {
                warn!("Summarization failed: {e}");
                fallback_summary(transcript)
            }
        }
    }
}

/// Flatten messages into a role-tagged transcript.
///
/// ```
/// use overseer::{Message, ToolCall};
/// use overseer::context::summarizer::format_transcript;
///
/// let text = format_transcript(&[
///     Message::assistant(Some("Spawning".into()), vec![ToolCall::new("c1", "list_instances", "{}")]),
///     Message::tool_result("c1", "No active instances"),
/// ]);
/// assert_eq!(
///     text,
///     "ASSISTANT: Spawning\n  TOOL_CALL: list_instances({})\nTOOL_RESULT[c1]: No active instances"
/// );
/// ```
pub fn format_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            MessageRole::System => lines.push(format!("SYSTEM: {}", msg.text())),
            MessageRole::User => lines.push(format!("USER: {}", msg.text())),
            MessageRole::Assistant => {
                lines.push(format!("ASSISTANT: {}", msg.text()));
                for call in msg.calls() {
                    lines.push(format!(
                        "  TOOL_CALL: {}({})",
                        call.function.name, call.function.arguments
                    ));
                }
            }
            MessageRole::Tool => {
                let id = msg.tool_call_id.as_deref().unwrap_or("unknown");
                lines.push(format!("TOOL_RESULT[{id}]: {}", msg.text()));
            }
        }
    }
    lines.join("\n")
}

/// Deterministic summary used when the summarization model is unavailable.
pub fn fallback_summary(transcript: &str) -> String {
    let words = transcript.split_whitespace().count();
    format!(
        "## Session Summary\nPrevious conversation context has been truncated due to length. \
         {words} words of supervisor activity occurred before this point."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatCompletion, CompletionFuture, ToolCall};

    struct FixedReply(Result<Option<&'static str>, &'static str>);

    impl CompletionService for FixedReply {
        fn chat<'a>(&'a self, _request: &'a ChatRequest) -> CompletionFuture<'a> {
            let reply = self.0;
            Box::pin(async move {
                match reply {
                    Ok(content) => Ok(ChatCompletion {
                        content: content.map(str::to_string),
                        ..Default::default()
                    }),
                    Err(e) => Err(e.to_string()),
                }
            })
        }
    }

    fn summarizer(reply: Result<Option<&'static str>, &'static str>) -> Summarizer {
        Summarizer::new(Arc::new(FixedReply(reply)), SummarizerConfig::default())
    }

    #[test]
    fn transcript_tags_every_role() {
        let text = format_transcript(&[
            Message::system("rules"),
            Message::user("go"),
            Message::assistant_text("ok"),
        ]);
        assert_eq!(text, "SYSTEM: rules\nUSER: go\nASSISTANT: ok");
    }

    #[test]
    fn transcript_lists_each_tool_call() {
        let text = format_transcript(&[Message::assistant(
            None,
            vec![
                ToolCall::new("a", "spawn_instance", r#"{"instance_id":"w1"}"#),
                ToolCall::new("b", "wait_for_instance", r#"{"instance_id":"w1"}"#),
            ],
        )]);
        assert!(text.contains("  TOOL_CALL: spawn_instance({\"instance_id\":\"w1\"})"));
        assert!(text.contains("  TOOL_CALL: wait_for_instance("));
    }

    #[test]
    fn fallback_counts_words() {
        let summary = fallback_summary("USER: one two\nASSISTANT: three");
        assert_eq!(
            summary,
            "## Session Summary\nPrevious conversation context has been truncated due to \
             length. 5 words of supervisor activity occurred before this point."
        );
    }

    #[test]
    fn request_uses_summary_model() {
        let s = summarizer(Ok(Some("x")));
        let req = s.build_request("USER: hi");
        assert_eq!(req.model.as_deref(), Some(DEFAULT_SUMMARY_MODEL));
        assert!(req.messages[0].text().ends_with("USER: hi"));
        assert!(req.tools.is_none());
    }

    #[tokio::test]
    async fn summarize_returns_model_text() {
        let s = summarizer(Ok(Some("## Session Summary\nspawned w1")));
        assert_eq!(s.summarize("USER: hi").await, "## Session Summary\nspawned w1");
    }

    #[tokio::test]
    async fn summarize_falls_back_on_error() {
        let s = summarizer(Err("HTTP 500"));
        let summary = s.summarize("USER: hi there").await;
        assert!(summary.contains("3 words of supervisor activity"));
    }

    #[tokio::test]
    async fn summarize_falls_back_on_empty_content() {
        let s = summarizer(Ok(Some("   ")));
        assert!(s.summarize("a b").await.starts_with("## Session Summary"));
        let s = summarizer(Ok(None));
        assert!(s.summarize("a b").await.contains("2 words"));
    }
}
