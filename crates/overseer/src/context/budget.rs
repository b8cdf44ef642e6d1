//! Token accounting for a conversation.
//!
//! Counts are estimates: every text part (role, content, tool name, tool
//! arguments, tool call id) costs `ceil(chars / chars_per_token)` tokens and
//! every message adds one framing token. The framing token makes the count
//! strictly monotonic: appending any message, even an empty one, raises it.

use crate::Message;
use serde::Serialize;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default context ceiling in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Default headroom kept free below the ceiling. Compaction triggers once the
/// conversation reaches `ceiling - reserve`.
pub const DEFAULT_RESERVE_TOKENS: usize = 15_000;

/// Tokens charged per message on top of its text parts.
const MESSAGE_FRAMING_TOKENS: usize = 1;

/// Estimate the tokens for a single text part.
pub fn estimate_text_tokens(text: &str, chars_per_token: f64) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    (chars as f64 / chars_per_token).ceil() as usize
}

/// Tracks a conversation against a token ceiling.
///
/// ```
/// use overseer::Message;
/// use overseer::context::ContextBudget;
///
/// let budget = ContextBudget::default().with_max_tokens(1_000).with_reserve_tokens(100);
/// let messages = vec![Message::system("You supervise workers."), Message::user("Begin.")];
/// assert!(!budget.should_compact(&messages));
/// assert_eq!(budget.stats(&messages).message_count, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ContextBudget {
    /// Context ceiling in tokens.
    max_tokens: usize,
    /// Headroom kept below the ceiling.
    reserve_tokens: usize,
    /// Characters per token ratio.
    chars_per_token: f64,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_CONTEXT_WINDOW,
            reserve_tokens: DEFAULT_RESERVE_TOKENS,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextBudget {
    /// Override the context ceiling (in tokens).
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Override the reserved headroom (in tokens).
    pub fn with_reserve_tokens(mut self, reserve: usize) -> Self {
        self.reserve_tokens = reserve;
        self
    }

    /// Override the characters-per-token ratio. Non-positive ratios are
    /// ignored.
    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        if cpt > 0.0 {
            self.chars_per_token = cpt;
        }
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn reserve_tokens(&self) -> usize {
        self.reserve_tokens
    }

    /// Token count at which compaction triggers.
    pub fn threshold(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserve_tokens)
    }

    /// Estimate the tokens of a single text part with this budget's ratio.
    pub fn text_tokens(&self, text: &str) -> usize {
        estimate_text_tokens(text, self.chars_per_token)
    }

    /// Estimate the tokens of one message.
    pub fn message_tokens(&self, msg: &Message) -> usize {
        let mut total = MESSAGE_FRAMING_TOKENS;
        total += self.text_tokens(&msg.role.to_string());
        total += self.text_tokens(msg.text());
        for call in msg.calls() {
            total += self.text_tokens(&call.function.name);
            total += self.text_tokens(&call.function.arguments);
        }
        if let Some(ref id) = msg.tool_call_id {
            total += self.text_tokens(id);
        }
        total
    }

    /// Estimate the tokens of a whole conversation.
    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.message_tokens(m)).sum()
    }

    /// Whether the conversation has reached the compaction threshold.
    pub fn should_compact(&self, messages: &[Message]) -> bool {
        self.count_tokens(messages) >= self.threshold()
    }

    /// Read-only usage snapshot.
    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        let token_count = self.count_tokens(messages);
        let utilization = if self.max_tokens > 0 {
            token_count as f64 / self.max_tokens as f64 * 100.0
        } else {
            100.0
        };
        ContextStats {
            message_count: messages.len(),
            token_count,
            max_tokens: self.max_tokens,
            budget_remaining: self.threshold().saturating_sub(token_count),
            should_compact: token_count >= self.threshold(),
            utilization_percent: (utilization * 10.0).round() / 10.0,
        }
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextStats {
    pub message_count: usize,
    pub token_count: usize,
    pub max_tokens: usize,
    /// Tokens left before compaction triggers.
    pub budget_remaining: usize,
    pub should_compact: bool,
    /// Usage relative to the ceiling, one decimal place.
    pub utilization_percent: f64,
}

impl ContextStats {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} messages, ~{} tokens ({:.1}% of {}, {} before compaction)",
            self.message_count,
            self.token_count,
            self.utilization_percent,
            self.max_tokens,
            self.budget_remaining,
        )
    }
}
