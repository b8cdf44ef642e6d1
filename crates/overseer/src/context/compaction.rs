//! Anchored compaction of a conversation.
//!
//! Layout after compaction:
//!
//! ```text
//! [system]?  [first user]?  [user: summary]  [trailing window, repaired]
//! ```
//!
//! The anchors are never summarized. Everything between them and the
//! trailing window is flattened into a transcript and replaced by one
//! synthetic user message. Tool results in the trailing window whose call
//! was summarized away are dropped so the sequence stays valid for the API.

use std::collections::HashSet;

use tracing::{info, warn};

use super::budget::{ContextBudget, ContextStats};
use super::summarizer::{Summarizer, format_transcript};
use crate::{Message, MessageRole};

/// Default number of trailing messages kept verbatim.
pub const DEFAULT_PRESERVE_RECENT: usize = 20;

/// Budget plus summarizer: decides when to compact and does it.
#[derive(Clone)]
pub struct ContextWindow {
    budget: ContextBudget,
    summarizer: Summarizer,
    preserve_recent: usize,
}

impl ContextWindow {
    pub fn new(budget: ContextBudget, summarizer: Summarizer) -> Self {
        Self {
            budget,
            summarizer,
            preserve_recent: DEFAULT_PRESERVE_RECENT,
        }
    }

    /// Override how many trailing messages survive compaction verbatim.
    pub fn with_preserve_recent(mut self, n: usize) -> Self {
        self.preserve_recent = n;
        self
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        self.budget.count_tokens(messages)
    }

    pub fn should_compact(&self, messages: &[Message]) -> bool {
        self.budget.should_compact(messages)
    }

    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        self.budget.stats(messages)
    }

    /// Compact only when the conversation is over budget.
    pub async fn maybe_compact(&self, messages: Vec<Message>) -> Vec<Message> {
        if self.should_compact(&messages) {
            self.compact(messages).await
        } else {
            messages
        }
    }

    /// Compact with the configured trailing window.
    pub async fn compact(&self, messages: Vec<Message>) -> Vec<Message> {
        self.compact_with(messages, self.preserve_recent).await
    }

    /// Compact keeping the last `preserve_recent` messages verbatim.
    ///
    /// Returns the input unchanged when there is nothing outside the
    /// anchors and the trailing window.
    pub async fn compact_with(&self, messages: Vec<Message>, preserve_recent: usize) -> Vec<Message> {
        let Some(plan) = CompactionPlan::for_messages(&messages, preserve_recent) else {
            return messages;
        };

        let original_tokens = self.count_tokens(&messages);
        let mut anchors = Vec::with_capacity(2);
        let mut middle = Vec::new();
        let mut recent = Vec::with_capacity(messages.len() - plan.end);
        for (idx, msg) in messages.into_iter().enumerate() {
            if plan.is_anchor(idx) {
                anchors.push(msg);
            } else if idx >= plan.end {
                recent.push(msg);
            } else {
                middle.push(msg);
            }
        }
        info!(
            "Context too long (~{original_tokens} tokens), summarizing {} messages",
            middle.len()
        );

        let transcript = format_transcript(&middle);
        let summary = self.summarizer.summarize(&transcript).await;

        let mut compacted = anchors;
        compacted.push(Message::user(summary));
        compacted.extend(repair_tool_structure(recent));

        info!(
            "Context summarized from ~{original_tokens} to ~{} tokens",
            self.count_tokens(&compacted)
        );
        compacted
    }
}

/// Index bookkeeping for one compaction.
#[derive(Debug, PartialEq, Eq)]
struct CompactionPlan {
    system_idx: Option<usize>,
    /// First user message, unless it already sits in the trailing window.
    user_idx: Option<usize>,
    /// Start of the trailing window.
    end: usize,
}

impl CompactionPlan {
    fn for_messages(messages: &[Message], preserve_recent: usize) -> Option<Self> {
        let len = messages.len();
        if len <= preserve_recent + 2 {
            return None;
        }
        let end = len - preserve_recent;

        let system_idx = messages
            .first()
            .filter(|m| m.role == MessageRole::System)
            .map(|_| 0);
        let user_idx = messages
            .iter()
            .position(|m| m.role == MessageRole::User)
            .filter(|&u| u < end);

        let plan = Self {
            system_idx,
            user_idx,
            end,
        };
        if plan.summarized_count() == 0 {
            return None;
        }
        Some(plan)
    }

    fn is_anchor(&self, idx: usize) -> bool {
        Some(idx) == self.system_idx || Some(idx) == self.user_idx
    }

    fn summarized_count(&self) -> usize {
        (0..self.end).filter(|&i| !self.is_anchor(i)).count()
    }
}

/// Drop tool messages whose `tool_call_id` does not match a call issued by
/// an earlier assistant message in the same sequence.
pub fn repair_tool_structure(messages: Vec<Message>) -> Vec<Message> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut repaired = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            MessageRole::Assistant => {
                seen.extend(msg.calls().iter().map(|c| c.id.clone()));
                repaired.push(msg);
            }
            MessageRole::Tool => {
                let matched = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| seen.contains(id));
                if matched {
                    repaired.push(msg);
                } else {
                    warn!(
                        "Removed orphaned tool message with id {}",
                        msg.tool_call_id.as_deref().unwrap_or("<none>")
                    );
                }
            }
            _ => repaired.push(msg),
        }
    }
    repaired
}

/// Remove structurally invalid tool messages at the end of a conversation
/// in place. Returns the number removed.
pub fn strip_trailing_orphans(messages: &mut Vec<Message>) -> usize {
    let seen: HashSet<String> = messages
        .iter()
        .flat_map(|m| m.calls().iter().map(|c| c.id.clone()))
        .collect();
    let mut removed = 0;
    while let Some(last) = messages.last() {
        let orphan = last.role == MessageRole::Tool
            && !last
                .tool_call_id
                .as_deref()
                .is_some_and(|id| seen.contains(id));
        if !orphan {
            break;
        }
        messages.pop();
        removed += 1;
    }
    if removed > 0 {
        warn!("Removed {removed} orphaned trailing tool message(s)");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    fn numbered(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::assistant_text(format!("a{i}"))
                } else {
                    Message::user(format!("u{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn short_conversations_have_no_plan() {
        let mut messages = vec![Message::system("s"), Message::user("task")];
        messages.extend(numbered(3));
        assert!(CompactionPlan::for_messages(&messages, 3).is_none());
    }

    #[test]
    fn plan_skips_anchors() {
        let mut messages = vec![Message::system("s"), Message::user("task")];
        messages.extend(numbered(10));
        let plan = CompactionPlan::for_messages(&messages, 4).unwrap();
        assert_eq!(plan.system_idx, Some(0));
        assert_eq!(plan.user_idx, Some(1));
        assert_eq!(plan.end, 8);
        assert_eq!(plan.summarized_count(), 6);
    }

    #[test]
    fn plan_without_system_message() {
        let mut messages = vec![Message::user("task")];
        messages.extend(numbered(10));
        let plan = CompactionPlan::for_messages(&messages, 2).unwrap();
        assert_eq!(plan.system_idx, None);
        assert_eq!(plan.user_idx, Some(0));
        assert_eq!(plan.summarized_count(), 8);
    }

    #[test]
    fn system_not_at_start_is_not_an_anchor() {
        let messages = vec![
            Message::assistant_text("a"),
            Message::system("late"),
            Message::assistant_text("b"),
            Message::assistant_text("c"),
            Message::assistant_text("d"),
        ];
        let plan = CompactionPlan::for_messages(&messages, 1).unwrap();
        assert_eq!(plan.system_idx, None);
        assert!(!plan.is_anchor(1));
        assert_eq!(plan.summarized_count(), 4);
    }

    #[test]
    fn first_user_inside_window_is_not_an_anchor() {
        let messages = vec![
            Message::system("s"),
            Message::assistant_text("a"),
            Message::assistant_text("b"),
            Message::assistant_text("c"),
            Message::user("late task"),
            Message::assistant_text("d"),
        ];
        let plan = CompactionPlan::for_messages(&messages, 2).unwrap();
        assert_eq!(plan.user_idx, None);
        assert_eq!(plan.summarized_count(), 3);
    }

    #[test]
    fn plan_requires_more_than_window_plus_anchors() {
        let mut messages = vec![Message::system("s"), Message::user("task")];
        messages.extend(numbered(3));
        assert!(CompactionPlan::for_messages(&messages, 2).is_some());
        let messages = vec![
            Message::system("s"),
            Message::user("task"),
            Message::assistant_text("a"),
            Message::assistant_text("b"),
        ];
        assert!(CompactionPlan::for_messages(&messages, 1).is_some());
        assert!(CompactionPlan::for_messages(&messages, 2).is_none());
    }

    #[test]
    fn repair_drops_orphans_and_keeps_matched() {
        let messages = vec![
            Message::tool_result("gone", "orphan"),
            Message::assistant(None, vec![ToolCall::new("c1", "list_instances", "{}")]),
            Message::tool_result("c1", "ok"),
            Message::tool_result("c2", "no call"),
        ];
        let repaired = repair_tool_structure(messages);
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn repair_rejects_result_before_its_call() {
        let messages = vec![
            Message::tool_result("c1", "early"),
            Message::assistant(None, vec![ToolCall::new("c1", "list_instances", "{}")]),
        ];
        let repaired = repair_tool_structure(messages);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].role, MessageRole::Assistant);
    }

    #[test]
    fn strip_trailing_orphans_only_touches_the_tail() {
        let mut messages = vec![
            Message::user("go"),
            Message::assistant(None, vec![ToolCall::new("c1", "finished", "{}")]),
            Message::tool_result("c1", "done"),
            Message::tool_result("x", "stray"),
            Message::tool_result("y", "stray"),
        ];
        assert_eq!(strip_trailing_orphans(&mut messages), 2);
        assert_eq!(messages.len(), 3);
        assert_eq!(strip_trailing_orphans(&mut messages), 0);
    }
}
