//! Context window management: token accounting and anchored compaction.
//!
//! - **[`budget`]**: [`ContextBudget`] estimates the token size of a
//!   conversation and decides when it has crossed `ceiling - reserve`.
//! - **[`summarizer`]**: flattens a span of messages into a role-tagged
//!   transcript and asks the summarization model for a summary, with a
//!   deterministic fallback.
//! - **[`compaction`]**: [`ContextWindow`] replaces the middle of a
//!   conversation with one summary message while keeping the system prompt,
//!   the first user message and the trailing window intact.

pub mod budget;
pub mod compaction;
pub mod summarizer;

pub use budget::{ContextBudget, ContextStats, DEFAULT_CHARS_PER_TOKEN, estimate_text_tokens};
pub use compaction::{ContextWindow, repair_tool_structure, strip_trailing_orphans};
pub use summarizer::{Summarizer, SummarizerConfig, fallback_summary, format_transcript};
