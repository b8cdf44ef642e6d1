//! Convenience re-exports for common `overseer` types.
//!
//! ```ignore
//! use overseer::prelude::*;
//! ```
//!
//! Covers what an embedding program needs to run a session: the client and
//! wire types, configuration, the orchestrator, the runtimes and the
//! delivery sinks. Lower-level pieces (action parsing, journal files,
//! compaction internals) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, CompletionService, Message, OpenRouterClient, ToolDef, json_schema_for};

// ── Session ─────────────────────────────────────────────────────────
pub use crate::config::{OverseerConfig, SubmissionMode};
pub use crate::orchestrator::{Orchestrator, RunReport, StopReason};
pub use crate::orchestrator::router::TaskRouter;

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextBudget, ContextWindow, Summarizer, SummarizerConfig};

// ── Workers ─────────────────────────────────────────────────────────
pub use crate::instance::{
    InstanceRuntime, InstanceStatus, ProcessRuntime, Supervisor, SupervisorError, WaitReport,
};

// ── Triage and delivery ─────────────────────────────────────────────
pub use crate::delivery::{Delivery, DeliverySink, FanOutSink, FileDeliverySink, WebhookDeliverySink};
pub use crate::triage::{Finding, TriageManager, TriageOutcome, TriagePipeline};
