//! Review pipeline for submitted findings.
//!
//! Every finding accepted by the orchestrator in normal mode is handed to the
//! [`TriageManager`], which runs one [`TriagePipeline`] per finding in the
//! background. A pipeline moves strictly through Phase 1 (initial review),
//! Phase 2 (reproduction) and Phase 3 (severity), and ends in exactly one
//! [`TriageOutcome`].

pub mod finding;
pub mod journal;
pub mod manager;
pub mod phase;
pub mod pipeline;
pub mod prompts;

pub use finding::{Finding, IntakeError};
pub use journal::TriageJournal;
pub use manager::{TriageCounts, TriageManager, TriageRecord, TriageStatus};
pub use phase::{Phase, PhaseOutcome, PhaseResult, Severity};
pub use pipeline::{
    Classification, PipelineConfig, TriageOutcome, TriagePipeline, TriageSession,
};
