//! Session configuration.
//!
//! [`OverseerConfig`] holds every tunable of a session. The CLI maps its
//! flags onto it; tests build one with [`Default`] and the `with_*` methods:
//!
//! ```
//! use overseer::config::{OverseerConfig, SubmissionMode};
//!
//! let config = OverseerConfig::new("/tmp/session")
//!     .with_mode(SubmissionMode::Direct)
//!     .with_finish_on_submit(true)
//!     .with_max_rounds(20);
//! assert_eq!(config.notes_dir(), std::path::PathBuf::from("/tmp/session/supervisor_notes"));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::{ContextBudget, SummarizerConfig};
use crate::instance::DEFAULT_POLL_INTERVAL;
use crate::triage::PipelineConfig;

/// Where submitted findings go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionMode {
    /// Through the 3-phase triage pipeline.
    #[default]
    Triage,
    /// Straight to delivery, skipping triage.
    Direct,
}

/// Configuration of one orchestrator session.
#[derive(Debug, Clone, PartialEq)]
pub struct OverseerConfig {
    /// Model driving the orchestrator. Default: [`DEFAULT_MODEL`](crate::DEFAULT_MODEL).
    pub model: String,
    /// Model used for compaction summaries. Default: [`DEFAULT_SUMMARY_MODEL`](crate::DEFAULT_SUMMARY_MODEL).
    pub summary_model: String,
    /// Model picking each top-level worker's specialist profile. `None`
    /// spawns every worker under the default profile.
    pub router_model: Option<String>,
    /// Maximum tokens per completion. Default: `10000`.
    pub max_tokens: u32,
    /// Context window ceiling in tokens. Default: `200000`.
    pub context_window: usize,
    /// Tokens kept free below the ceiling. Default: `15000`.
    pub reserve_tokens: usize,
    /// Messages kept verbatim by compaction. Default: `20`.
    pub preserve_recent: usize,
    /// Upper bound on orchestrator rounds. Default: `500`.
    pub max_rounds: usize,
    /// Consecutive completion failures tolerated before the run ends. Default: `5`.
    pub max_consecutive_failures: usize,
    /// Delay before retrying a failed completion. Default: 5 s.
    pub retry_delay: Duration,
    /// Interval between worker status checks. Default: 2 s.
    pub poll_interval: Duration,
    /// Run-time budget of top-level workers. Default: 60 min.
    pub spawn_duration: Duration,
    /// Default `wait_for_instance` timeout. Default: 5 min.
    pub wait_timeout: Duration,
    /// Worker executable. Default: `"./target/release/codex"`.
    pub worker_binary: PathBuf,
    /// Root of every artifact this session writes.
    pub session_dir: PathBuf,
    pub mode: SubmissionMode,
    /// End the session after the first accepted submission.
    pub finish_on_submit: bool,
    /// Engagement scope text handed to workers and triage.
    pub scope: String,
    /// Optional webhook receiving delivered findings.
    pub webhook_url: Option<String>,
    pub triage: PipelineConfig,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            summary_model: crate::DEFAULT_SUMMARY_MODEL.to_string(),
            router_model: None,
            max_tokens: 10_000,
            context_window: crate::context::budget::DEFAULT_CONTEXT_WINDOW,
            reserve_tokens: crate::context::budget::DEFAULT_RESERVE_TOKENS,
            preserve_recent: crate::context::compaction::DEFAULT_PRESERVE_RECENT,
            max_rounds: 500,
            max_consecutive_failures: 5,
            retry_delay: Duration::from_secs(5),
            poll_interval: DEFAULT_POLL_INTERVAL,
            spawn_duration: Duration::from_secs(60 * 60),
            wait_timeout: Duration::from_secs(5 * 60),
            worker_binary: PathBuf::from("./target/release/codex"),
            session_dir: PathBuf::from("sessions/default"),
            mode: SubmissionMode::Triage,
            finish_on_submit: false,
            scope: String::new(),
            webhook_url: None,
            triage: PipelineConfig::default(),
        }
    }
}

impl OverseerConfig {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            ..Self::default()
        }
    }

    /// Set the driving model for both the orchestrator and triage.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.triage.model = model.clone();
        self.model = model;
        self
    }

    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = model.into();
        self
    }

    pub fn with_router_model(mut self, model: Option<String>) -> Self {
        self.router_model = model;
        self
    }

    pub fn with_context_window(mut self, max_tokens: usize, reserve_tokens: usize) -> Self {
        self.context_window = max_tokens;
        self.reserve_tokens = reserve_tokens;
        self
    }

    pub fn with_preserve_recent(mut self, n: usize) -> Self {
        self.preserve_recent = n;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_retry(mut self, max_consecutive_failures: usize, delay: Duration) -> Self {
        self.max_consecutive_failures = max_consecutive_failures;
        self.retry_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = path.into();
        self
    }

    pub fn with_mode(mut self, mode: SubmissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_finish_on_submit(mut self, finish: bool) -> Self {
        self.finish_on_submit = finish;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }

    pub fn with_triage(mut self, triage: PipelineConfig) -> Self {
        self.triage = triage;
        self
    }

    pub fn context_budget(&self) -> ContextBudget {
        ContextBudget::default()
            .with_max_tokens(self.context_window)
            .with_reserve_tokens(self.reserve_tokens)
    }

    pub fn summarizer_config(&self) -> SummarizerConfig {
        SummarizerConfig {
            model: self.summary_model.clone(),
            ..SummarizerConfig::default()
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Log directories of top-level workers.
    pub fn instances_dir(&self) -> PathBuf {
        self.session_dir.join("instances")
    }

    /// Working directories of top-level workers.
    pub fn workspaces_dir(&self) -> PathBuf {
        self.session_dir.join("workspaces")
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.session_dir.join("supervisor_notes")
    }

    pub fn log_file(&self) -> PathBuf {
        self.session_dir.join("overseer.log")
    }
}
