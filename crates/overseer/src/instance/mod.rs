//! Worker instance lifecycle: spawn, poll, wait, follow up, terminate.
//!
//! A [`Supervisor`] owns the registry of one scope. The top-level
//! orchestrator runs an unbounded supervisor; every triage pipeline runs its
//! own supervisor limited to a single worker. Workers are launched through an
//! [`InstanceRuntime`] and report progress only through files in their log
//! directory (see [`artifacts`]).

pub mod artifacts;
pub mod logs;
pub mod runtime;
pub mod supervisor;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use runtime::{InstanceProcess, InstanceRuntime, ProcessRuntime, SpawnRequest, SpawnedInstance};
pub use supervisor::{DEFAULT_POLL_INTERVAL, Supervisor};

/// Lifecycle state of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    WaitingForFollowup,
    Completed,
    Failed,
}

impl InstanceStatus {
    /// Parse the value of a status artifact. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "waiting_for_followup" => Some(Self::WaitingForFollowup),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::WaitingForFollowup => "waiting_for_followup",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a follow-up message may be delivered in this state.
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Running | Self::WaitingForFollowup)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row returned by [`Supervisor::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub status: InstanceStatus,
    pub task: String,
    pub started_at: DateTime<Utc>,
}

/// Result of [`Supervisor::wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitReport {
    /// The worker finished successfully (exit 0 or status artifact).
    Completed,
    /// The worker failed. `exit_code` is set when the process exited.
    Failed { exit_code: Option<i32> },
    /// The worker paused and wants supervisor input.
    NeedsFollowup { last_response: String },
    /// The timeout elapsed first.
    Timeout {
        waited: Duration,
        last_response: String,
    },
    /// The caller cancelled the wait. The worker keeps running.
    Cancelled,
}

impl WaitReport {
    /// Whether this report reflects a successful outcome for the action
    /// result (cancellation and failures are reported as errors).
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Cancelled)
    }

    /// Render the report as the text returned to the driving model.
    pub fn render(&self, id: &str) -> String {
        match self {
            Self::Completed => format!("Instance {id} completed"),
            Self::Failed {
                exit_code: Some(code),
            } => format!("Instance {id} failed (exit code: {code})"),
            Self::Failed { exit_code: None } => format!("Instance {id} failed"),
            Self::NeedsFollowup { last_response } => format!(
                "Instance {id} is waiting for followup. Last response: '{last_response}'. \
                 Use send_followup to continue."
            ),
            Self::Timeout {
                waited,
                last_response,
            } => format!(
                "Timeout waiting for instance {id} after {}. Last response: '{last_response}'. \
                 Use read_instance_logs to check progress or terminate_instance if stuck.",
                format_wait(*waited)
            ),
            Self::Cancelled => format!("Wait for instance {id} cancelled"),
        }
    }
}

fn format_wait(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minute(s)", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Structural errors from supervisor operations. Rendered as
/// `"Error: ..."` for the driving model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    AlreadyExists(String),
    RegistryFull { limit: usize },
    NotFound(String),
    NotAcceptingInput { id: String, status: InstanceStatus },
    Finished { id: String, status: InstanceStatus },
    Runtime(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists(id) => write!(f, "instance '{id}' already exists"),
            Self::RegistryFull { limit } => write!(
                f,
                "cannot spawn instance: maximum of {limit} instance(s) allowed in this scope"
            ),
            Self::NotFound(id) => write!(f, "instance '{id}' not found"),
            Self::NotAcceptingInput { id, status } => write!(
                f,
                "instance '{id}' is not accepting input (status: {status})"
            ),
            Self::Finished { id, status } => {
                write!(f, "instance '{id}' is not running (status: {status})")
            }
            Self::Runtime(e) => write!(f, "runtime error: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_artifact_strings() {
        for status in [
            InstanceStatus::Starting,
            InstanceStatus::Running,
            InstanceStatus::WaitingForFollowup,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
        }
        assert_eq!(InstanceStatus::parse("booting"), None);
    }

    #[test]
    fn only_running_states_accept_input() {
        assert!(InstanceStatus::Running.accepts_input());
        assert!(InstanceStatus::WaitingForFollowup.accepts_input());
        assert!(!InstanceStatus::Starting.accepts_input());
        assert!(!InstanceStatus::Completed.accepts_input());
    }

    #[test]
    fn timeout_report_mentions_minutes() {
        let report = WaitReport::Timeout {
            waited: Duration::from_secs(300),
            last_response: "No response available".into(),
        };
        let text = report.render("w1");
        assert!(text.contains("after 5 minute(s)"));
        assert!(text.contains("'No response available'"));
    }

    #[test]
    fn errors_render_for_the_model() {
        let err = SupervisorError::RegistryFull { limit: 1 };
        assert!(err.to_string().contains("maximum of 1 instance(s)"));
        let err = SupervisorError::NotAcceptingInput {
            id: "w1".into(),
            status: InstanceStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "instance 'w1' is not accepting input (status: completed)"
        );
    }
}
