//! Phase completion arguments and recorded results.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The three triage phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Review,
    Validation,
    Severity,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Self::Review => 1,
            Self::Validation => 2,
            Self::Severity => 3,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Review => "Initial Review",
            Self::Validation => "Validation & Reproduction",
            Self::Severity => "Severity Assessment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase {} ({})", self.number(), self.title())
    }
}

// ── Phase 1 ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Proceed,
    Reject,
}

/// Arguments of `finished_phase_1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewArgs {
    /// Decision to proceed to validation or reject the report.
    pub decision: ReviewDecision,
    /// Detailed explanation of the decision.
    pub reasoning: String,
    /// Additional observations or concerns.
    #[serde(default)]
    pub notes: Option<String>,
}

// ── Phase 2 ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationDecision {
    Reproduced,
    NotReproduced,
}

/// Arguments of `finished_phase_2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationArgs {
    /// Whether the issue was successfully reproduced.
    pub decision: ValidationDecision,
    /// Evidence and documentation of the reproduction attempt.
    pub evidence: String,
    /// Extra impact or variations discovered beyond the original report.
    #[serde(default)]
    pub additional_findings: Option<String>,
    /// Specific feedback for the original reporter.
    #[serde(default)]
    pub feedback: Option<String>,
}

// ── Phase 3 ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        })
    }
}

/// Arguments of `finished_phase_3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SeverityArgs {
    /// Final severity classification.
    pub severity: Severity,
    /// CVSS v3.1 numeric score (0.0-10.0).
    #[schemars(range(min = 0.0, max = 10.0))]
    pub score: f64,
    /// Full CVSS vector string (e.g. AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H).
    #[serde(default)]
    pub vector: Option<String>,
    /// Detailed explanation of the severity assessment.
    pub reasoning: String,
    /// How this differs from the originally reported severity.
    #[serde(default)]
    pub comparison: Option<String>,
}

// ── Recorded results ───────────────────────────────────────────────

/// The payload of one completed phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhaseOutcome {
    Review(ReviewArgs),
    Validation(ValidationArgs),
    Severity(SeverityArgs),
}

impl PhaseOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Review(_) => Phase::Review,
            Self::Validation(_) => Phase::Validation,
            Self::Severity(_) => Phase::Severity,
        }
    }

    /// Decision label as written to the phase completion journal.
    pub fn decision_label(&self) -> String {
        match self {
            Self::Review(r) => match r.decision {
                ReviewDecision::Proceed => "PROCEED".into(),
                ReviewDecision::Reject => "REJECT".into(),
            },
            Self::Validation(v) => match v.decision {
                ValidationDecision::Reproduced => "REPRODUCED".into(),
                ValidationDecision::NotReproduced => "NOT_REPRODUCED".into(),
            },
            Self::Severity(s) => s.severity.to_string(),
        }
    }

    /// The free-text detail recorded alongside the decision.
    pub fn details(&self) -> &str {
        match self {
            Self::Review(r) => &r.reasoning,
            Self::Validation(v) => &v.evidence,
            Self::Severity(s) => &s.reasoning,
        }
    }
}

/// A completed phase with its completion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseResult {
    pub outcome: PhaseOutcome,
    pub completed_at: DateTime<Utc>,
}

impl PhaseResult {
    pub fn now(outcome: PhaseOutcome) -> Self {
        Self {
            outcome,
            completed_at: Utc::now(),
        }
    }
}
