//! Submitted finding reports and their intake validation.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A finding report as submitted by the orchestrator's driving model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    /// Short descriptive title.
    pub title: String,
    /// Affected asset (URL, host, service).
    pub asset: String,
    /// Vulnerability class (e.g. 'SQL injection').
    pub vuln_type: String,
    /// Severity as assessed by the reporter.
    pub severity: String,
    /// Detailed description of the issue.
    pub description: String,
    /// Step-by-step reproduction instructions.
    pub repro_steps: String,
    /// Impact if exploited.
    pub impact: String,
    /// Cleanup performed or required after testing.
    pub cleanup: String,
}

/// Why a submission was refused before any side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// Listed fields are absent, not strings, or blank.
    MissingFields(Vec<String>),
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields(fields) => write!(
                f,
                "finding is missing required field(s): {}",
                fields.join(", ")
            ),
        }
    }
}

impl std::error::Error for IntakeError {}

impl Finding {
    pub const FIELDS: [&'static str; 8] = [
        "title",
        "asset",
        "vuln_type",
        "severity",
        "description",
        "repro_steps",
        "impact",
        "cleanup",
    ];

    /// Build from a raw argument object, listing every missing or blank
    /// field at once.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, IntakeError> {
        let missing: Vec<String> = Self::FIELDS
            .iter()
            .filter(|f| {
                value
                    .get(**f)
                    .and_then(|v| v.as_str())
                    .is_none_or(|s| s.trim().is_empty())
            })
            .map(|f| f.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(IntakeError::MissingFields(missing));
        }
        serde_json::from_value(value.clone())
            .map_err(|_| IntakeError::MissingFields(Self::FIELDS.map(String::from).to_vec()))
    }

    /// One-line summary used for duplicate awareness.
    pub fn summary_line(&self) -> String {
        format!(
            "{} [{}] on {} ({})",
            self.title, self.vuln_type, self.asset, self.severity
        )
    }

    /// Multi-line rendering embedded in prompts and feedback artifacts.
    pub fn render(&self) -> String {
        format!(
            "Title: {}\nAsset: {}\nType: {}\nReported severity: {}\n\n\
             Description:\n{}\n\nReproduction Steps:\n{}\n\nImpact:\n{}\n\nCleanup:\n{}",
            self.title,
            self.asset,
            self.vuln_type,
            self.severity,
            self.description,
            self.repro_steps,
            self.impact,
            self.cleanup
        )
    }
}
