//! Files a triage pipeline writes into its workspace.
//!
//! | File | Mode | Content |
//! |------|------|---------|
//! | `triage_conversation.log` | append | assistant text and tool calls per round |
//! | `conversation_history.json` | replace | full conversation after each round |
//! | `triage_findings.log` | append | `log_finding` entries and shell activity |
//! | `phase_completions.jsonl` | append | one JSON line per completed phase |
//! | `supervisor_feedback.txt` | create | feedback for the submitter on REJECT / NOT_REPRODUCED |

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::finding::Finding;
use super::phase::PhaseResult;
use crate::Message;
use crate::fsio::{append_text, write_text};

pub const CONVERSATION_LOG_FILE: &str = "triage_conversation.log";
pub const HISTORY_FILE: &str = "conversation_history.json";
pub const FINDINGS_LOG_FILE: &str = "triage_findings.log";
pub const PHASE_COMPLETIONS_FILE: &str = "phase_completions.jsonl";
pub const FEEDBACK_FILE: &str = "supervisor_feedback.txt";

/// Details longer than this are truncated in the completion journal.
const MAX_DETAIL_CHARS: usize = 500;

#[derive(Serialize)]
struct HistorySnapshot<'a> {
    triager_id: &'a str,
    vulnerability_title: &'a str,
    updated_at: String,
    messages: &'a [Message],
}

#[derive(Serialize)]
struct CompletionEntry {
    phase: u8,
    decision: String,
    details: String,
    completed_at: String,
}

/// Writer for one triage workspace.
#[derive(Debug, Clone)]
pub struct TriageJournal {
    dir: PathBuf,
    triage_id: String,
    title: String,
}

fn stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

impl TriageJournal {
    pub fn new(dir: impl Into<PathBuf>, triage_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            triage_id: triage_id.into(),
            title: title.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.dir.join(FEEDBACK_FILE)
    }

    /// Append the assistant's text and tool calls for one round.
    pub async fn log_round(&self, assistant: &Message) -> Result<(), String> {
        let ts = stamp();
        let mut entry = format!("[{ts}] ASSISTANT: {}\n", assistant.text());
        for call in assistant.calls() {
            entry.push_str(&format!(
                "[{ts}] TOOL_CALL: {}({})\n",
                call.function.name, call.function.arguments
            ));
        }
        entry.push_str("---\n");
        append_text(&self.dir.join(CONVERSATION_LOG_FILE), &entry).await
    }

    /// Replace the saved conversation snapshot.
    pub async fn save_history(&self, messages: &[Message]) -> Result<(), String> {
        let snapshot = HistorySnapshot {
            triager_id: &self.triage_id,
            vulnerability_title: &self.title,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            messages,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| format!("failed to serialize history: {e}"))?;
        write_text(&self.dir.join(HISTORY_FILE), &json).await
    }

    /// Append one observation to the findings log.
    pub async fn log_finding(&self, phase: &str, finding: &str, evidence: Option<&str>) -> Result<(), String> {
        let mut entry = format!(
            "[{}] Phase {phase}: {finding}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        if let Some(evidence) = evidence.filter(|e| !e.is_empty()) {
            entry.push_str(&format!("Evidence: {evidence}\n"));
        }
        entry.push_str("---\n");
        append_text(&self.dir.join(FINDINGS_LOG_FILE), &entry).await
    }

    /// Append a phase completion record.
    pub async fn log_completion(&self, result: &PhaseResult) -> Result<(), String> {
        let entry = CompletionEntry {
            phase: result.outcome.phase().number(),
            decision: result.outcome.decision_label(),
            details: clip(result.outcome.details(), MAX_DETAIL_CHARS),
            completed_at: result
                .completed_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| format!("failed to serialize completion: {e}"))?;
        line.push('\n');
        append_text(&self.dir.join(PHASE_COMPLETIONS_FILE), &line).await
    }

    /// Feedback artifact for a report rejected in phase 1.
    pub async fn write_rejection(&self, finding: &Finding, reasoning: &str) -> Result<(), String> {
        let text = format!(
            "Triage Update: Report Rejected\n\n\
             Report: {}\n\
             Triage ID: {}\n\
             Phase 1 Result: REJECTED\n\n\
             Rejection Reason: {reasoning}\n\n\
             The report was rejected during initial review.\n\n\
             Original Report:\n{}\n\n\
             Please review and address the issues before resubmitting.\n",
            finding.title,
            self.triage_id,
            finding.render()
        );
        write_text(&self.feedback_path(), &text).await
    }

    /// Feedback artifact for a report that could not be reproduced.
    pub async fn write_not_reproduced(&self, finding: &Finding, feedback: Option<&str>) -> Result<(), String> {
        let feedback = feedback
            .filter(|f| !f.trim().is_empty())
            .unwrap_or("Unable to reproduce - no specific feedback provided");
        let text = format!(
            "Triage Update: Unable to Reproduce\n\n\
             Report: {}\n\
             Triage ID: {}\n\
             Phase 2 Result: NOT_REPRODUCED\n\n\
             Triage Feedback: {feedback}\n\n\
             The triage team was unable to reproduce the reported issue after thorough testing.\n\n\
             Original Report:\n{}\n\n\
             Please revisit this report. You may resubmit after resolving the issues.\n",
            finding.title,
            self.triage_id,
            finding.render()
        );
        write_text(&self.feedback_path(), &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::triage::phase::{PhaseOutcome, ReviewArgs, ReviewDecision};

    fn finding() -> Finding {
        Finding {
            title: "Open redirect".into(),
            asset: "https://login.example".into(),
            vuln_type: "redirect".into(),
            severity: "Low".into(),
            description: "next= is not validated".into(),
            repro_steps: "visit /login?next=//evil".into(),
            impact: "phishing".into(),
            cleanup: "none".into(),
        }
    }

    #[tokio::test]
    async fn round_log_lists_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TriageJournal::new(dir.path(), "ab12cd34", "Open redirect");
        let msg = Message::assistant(
            Some("checking".into()),
            vec![ToolCall::new("c1", "exec_command", r#"{"command":"curl x"}"#)],
        );
        journal.log_round(&msg).await.unwrap();
        journal.log_round(&Message::assistant_text("done")).await.unwrap();

        let log = std::fs::read_to_string(dir.path().join(CONVERSATION_LOG_FILE)).unwrap();
        assert!(log.contains("ASSISTANT: checking\n"));
        assert!(log.contains(r#"TOOL_CALL: exec_command({"command":"curl x"})"#));
        assert_eq!(log.matches("---\n").count(), 2);
    }

    #[tokio::test]
    async fn history_snapshot_has_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TriageJournal::new(dir.path(), "ab12cd34", "Open redirect");
        journal
            .save_history(&[Message::system("sys"), Message::user("go")])
            .await
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join(HISTORY_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["triager_id"], "ab12cd34");
        assert_eq!(value["vulnerability_title"], "Open redirect");
        assert_eq!(value["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completion_details_are_clipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TriageJournal::new(dir.path(), "t", "x");
        let result = PhaseResult::now(PhaseOutcome::Review(ReviewArgs {
            decision: ReviewDecision::Proceed,
            reasoning: "r".repeat(600),
            notes: None,
        }));
        journal.log_completion(&result).await.unwrap();
        let raw = std::fs::read_to_string(dir.path().join(PHASE_COMPLETIONS_FILE)).unwrap();
        let entry: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(entry["phase"], 1);
        assert_eq!(entry["decision"], "PROCEED");
        assert_eq!(entry["details"].as_str().unwrap().len(), 503);
    }

    #[tokio::test]
    async fn findings_log_includes_evidence_when_given() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TriageJournal::new(dir.path(), "t", "x");
        journal.log_finding("2", "redirect works", Some("302 to //evil")).await.unwrap();
        journal.log_finding("2", "no evidence", None).await.unwrap();
        let log = std::fs::read_to_string(dir.path().join(FINDINGS_LOG_FILE)).unwrap();
        assert!(log.contains("Phase 2: redirect works\nEvidence: 302 to //evil\n---\n"));
        assert!(log.contains("Phase 2: no evidence\n---\n"));
    }

    #[tokio::test]
    async fn feedback_artifacts_name_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TriageJournal::new(dir.path(), "ab12cd34", "Open redirect");
        journal.write_rejection(&finding(), "out of scope").await.unwrap();
        let text = std::fs::read_to_string(journal.feedback_path()).unwrap();
        assert!(text.contains("Phase 1 Result: REJECTED"));
        assert!(text.contains("Rejection Reason: out of scope"));
        assert!(text.contains("Triage ID: ab12cd34"));
        assert!(text.contains("next= is not validated"));

        journal.write_not_reproduced(&finding(), None).await.unwrap();
        let text = std::fs::read_to_string(journal.feedback_path()).unwrap();
        assert!(text.contains("Phase 2 Result: NOT_REPRODUCED"));
        assert!(text.contains("no specific feedback provided"));
    }
}
