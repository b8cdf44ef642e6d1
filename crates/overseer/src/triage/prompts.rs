//! Prompt text for the triage pipeline.

use super::finding::Finding;
use super::phase::{ReviewArgs, ValidationArgs};

pub fn system_prompt() -> String {
    "You are a security triage analyst. You receive one finding report and move it \
     through three phases in order:\n\
     1. Initial Review: check the report is in scope, complete and plausible. \
     Finish with finished_phase_1.\n\
     2. Validation & Reproduction: reproduce the issue with evidence. You may spawn \
     one worker instance, run short shell commands, create test files and log \
     findings. Finish with finished_phase_2.\n\
     3. Severity Assessment: score the reproduced issue with CVSS v3.1. Finish with \
     finished_phase_3.\n\n\
     Only the completion action of the current phase is accepted. Phases cannot be \
     skipped or revisited. Be skeptical: reject reports that lack evidence, target \
     out-of-scope assets, or describe expected behavior."
        .to_string()
}

/// Phase 1 prompt. `prior` lists findings already submitted this session.
pub fn review_prompt(finding: &Finding, scope: &str, prior: &str) -> String {
    let scope = if scope.trim().is_empty() {
        "No scope restrictions were provided."
    } else {
        scope
    };
    let prior = if prior.trim().is_empty() {
        "None."
    } else {
        prior
    };
    format!(
        "# Phase 1: Initial Review\n\n\
         ## Finding\n{}\n\n\
         ## Engagement scope\n{scope}\n\n\
         ## Previously submitted findings\n{prior}\n\n\
         Decide whether this report should proceed to validation. Reject it if the \
         asset is out of scope, the report is incomplete, the issue is not a security \
         problem, or it duplicates a previous finding. Call finished_phase_1 with \
         PROCEED or REJECT and your reasoning.",
        finding.render()
    )
}

pub fn validation_prompt(finding: &Finding, review: &ReviewArgs) -> String {
    format!(
        "# Phase 2: Validation & Reproduction\n\n\
         ## Finding\n{}\n\n\
         ## Phase 1 reasoning\n{}\n{}\n\
         Reproduce the issue. Use exec_command for quick checks, create_test_file for \
         proof-of-concept files, and spawn_instance for multi-step work (one instance \
         at a time). Record observations with log_finding. Call finished_phase_2 with \
         REPRODUCED or NOT_REPRODUCED, the evidence, and feedback for the reporter when \
         reproduction fails.",
        finding.render(),
        review.reasoning,
        review
            .notes
            .as_deref()
            .map(|n| format!("\nNotes: {n}\n"))
            .unwrap_or_default()
    )
}

pub fn severity_prompt(finding: &Finding, validation: &ValidationArgs) -> String {
    format!(
        "# Phase 3: Severity Assessment\n\n\
         ## Finding\n{}\n\n\
         ## Reproduction evidence\n{}\n{}\n\
         Score the issue with CVSS v3.1 based on what was actually reproduced, not on \
         the reporter's claims. Call finished_phase_3 with the severity (Critical, High, \
         Medium or Low), the numeric score, the vector string, your reasoning and how it \
         compares to the reported severity ({}).",
        finding.render(),
        validation.evidence,
        validation
            .additional_findings
            .as_deref()
            .map(|a| format!("\n## Additional findings\n{a}\n"))
            .unwrap_or_default(),
        finding.severity
    )
}
