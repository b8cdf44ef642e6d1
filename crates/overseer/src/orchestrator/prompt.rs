//! Prompt text for the orchestrator conversation.

use crate::config::SubmissionMode;

pub fn system_prompt(mode: SubmissionMode, finish_on_submit: bool) -> String {
    let mut prompt = String::from(
        "You are the supervisor of a swarm of autonomous security testing workers. \
         You do not test targets yourself. You plan the engagement, spawn workers with \
         focused tasks, wait for them, answer their questions with send_followup, and \
         decide what to do next based on their results.\n\n\
         Working rules:\n\
         - Give every worker a unique instance_id and a self-contained task.\n\
         - After spawning or following up, call wait_for_instance. When it reports that \
         the worker is waiting for followup, read its last response and reply.\n\
         - Use read_instance_logs for detail and terminate_instance for stuck workers.\n\
         - Record durable facts with write_note; your conversation is periodically \
         summarized and details may be lost. read_notes returns everything recorded.\n\
         - Submit a finding with submit_finding only once a worker has confirmed it \
         with reproducible evidence. Every field is required.\n",
    );
    match mode {
        SubmissionMode::Triage => prompt.push_str(
            "- Submitted findings are reviewed and reproduced independently. Rejections \
             and reproduction failures come back to you as feedback messages.\n",
        ),
        SubmissionMode::Direct => prompt.push_str(
            "- Submitted findings are delivered as-is, so make them complete and accurate.\n",
        ),
    }
    if finish_on_submit {
        prompt.push_str("- The session ends after your first submission.\n");
    }
    prompt.push_str("- Call finished when the objective is met or no progress is possible.");
    prompt
}

/// The initial user directive.
pub fn directive(objective: &str, scope: &str) -> String {
    if scope.trim().is_empty() {
        format!("# Objective\n{objective}")
    } else {
        format!("# Objective\n{objective}\n\n# Scope\n{scope}")
    }
}

/// User message relaying a triage feedback artifact.
pub fn feedback_relay(triage_id: &str, feedback: &str) -> String {
    format!("Feedback from triage {triage_id}:\n\n{feedback}")
}
