//! The 3-phase triage state machine.
//!
//! A [`TriagePipeline`] drives one finding through review, reproduction and
//! severity classification. Each round it compacts the conversation when
//! over budget, asks the completion service for the next step, and
//! dispatches the returned actions against its own single-worker
//! [`Supervisor`]. Only the completion action of the current phase is
//! accepted; the phase advances once the round that completed it ends.
//! Calls that follow a terminal decision in the same response are refused.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::finding::Finding;
use super::journal::TriageJournal;
use super::phase::{
    Phase, PhaseOutcome, PhaseResult, ReviewArgs, ReviewDecision, SeverityArgs, Severity,
    ValidationArgs, ValidationDecision,
};
use super::prompts;
use crate::context::ContextWindow;
use crate::instance::Supervisor;
use crate::tools::actions::TriageAction;
use crate::tools::core::{ActionOutput, log_action_call, truncate_result};
use crate::tools::lifecycle::{self, LifecycleDefaults, WorkspacePlacement};
use crate::tools::{names, shell};
use crate::{ChatRequest, CompletionService, Message, ToolCall, ToolDef};

/// Default bound on model rounds spent in one phase.
pub const DEFAULT_MAX_ROUNDS_PER_PHASE: usize = 40;

/// Tunables of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_rounds_per_phase: usize,
    pub spawn_duration: Duration,
    pub wait_timeout: Duration,
    pub exec_timeout: Duration,
    pub max_result_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            max_tokens: 10_000,
            max_rounds_per_phase: DEFAULT_MAX_ROUNDS_PER_PHASE,
            spawn_duration: Duration::from_secs(30 * 60),
            wait_timeout: Duration::from_secs(5 * 60),
            exec_timeout: shell::EXEC_TIMEOUT,
            max_result_chars: crate::tools::DEFAULT_MAX_RESULT_CHARS,
        }
    }
}

/// A reproduced and scored finding, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub finding: Finding,
    pub severity: Severity,
    pub score: f64,
    pub vector: Option<String>,
    pub reasoning: String,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TriageOutcome {
    Rejected { reasoning: String },
    NotReproduced { feedback: Option<String> },
    Completed(Classification),
    Error(String),
}

impl TriageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "REJECTED",
            Self::NotReproduced { .. } => "NOT_REPRODUCED",
            Self::Completed(_) => "COMPLETED",
            Self::Error(_) => "ERROR",
        }
    }
}

/// The state of one finding's triage.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageSession {
    pub finding: Finding,
    pub phase: Phase,
    pub results: Vec<PhaseResult>,
    pub outcome: Option<TriageOutcome>,
}

impl TriageSession {
    fn new(finding: Finding) -> Self {
        Self {
            finding,
            phase: Phase::Review,
            results: Vec::new(),
            outcome: None,
        }
    }
}

/// What a round's completion action asks for.
enum Transition {
    Advance { next: Phase, prompt: String },
    Conclude(TriageOutcome),
}

/// Drives one finding through the three phases.
pub struct TriagePipeline {
    id: String,
    client: Arc<dyn CompletionService>,
    window: ContextWindow,
    supervisor: Supervisor,
    journal: TriageJournal,
    config: PipelineConfig,
    defaults: LifecycleDefaults,
    defs: Vec<ToolDef>,
    session: TriageSession,
    messages: Vec<Message>,
    cancel: CancellationToken,
}

impl TriagePipeline {
    /// Build a pipeline whose initial conversation holds the system prompt
    /// and the phase 1 prompt.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        finding: Finding,
        scope: &str,
        prior_findings: &str,
        client: Arc<dyn CompletionService>,
        window: ContextWindow,
        supervisor: Supervisor,
        journal: TriageJournal,
        config: PipelineConfig,
    ) -> Self {
        let messages = vec![
            Message::system(prompts::system_prompt()),
            Message::user(prompts::review_prompt(&finding, scope, prior_findings)),
        ];
        let defaults = LifecycleDefaults {
            spawn_duration: config.spawn_duration,
            wait_timeout: config.wait_timeout,
            placement: WorkspacePlacement::Shared(journal.dir().to_path_buf()),
        };
        Self {
            id: id.into(),
            client,
            window,
            supervisor,
            journal,
            config,
            defaults,
            defs: TriageAction::definitions(),
            session: TriageSession::new(finding),
            messages,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight waits when this token fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session(&self) -> &TriageSession {
        &self.session
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Run to a terminal outcome. The nested worker is always stopped.
    pub async fn run(mut self) -> TriageSession {
        let outcome = self.drive().await;
        self.supervisor.shutdown().await;
        info!("[triage:{}] Finished: {}", self.id, outcome.label());
        self.session.outcome = Some(outcome);
        self.session
    }

    async fn drive(&mut self) -> TriageOutcome {
        let mut rounds_in_phase = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return TriageOutcome::Error("triage cancelled".to_string());
            }
            if rounds_in_phase >= self.config.max_rounds_per_phase {
                return TriageOutcome::Error(format!(
                    "phase {} did not resolve within {} rounds",
                    self.session.phase.number(),
                    self.config.max_rounds_per_phase
                ));
            }
            rounds_in_phase += 1;

            let messages = std::mem::take(&mut self.messages);
            self.messages = self.window.maybe_compact(messages).await;

            let request = ChatRequest {
                model: Some(self.config.model.clone()),
                messages: self.messages.clone(),
                max_tokens: self.config.max_tokens,
                tools: Some(self.defs.clone()),
                tool_choice: Some("auto".to_string()),
                ..Default::default()
            };
            let completion = match self.client.chat(&request).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("[triage:{}] Completion failed: {e}", self.id);
                    return TriageOutcome::Error(format!("completion failed: {e}"));
                }
            };

            let assistant = completion.into_message();
            self.messages.push(assistant.clone());

            let mut transition = None;
            for call in assistant.calls() {
                // Nothing runs once the triage has reached a terminal decision.
                let output = if matches!(transition, Some(Transition::Conclude(_))) {
                    debug!(
                        "[triage:{}] Skipping {} after terminal decision",
                        self.id, call.function.name
                    );
                    ActionOutput::err(format!(
                        "{} not executed: triage already concluded in this response",
                        call.function.name
                    ))
                } else {
                    self.dispatch(call, &mut transition).await
                };
                let text = truncate_result(output.render(), self.config.max_result_chars);
                self.messages.push(Message::tool_result(&call.id, text));
            }
            if assistant.calls().is_empty() {
                let phase = self.session.phase;
                self.messages.push(Message::user(format!(
                    "Continue {phase}. Use the available actions and finish the phase with {}.",
                    completion_action(phase)
                )));
            }

            if let Err(e) = self.journal.log_round(&assistant).await {
                warn!("[triage:{}] Conversation log write failed: {e}", self.id);
            }
            if let Err(e) = self.journal.save_history(&self.messages).await {
                warn!("[triage:{}] History save failed: {e}", self.id);
            }

            match transition {
                Some(Transition::Conclude(outcome)) => return outcome,
                Some(Transition::Advance { next, prompt }) => {
                    info!("[triage:{}] Entering {next}", self.id);
                    self.session.phase = next;
                    self.messages.push(Message::user(prompt));
                    rounds_in_phase = 0;
                }
                None => {}
            }
        }
    }

    async fn dispatch(&mut self, call: &ToolCall, transition: &mut Option<Transition>) -> ActionOutput {
        let name = call.function.name.as_str();
        let scope = format!("triage:{}", self.id);
        log_action_call(&scope, name, &call.function.arguments);

        let action = match TriageAction::parse(&self.defs, name, &call.function.arguments) {
            Ok(a) => a,
            Err(e) => return ActionOutput::err(e),
        };

        match action {
            TriageAction::Lifecycle(action) => {
                lifecycle::execute(&mut self.supervisor, action, &self.defaults, &self.cancel).await
            }
            TriageAction::ExecCommand(args) => {
                match shell::exec_command(self.journal.dir(), &args.command, self.config.exec_timeout)
                    .await
                {
                    Ok(result) => {
                        note(
                            &self.journal,
                            &self.id,
                            self.session.phase,
                            &format!("Executed command: {}", args.command),
                            Some(&result),
                        )
                        .await;
                        ActionOutput::ok(result)
                    }
                    Err(e) => ActionOutput::err(e),
                }
            }
            TriageAction::CreateTestFile(args) => {
                match shell::create_test_file(self.journal.dir(), &args.filename, &args.content)
                    .await
                {
                    Ok(path) => {
                        let detail = format!(
                            "Description: {}\nPath: {}\nSize: {} bytes",
                            args.description,
                            path.display(),
                            args.content.len()
                        );
                        note(
                            &self.journal,
                            &self.id,
                            self.session.phase,
                            &format!("Created test file: {}", args.filename),
                            Some(&detail),
                        )
                        .await;
                        ActionOutput::ok(format!("Created test file: {}\n{detail}", args.filename))
                    }
                    Err(e) => ActionOutput::err(e),
                }
            }
            TriageAction::LogFinding(args) => {
                match self
                    .journal
                    .log_finding(&args.phase, &args.finding, args.evidence.as_deref())
                    .await
                {
                    Ok(()) => ActionOutput::ok(format!("Logged finding for Phase {}", args.phase)),
                    Err(e) => ActionOutput::err(e),
                }
            }
            TriageAction::FinishedPhase1(args) => {
                self.complete(Phase::Review, name, transition, |p| p.review(args))
                    .await
            }
            TriageAction::FinishedPhase2(args) => {
                self.complete(Phase::Validation, name, transition, |p| p.validation(args))
                    .await
            }
            TriageAction::FinishedPhase3(args) => {
                self.complete(Phase::Severity, name, transition, |p| p.severity(args))
                    .await
            }
        }
    }

    /// Accept a phase completion if it is for the current phase and no other
    /// completion was accepted this round.
    async fn complete(
        &mut self,
        phase: Phase,
        name: &str,
        transition: &mut Option<Transition>,
        build: impl FnOnce(&Self) -> Result<(PhaseOutcome, Transition, String), String>,
    ) -> ActionOutput {
        if transition.is_some() {
            return ActionOutput::err(format!(
                "{name} rejected: a phase was already completed in this response"
            ));
        }
        if phase != self.session.phase {
            return ActionOutput::err(format!(
                "{name} is not accepted during {}. Finish the current phase with {}",
                self.session.phase,
                completion_action(self.session.phase)
            ));
        }

        let (outcome, next, message) = match build(&*self) {
            Ok(parts) => parts,
            Err(e) => return ActionOutput::err(e),
        };
        let result = PhaseResult::now(outcome);
        if let Err(e) = self.journal.log_completion(&result).await {
            warn!("[triage:{}] Completion journal write failed: {e}", self.id);
        }
        info!(
            "[triage:{}] {phase} completed: {}",
            self.id,
            result.outcome.decision_label()
        );
        self.session.results.push(result);

        if let Transition::Conclude(ref outcome) = next {
            write_feedback(&self.journal, &self.id, &self.session.finding, outcome).await;
        }
        *transition = Some(next);
        ActionOutput::ok(message)
    }

    fn review(&self, args: ReviewArgs) -> Result<(PhaseOutcome, Transition, String), String> {
        let transition = match args.decision {
            ReviewDecision::Proceed => Transition::Advance {
                next: Phase::Validation,
                prompt: prompts::validation_prompt(&self.session.finding, &args),
            },
            ReviewDecision::Reject => Transition::Conclude(TriageOutcome::Rejected {
                reasoning: args.reasoning.clone(),
            }),
        };
        let message = match args.decision {
            ReviewDecision::Proceed => {
                "Phase 1 completed: PROCEED\n\nProceeding to Phase 2: Validation & Reproduction"
            }
            ReviewDecision::Reject => {
                "Phase 1 completed: REJECT\n\nTriage process terminated. Report rejected."
            }
        };
        Ok((PhaseOutcome::Review(args), transition, message.to_string()))
    }

    fn validation(&self, args: ValidationArgs) -> Result<(PhaseOutcome, Transition, String), String> {
        let transition = match args.decision {
            ValidationDecision::Reproduced => Transition::Advance {
                next: Phase::Severity,
                prompt: prompts::severity_prompt(&self.session.finding, &args),
            },
            ValidationDecision::NotReproduced => {
                Transition::Conclude(TriageOutcome::NotReproduced {
                    feedback: args.feedback.clone(),
                })
            }
        };
        let message = match args.decision {
            ValidationDecision::Reproduced => {
                "Phase 2 completed: REPRODUCED\n\nProceeding to Phase 3: Severity Assessment"
            }
            ValidationDecision::NotReproduced => {
                "Phase 2 completed: NOT_REPRODUCED\n\nTriage process terminated. Unable to reproduce."
            }
        };
        Ok((PhaseOutcome::Validation(args), transition, message.to_string()))
    }

    fn severity(&self, args: SeverityArgs) -> Result<(PhaseOutcome, Transition, String), String> {
        if !(0.0..=10.0).contains(&args.score) {
            return Err(format!(
                "score must be between 0.0 and 10.0, got {}",
                args.score
            ));
        }
        let classification = Classification {
            finding: self.session.finding.clone(),
            severity: args.severity,
            score: args.score,
            vector: args.vector.clone().filter(|v| !v.trim().is_empty()),
            reasoning: args.reasoning.clone(),
        };
        let message = format!(
            "Phase 3 completed: {} ({:.1})\n\nTriage process complete.",
            args.severity, args.score
        );
        Ok((
            PhaseOutcome::Severity(args),
            Transition::Conclude(TriageOutcome::Completed(classification)),
            message,
        ))
    }
}

/// Log shell activity to the findings journal. Failures only warn.
async fn note(
    journal: &TriageJournal,
    id: &str,
    phase: Phase,
    finding: &str,
    evidence: Option<&str>,
) {
    let phase = phase.number().to_string();
    if let Err(e) = journal.log_finding(&phase, finding, evidence).await {
        warn!("[triage:{id}] Findings log write failed: {e}");
    }
}

/// Write the submitter feedback artifact for a negative outcome.
async fn write_feedback(journal: &TriageJournal, id: &str, finding: &Finding, outcome: &TriageOutcome) {
    let written = match outcome {
        TriageOutcome::Rejected { reasoning } => journal.write_rejection(finding, reasoning).await,
        TriageOutcome::NotReproduced { feedback } => {
            journal
                .write_not_reproduced(finding, feedback.as_deref())
                .await
        }
        TriageOutcome::Completed(_) | TriageOutcome::Error(_) => return,
    };
    match written {
        Ok(()) => debug!("[triage:{id}] Wrote feedback artifact"),
        Err(e) => warn!("[triage:{id}] Feedback write failed: {e}"),
    }
}

/// Name of the completion action for a phase.
pub fn completion_action(phase: Phase) -> &'static str {
    match phase {
        Phase::Review => names::FINISHED_PHASE_1,
        Phase::Validation => names::FINISHED_PHASE_2,
        Phase::Severity => names::FINISHED_PHASE_3,
    }
}
