//! The top-level control loop.
//!
//! An [`Orchestrator`] owns the primary conversation. Each round it relays
//! new triage feedback, compacts the conversation when over budget, asks the
//! driving model for its next actions and executes them in order against the
//! unbounded top-level [`Supervisor`], the notes store and the
//! [`TriageManager`]. The run ends when the model calls `finished`, when
//! `finish_on_submit` is set and a finding was accepted, when the round
//! limit is reached, or after too many consecutive completion failures.
//!
//! Each round's messages are also recorded by [`HistoryStore`], so the model
//! can read back what compaction summarized. With a router model set, every
//! top-level worker is spawned under the specialist profile the
//! [`TaskRouter`] picks.

pub mod history;
pub mod notes;
pub mod prompt;
pub mod router;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OverseerConfig, SubmissionMode};
use crate::context::{ContextWindow, Summarizer};
use crate::delivery::{Delivery, DeliverySink};
use crate::instance::{InstanceRuntime, Supervisor};
use crate::tools::actions::{FinishedArgs, LifecycleAction, SupervisorAction};
use crate::tools::core::{ActionOutput, DEFAULT_MAX_RESULT_CHARS, log_action_call, truncate_result};
use crate::tools::lifecycle::{self, LifecycleDefaults, WorkspacePlacement};
use crate::triage::{Finding, TriageManager, TriageRecord};
use crate::{ChatRequest, CompletionService, Message, ToolCall, ToolDef};

use history::{DEFAULT_CONTEXT_LINES, HistoryStore, SearchOptions};
use notes::NotesStore;
use router::{GENERALIST, TaskRouter};

/// Snapshot of the primary conversation, rewritten every round.
pub const HISTORY_FILE: &str = "supervisor_conversation.json";

const SCOPE: &str = "supervisor";

/// Why a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The model called `finished`.
    Finished(String),
    /// A finding was accepted with `finish_on_submit` set.
    Submitted,
    RoundLimit,
    /// Consecutive completion failures hit the cap; holds the last error.
    CompletionFailed(String),
    Cancelled,
}

impl StopReason {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::CompletionFailed(_))
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub rounds: usize,
    pub submission_made: bool,
    pub stop: StopReason,
    /// Every triage pipeline launched this session, in submission order.
    pub triage: Vec<TriageRecord>,
}

pub struct Orchestrator {
    config: OverseerConfig,
    client: Arc<dyn CompletionService>,
    sink: Arc<dyn DeliverySink>,
    window: ContextWindow,
    supervisor: Supervisor,
    triage: TriageManager,
    notes: NotesStore,
    history: HistoryStore,
    router: Option<TaskRouter>,
    defs: Vec<ToolDef>,
    defaults: LifecycleDefaults,
    messages: Vec<Message>,
    relayed: HashSet<PathBuf>,
    /// Relayed feedback not yet written to a round record.
    unrecorded: Vec<Message>,
    submission_made: bool,
    finished: Option<String>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: OverseerConfig,
        objective: &str,
        client: Arc<dyn CompletionService>,
        runtime: Arc<dyn InstanceRuntime>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        let summarizer = Summarizer::new(client.clone(), config.summarizer_config());
        let window = ContextWindow::new(config.context_budget(), summarizer)
            .with_preserve_recent(config.preserve_recent);
        let supervisor = Supervisor::new(SCOPE, None, config.instances_dir(), runtime.clone())
            .with_poll_interval(config.poll_interval);
        let triage = TriageManager::new(
            config.session_dir(),
            config.scope.clone(),
            client.clone(),
            window.clone(),
            runtime,
            sink.clone(),
        )
        .with_config(config.triage.clone())
        .with_poll_interval(config.poll_interval);
        let defaults = LifecycleDefaults {
            spawn_duration: config.spawn_duration,
            wait_timeout: config.wait_timeout,
            placement: WorkspacePlacement::PerInstance(config.workspaces_dir()),
        };
        let messages = vec![
            Message::system(prompt::system_prompt(config.mode, config.finish_on_submit)),
            Message::user(prompt::directive(objective, &config.scope)),
        ];

        let router = config
            .router_model
            .as_ref()
            .map(|model| TaskRouter::new(client.clone(), model.clone()));

        Self {
            notes: NotesStore::new(config.notes_dir()),
            history: HistoryStore::new(config.session_dir()),
            router,
            defs: SupervisorAction::definitions(),
            config,
            client,
            sink,
            window,
            supervisor,
            triage,
            defaults,
            messages,
            relayed: HashSet::new(),
            unrecorded: Vec::new(),
            submission_made: false,
            finished: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run (and any wait in progress) when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn submission_made(&self) -> bool {
        self.submission_made
    }

    pub fn triage(&self) -> &TriageManager {
        &self.triage
    }

    /// Run to completion. Workers are stopped on every exit path; triage
    /// pipelines are allowed to finish unless the run was cancelled.
    pub async fn run(&mut self) -> RunReport {
        let initial = self.messages.clone();
        self.record_round(0, &initial).await;
        let (rounds, stop) = self.drive().await;
        info!("[{SCOPE}] Stopping after {rounds} round(s): {stop:?}");

        self.supervisor.shutdown().await;
        if self.cancel.is_cancelled() {
            self.triage.shutdown().await;
        } else {
            let pending = self.triage.counts();
            if pending.running > 0 {
                info!("Waiting for {} triage pipeline(s) to finish", pending.running);
            }
            self.triage.drain().await;
        }
        self.save_history().await;

        RunReport {
            rounds,
            submission_made: self.submission_made,
            stop,
            triage: self.triage.records(),
        }
    }

    async fn drive(&mut self) -> (usize, StopReason) {
        let mut rounds = 0usize;
        let mut failures = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return (rounds, StopReason::Cancelled);
            }
            if rounds >= self.config.max_rounds {
                warn!("[{SCOPE}] Round limit of {} reached", self.config.max_rounds);
                return (rounds, StopReason::RoundLimit);
            }

            self.relay_feedback().await;
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
                Ok(c) => {
                    failures = 0;
                    c
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "[{SCOPE}] Completion failed ({failures}/{}): {e}",
                        self.config.max_consecutive_failures
                    );
                    if failures >= self.config.max_consecutive_failures {
                        return (rounds, StopReason::CompletionFailed(e));
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return (rounds, StopReason::Cancelled),
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                    continue;
                }
            };
            rounds += 1;
            debug!("[{SCOPE}] Round {rounds}");

            let round_start = self.messages.len();
            let assistant = completion.into_message();
            self.messages.push(assistant.clone());
            for call in assistant.calls() {
                let output = self.dispatch(call).await;
                let text = truncate_result(output.render(), DEFAULT_MAX_RESULT_CHARS);
                self.messages.push(Message::tool_result(&call.id, text));
            }
            if assistant.calls().is_empty() {
                self.messages.push(Message::user(
                    "Continue with the objective using the available actions. \
                     Call finished when you are done.",
                ));
            }
            let mut appended = std::mem::take(&mut self.unrecorded);
            appended.extend_from_slice(&self.messages[round_start..]);
            self.record_round(rounds, &appended).await;
            self.save_history().await;

            if let Some(reason) = self.finished.clone() {
                return (rounds, StopReason::Finished(reason));
            }
            if self.config.finish_on_submit && self.submission_made {
                info!("[{SCOPE}] Finding submitted, finishing session");
                return (rounds, StopReason::Submitted);
            }
        }
    }

    async fn dispatch(&mut self, call: &ToolCall) -> ActionOutput {
        let name = call.function.name.as_str();
        log_action_call(SCOPE, name, &call.function.arguments);

        let action = match SupervisorAction::parse(&self.defs, name, &call.function.arguments) {
            Ok(a) => a,
            Err(e) => return ActionOutput::err(e),
        };

        match action {
            SupervisorAction::Lifecycle(LifecycleAction::Spawn(args)) => {
                let specialist = self.route(&args.task_description).await;
                lifecycle::spawn(
                    &mut self.supervisor,
                    args,
                    &self.defaults,
                    specialist.as_deref(),
                )
                .await
            }
            SupervisorAction::Lifecycle(action) => {
                lifecycle::execute(&mut self.supervisor, action, &self.defaults, &self.cancel).await
            }
            SupervisorAction::WriteNote(args) => match self.notes.write(&args.content).await {
                Ok(_) => ActionOutput::ok("Note saved"),
                Err(e) => ActionOutput::err(e),
            },
            SupervisorAction::ReadNotes => self.notes.read_all().await.into(),
            SupervisorAction::ReadConversation(args) => self
                .history
                .read(args.range(), args.tail_lines.map(|n| n as usize))
                .await
                .into(),
            SupervisorAction::SearchHistory(args) => {
                let options = SearchOptions {
                    context_lines: args
                        .context_lines
                        .map_or(DEFAULT_CONTEXT_LINES, |n| n as usize),
                    case_sensitive: args.case_sensitive.unwrap_or(false),
                };
                self.history.search(&args.query, &options).await.into()
            }
            SupervisorAction::SubmitFinding(finding) => self.submit(finding).await,
            SupervisorAction::Finished(args) => self.finish(args).await,
        }
    }

    /// Specialist for a new worker: none without a router, the generalist
    /// when routing fails.
    async fn route(&self, task: &str) -> Option<String> {
        let router = self.router.as_ref()?;
        match router.route(task).await {
            Ok(name) => Some(name),
            Err(e) => {
                warn!("[{SCOPE}] Routing failed ({e}), using {GENERALIST}");
                Some(GENERALIST.to_string())
            }
        }
    }

    async fn submit(&mut self, finding: Finding) -> ActionOutput {
        match self.config.mode {
            SubmissionMode::Direct => {
                let title = finding.title.clone();
                match self.sink.deliver(&Delivery::Direct(finding)).await {
                    Ok(()) => {
                        self.submission_made = true;
                        info!("[{SCOPE}] Delivered finding directly: {title}");
                        ActionOutput::ok(format!("Finding delivered: {title}"))
                    }
                    Err(e) => ActionOutput::err(format!("delivery failed: {e}")),
                }
            }
            SubmissionMode::Triage => match self.triage.submit(finding).await {
                Ok(id) => {
                    self.submission_made = true;
                    ActionOutput::ok(format!(
                        "Finding submitted to triage as {id}. Rejections and reproduction \
                         failures will be relayed to you as feedback."
                    ))
                }
                Err(e) => ActionOutput::err(e),
            },
        }
    }

    async fn finish(&mut self, args: FinishedArgs) -> ActionOutput {
        let running = self.supervisor.len();
        self.supervisor.shutdown().await;
        info!("[{SCOPE}] Finished: {}", args.finish_reason);
        self.finished = Some(args.finish_reason.clone());
        ActionOutput::ok(format!(
            "Session finished ({}). Stopped {running} instance(s).",
            args.finish_reason
        ))
    }

    /// Push every feedback artifact not yet seen as a user message.
    async fn relay_feedback(&mut self) {
        for (id, path) in self.triage.feedback_files() {
            if self.relayed.contains(&path) {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    info!("[{SCOPE}] Relaying feedback from triage {id}");
                    let message = Message::user(prompt::feedback_relay(&id, text.trim()));
                    self.unrecorded.push(message.clone());
                    self.messages.push(message);
                    self.relayed.insert(path);
                }
                Err(e) => warn!("[{SCOPE}] Failed to read {}: {e}", path.display()),
            }
        }
    }

    async fn record_round(&self, iteration: usize, messages: &[Message]) {
        if let Err(e) = self.history.record(iteration, messages).await {
            warn!("[{SCOPE}] Round {iteration} record failed: {e}");
        }
    }

    async fn save_history(&self) {
        let path = self.config.session_dir().join(HISTORY_FILE);
        let json = match serde_json::to_string_pretty(&self.messages) {
            Ok(json) => json,
            Err(e) => {
                warn!("[{SCOPE}] Failed to serialize conversation: {e}");
                return;
            }
        };
        if let Err(e) = crate::fsio::write_text(&path, &json).await {
            warn!("[{SCOPE}] History save failed: {e}");
        }
    }
}
