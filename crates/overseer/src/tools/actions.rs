//! The closed action sets of each scope.
//!
//! [`SupervisorAction`] is what the orchestrator's model may call;
//! [`TriageAction`] is what a triage pipeline's model may call. Both share the
//! worker-lifecycle actions in [`LifecycleAction`]. Parsing validates the raw
//! arguments against the declared schema before producing a variant, so an
//! invalid call never reaches a side effect.

use schemars::JsonSchema;
use serde::Deserialize;

use super::core::{parse_args, validate_arguments};
use super::names;
use super::spec::ActionSpec;
use crate::ToolDef;
use crate::triage::finding::Finding;
use crate::triage::phase::{ReviewArgs, SeverityArgs, ValidationArgs};

// ── Argument types ─────────────────────────────────────────────────

/// Typed arguments for `spawn_instance`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct SpawnInstanceArgs {
    /// Unique identifier for this instance (e.g. 'web-enum-1').
    pub instance_id: String,
    /// Task for the instance to work on.
    pub task_description: String,
    /// Maximum runtime in minutes (optional).
    #[serde(default)]
    pub duration_minutes: Option<f64>,
}

/// Typed arguments for actions that only name an instance.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct InstanceIdArgs {
    /// ID of the instance.
    pub instance_id: String,
}

/// Typed arguments for `send_followup`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct SendFollowupArgs {
    /// ID of the instance to send the followup to.
    pub instance_id: String,
    /// Followup message to continue the conversation.
    pub message: String,
}

/// Typed arguments for `read_instance_logs`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ReadInstanceLogsArgs {
    /// ID of the instance to read logs from.
    pub instance_id: String,
    /// Number of recent lines to return (default 50).
    #[serde(default)]
    pub tail_lines: Option<u32>,
    /// Maximum tokens to return; earlier lines are dropped when exceeded.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Typed arguments for `wait_for_instance`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct WaitForInstanceArgs {
    /// ID of the instance to wait for.
    pub instance_id: String,
    /// Maximum time to wait in minutes (default 5).
    #[serde(default)]
    pub timeout_minutes: Option<f64>,
}

/// Typed arguments for `write_note`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct WriteNoteArgs {
    /// Content of the note.
    pub content: String,
}

/// Typed arguments for `read_supervisor_conversation`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ReadConversationArgs {
    /// Return only the last N lines.
    #[serde(default)]
    pub tail_lines: Option<u32>,
    /// First round to include; requires to_iteration.
    #[serde(default)]
    pub from_iteration: Option<u32>,
    /// Last round to include; requires from_iteration.
    #[serde(default)]
    pub to_iteration: Option<u32>,
}

impl ReadConversationArgs {
    /// Inclusive round range, when both ends are given.
    pub fn range(&self) -> Option<(usize, usize)> {
        match (self.from_iteration, self.to_iteration) {
            (Some(from), Some(to)) => Some((from as usize, to as usize)),
            _ => None,
        }
    }
}

/// Typed arguments for `search_supervisor_history`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct SearchHistoryArgs {
    /// Regular expression or plain text to look for.
    pub query: String,
    /// Lines of context shown around each match (default 3).
    #[serde(default)]
    pub context_lines: Option<u32>,
    /// Match case exactly (default false).
    #[serde(default)]
    pub case_sensitive: Option<bool>,
}

/// Typed arguments for `finished`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct FinishedArgs {
    /// Why the session is finishing.
    pub finish_reason: String,
}

/// Typed arguments for `exec_command`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ExecCommandArgs {
    /// Shell command to execute in the triage workspace.
    pub command: String,
}

/// Typed arguments for `create_test_file`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct CreateTestFileArgs {
    /// File name, relative to the triage workspace.
    pub filename: String,
    /// Content to write.
    pub content: String,
    /// What the file is for.
    pub description: String,
}

/// Typed arguments for `log_finding`.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct LogFindingArgs {
    /// Current triage phase (1, 2 or 3).
    pub phase: String,
    /// The observation to log.
    pub finding: String,
    /// Supporting evidence.
    #[serde(default)]
    pub evidence: Option<String>,
}

// ── Definitions ────────────────────────────────────────────────────

fn spawn_instance_def() -> ToolDef {
    ActionSpec::new(
        names::SPAWN_INSTANCE,
        "Spawn a new worker instance with a specific task",
    )
    .when_to_use("When a self-contained piece of work should run in the background")
    .when_not_to_use(
        "When an existing instance is waiting for input on the same task. \
         Use send_followup instead",
    )
    .parameters_for::<SpawnInstanceArgs>()
    .example(
        "spawn_instance(instance_id='web-1', task_description='Enumerate https://target')",
        "Starts the worker and returns immediately",
    )
    .to_tool_def()
}

fn terminate_instance_def() -> ToolDef {
    ActionSpec::new(names::TERMINATE_INSTANCE, "Terminate a specific worker instance")
        .when_to_use("When an instance is stuck, finished, or no longer useful")
        .parameters_for::<InstanceIdArgs>()
        .to_tool_def()
}

fn send_followup_def() -> ToolDef {
    ActionSpec::new(
        names::SEND_FOLLOWUP,
        "Send a followup message to continue the conversation with an instance",
    )
    .when_to_use("When wait_for_instance reports the instance is waiting for followup")
    .when_not_to_use("When the instance has completed or failed")
    .parameters_for::<SendFollowupArgs>()
    .to_tool_def()
}

fn list_instances_def() -> ToolDef {
    ActionSpec::new(names::LIST_INSTANCES, "List all instances and their status").to_tool_def()
}

fn read_instance_logs_def() -> ToolDef {
    ActionSpec::new(
        names::READ_INSTANCE_LOGS,
        "Read the conversation log of a specific instance",
    )
    .when_to_use("When you need to see what an instance has done so far")
    .when_not_to_use("When you want to block until the instance needs input. Use wait_for_instance")
    .parameters_for::<ReadInstanceLogsArgs>()
    .to_tool_def()
}

fn wait_for_instance_def() -> ToolDef {
    ActionSpec::new(
        names::WAIT_FOR_INSTANCE,
        "Wait for an instance to need supervisor input, complete, or fail",
    )
    .when_to_use("After spawning or sending a followup, when there is nothing else to do")
    .when_not_to_use("When you only want a progress snapshot. Use read_instance_logs")
    .parameters_for::<WaitForInstanceArgs>()
    .to_tool_def()
}

/// Worker-lifecycle definitions. `with_list` adds `list_instances`.
pub fn lifecycle_definitions(with_list: bool) -> Vec<ToolDef> {
    let mut defs = vec![spawn_instance_def(), terminate_instance_def(), send_followup_def()];
    if with_list {
        defs.push(list_instances_def());
    }
    defs.push(read_instance_logs_def());
    defs.push(wait_for_instance_def());
    defs
}

fn find_def<'a>(defs: &'a [ToolDef], name: &str) -> Result<&'a ToolDef, String> {
    defs.iter()
        .find(|d| d.function.name == name)
        .ok_or_else(|| format!("unknown action '{name}'"))
}

// ── Lifecycle ──────────────────────────────────────────────────────

/// Actions on the scope's instance supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    Spawn(SpawnInstanceArgs),
    Terminate(InstanceIdArgs),
    SendFollowup(SendFollowupArgs),
    List,
    ReadLogs(ReadInstanceLogsArgs),
    Wait(WaitForInstanceArgs),
}

impl LifecycleAction {
    /// Build from a validated argument value. `None` for non-lifecycle
    /// names.
    fn from_validated(name: &str, value: serde_json::Value) -> Option<Result<Self, String>> {
        let parsed = match name {
            names::SPAWN_INSTANCE => parse_args(name, value).map(Self::Spawn),
            names::TERMINATE_INSTANCE => parse_args(name, value).map(Self::Terminate),
            names::SEND_FOLLOWUP => parse_args(name, value).map(Self::SendFollowup),
            names::LIST_INSTANCES => Ok(Self::List),
            names::READ_INSTANCE_LOGS => parse_args(name, value).map(Self::ReadLogs),
            names::WAIT_FOR_INSTANCE => parse_args(name, value).map(Self::Wait),
            _ => return None,
        };
        Some(parsed)
    }
}

// ── Supervisor scope ───────────────────────────────────────────────

/// Actions available to the orchestrator's driving model.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorAction {
    Lifecycle(LifecycleAction),
    WriteNote(WriteNoteArgs),
    ReadNotes,
    ReadConversation(ReadConversationArgs),
    SearchHistory(SearchHistoryArgs),
    SubmitFinding(Finding),
    Finished(FinishedArgs),
}

impl SupervisorAction {
    /// Definitions sent with every orchestrator completion request.
    pub fn definitions() -> Vec<ToolDef> {
        let mut defs = lifecycle_definitions(true);
        defs.push(
            ActionSpec::new(names::WRITE_NOTE, "Write a note for future reference")
                .when_to_use(
                    "When you learn something that must survive context compaction: \
                     credentials, confirmed hosts, dead ends",
                )
                .parameters_for::<WriteNoteArgs>()
                .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(names::READ_NOTES, "Read all notes taken during this session")
                .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(
                names::READ_SUPERVISOR_CONVERSATION,
                "Read your own earlier conversation, round by round",
            )
            .when_to_use(
                "When details you need were summarized away by context compaction",
            )
            .when_not_to_use("When you are looking for one fact. Use search_supervisor_history")
            .parameters_for::<ReadConversationArgs>()
            .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(
                names::SEARCH_SUPERVISOR_HISTORY,
                "Search your earlier conversation for a pattern, with surrounding context",
            )
            .when_to_use("When you need a host, credential or result mentioned in an earlier round")
            .parameters_for::<SearchHistoryArgs>()
            .example(
                "search_supervisor_history(query='admin:.*', context_lines=2)",
                "Every line mentioning admin credentials, two lines either side",
            )
            .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(names::SUBMIT_FINDING, "Submit a finding report for processing")
                .when_to_use("When an instance has confirmed an issue with reproducible evidence")
                .when_not_to_use("For unconfirmed suspicions. Keep investigating first")
                .parameters_for::<Finding>()
                .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(
                names::FINISHED,
                "Complete the session and clean up all instances",
            )
            .when_to_use("When the objective is met or no further progress is possible")
            .parameters_for::<FinishedArgs>()
            .to_tool_def(),
        );
        defs
    }

    /// Validate and parse one call.
    pub fn parse(defs: &[ToolDef], name: &str, arguments: &str) -> Result<Self, String> {
        let value = validate_arguments(find_def(defs, name)?, arguments)?;
        if let Some(lifecycle) = LifecycleAction::from_validated(name, value.clone()) {
            return lifecycle.map(Self::Lifecycle);
        }
        match name {
            names::WRITE_NOTE => parse_args(name, value).map(Self::WriteNote),
            names::READ_NOTES => Ok(Self::ReadNotes),
            names::READ_SUPERVISOR_CONVERSATION => {
                parse_args(name, value).map(Self::ReadConversation)
            }
            names::SEARCH_SUPERVISOR_HISTORY => parse_args(name, value).map(Self::SearchHistory),
            names::SUBMIT_FINDING => Finding::from_value(&value)
                .map(Self::SubmitFinding)
                .map_err(|e| e.to_string()),
            names::FINISHED => parse_args(name, value).map(Self::Finished),
            _ => Err(format!("unknown action '{name}'")),
        }
    }
}

// ── Triage scope ───────────────────────────────────────────────────

/// Actions available to a triage pipeline's driving model.
#[derive(Debug, Clone, PartialEq)]
pub enum TriageAction {
    Lifecycle(LifecycleAction),
    ExecCommand(ExecCommandArgs),
    CreateTestFile(CreateTestFileArgs),
    LogFinding(LogFindingArgs),
    FinishedPhase1(ReviewArgs),
    FinishedPhase2(ValidationArgs),
    FinishedPhase3(SeverityArgs),
}

impl TriageAction {
    /// Definitions sent with every triage completion request.
    pub fn definitions() -> Vec<ToolDef> {
        let mut defs = lifecycle_definitions(false);
        defs.push(
            ActionSpec::new(
                names::FINISHED_PHASE_1,
                "Complete Phase 1 (Initial Review) and record the decision",
            )
            .when_to_use("Once the report has been checked for scope, completeness and plausibility")
            .parameters_for::<ReviewArgs>()
            .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(
                names::FINISHED_PHASE_2,
                "Complete Phase 2 (Validation) and record the reproduction result",
            )
            .when_to_use("Once reproduction has been attempted with evidence")
            .parameters_for::<ValidationArgs>()
            .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(
                names::FINISHED_PHASE_3,
                "Complete Phase 3 (Severity Assessment) and record the classification",
            )
            .when_to_use("Once the reproduced issue has been scored")
            .parameters_for::<SeverityArgs>()
            .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(names::EXEC_COMMAND, "Execute a shell command for validation")
                .when_to_use("For quick checks such as curl requests or DNS lookups")
                .when_not_to_use(
                    "For long multi-step reproduction. Spawn an instance instead",
                )
                .parameters_for::<ExecCommandArgs>()
                .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(
                names::CREATE_TEST_FILE,
                "Create a file in the triage workspace for validation",
            )
            .parameters_for::<CreateTestFileArgs>()
            .to_tool_def(),
        );
        defs.push(
            ActionSpec::new(names::LOG_FINDING, "Log an observation made during triage")
                .parameters_for::<LogFindingArgs>()
                .to_tool_def(),
        );
        defs
    }

    /// Validate and parse one call.
    pub fn parse(defs: &[ToolDef], name: &str, arguments: &str) -> Result<Self, String> {
        let value = validate_arguments(find_def(defs, name)?, arguments)?;
        if let Some(lifecycle) = LifecycleAction::from_validated(name, value.clone()) {
            return lifecycle.map(Self::Lifecycle);
        }
        match name {
            names::EXEC_COMMAND => parse_args(name, value).map(Self::ExecCommand),
            names::CREATE_TEST_FILE => parse_args(name, value).map(Self::CreateTestFile),
            names::LOG_FINDING => parse_args(name, value).map(Self::LogFinding),
            names::FINISHED_PHASE_1 => parse_args(name, value).map(Self::FinishedPhase1),
            names::FINISHED_PHASE_2 => parse_args(name, value).map(Self::FinishedPhase2),
            names::FINISHED_PHASE_3 => parse_args(name, value).map(Self::FinishedPhase3),
            _ => Err(format!("unknown action '{name}'")),
        }
    }
}
