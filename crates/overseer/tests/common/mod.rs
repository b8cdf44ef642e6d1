//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use overseer::context::{ContextBudget, ContextWindow, Summarizer, SummarizerConfig};
use overseer::delivery::{Delivery, DeliveryFuture, DeliverySink};
use overseer::instance::runtime::RuntimeFuture;
use overseer::instance::{InstanceProcess, InstanceRuntime, SpawnRequest, SpawnedInstance};
use overseer::triage::Finding;
use overseer::{ChatCompletion, ChatRequest, CompletionFuture, CompletionService, ToolCall};

pub const DRIVER_MODEL: &str = "test/driver";
pub const TRIAGE_MODEL: &str = "test/triage";
pub const SUMMARY_MODEL: &str = "test/summary";
pub const ROUTER_MODEL: &str = "test/router";

// ── Completions ────────────────────────────────────────────────────

/// Completion service replaying queued replies per model.
///
/// Requests for a model with an empty queue fail with "script exhausted".
#[derive(Default)]
pub struct ScriptedCompletions {
    queues: Mutex<HashMap<String, VecDeque<Result<ChatCompletion, String>>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, model: &str, reply: Result<ChatCompletion, String>) {
        self.queues
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn reply(self, model: &str, completion: ChatCompletion) -> Self {
        self.push(model, Ok(completion));
        self
    }

    pub fn fail(self, model: &str, error: &str) -> Self {
        self.push(model, Err(error.to_string()));
        self
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, model: &str) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.model.as_deref() == Some(model))
            .collect()
    }
}

impl CompletionService for ScriptedCompletions {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let model = request.model.clone().unwrap_or_default();
            self.queues
                .lock()
                .unwrap()
                .get_mut(&model)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Err(format!("script exhausted for {model}")))
        })
    }
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

pub fn calls(calls: Vec<ToolCall>) -> ChatCompletion {
    ChatCompletion {
        tool_calls: calls,
        ..Default::default()
    }
}

pub fn text(content: &str) -> ChatCompletion {
    ChatCompletion {
        content: Some(content.to_string()),
        ..Default::default()
    }
}

pub fn window(client: Arc<dyn CompletionService>) -> ContextWindow {
    let summarizer = Summarizer::new(
        client,
        SummarizerConfig {
            model: SUMMARY_MODEL.to_string(),
            ..SummarizerConfig::default()
        },
    );
    ContextWindow::new(ContextBudget::default(), summarizer)
}

// ── Workers ────────────────────────────────────────────────────────

/// How a fake worker behaves once spawned.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerScript {
    /// Writes a `completed` status with this final response.
    Complete(String),
    /// Asks for followup with this response; completes once it gets input.
    NeedsFollowup(String),
    /// Asks for followup with this response but leaves its artifacts alone
    /// when input arrives, like a worker that has not read stdin yet.
    Asks(String),
    /// Writes nothing and never exits.
    Hang,
    /// Writes a `failed` status.
    Fail,
}

#[derive(Default)]
pub struct WorkerLog {
    pub spawned: Vec<SpawnRequest>,
    pub inputs: Vec<(String, String)>,
    pub stopped: Vec<String>,
}

/// Runtime that writes the status artifacts a real worker would.
pub struct FakeRuntime {
    script: WorkerScript,
    log: Arc<Mutex<WorkerLog>>,
}

impl FakeRuntime {
    pub fn new(script: WorkerScript) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(WorkerLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<WorkerLog>> {
        self.log.clone()
    }
}

pub fn write_status(path: &std::path::Path, status: &str) {
    std::fs::write(path, serde_json::json!({ "status": status }).to_string()).unwrap();
}

pub fn write_final(log_dir: &std::path::Path, response: &str) {
    let artifact = serde_json::json!({
        "conversation": [
            { "role": "user", "content": "task" },
            { "role": "assistant", "content": response }
        ]
    });
    std::fs::write(log_dir.join("final_result.json"), artifact.to_string()).unwrap();
}

impl InstanceRuntime for FakeRuntime {
    fn spawn(&self, request: SpawnRequest) -> RuntimeFuture<'_, SpawnedInstance> {
        Box::pin(async move {
            let log_dir = request.log_dir.clone();
            std::fs::create_dir_all(&log_dir).map_err(|e| e.to_string())?;
            std::fs::create_dir_all(&request.workspace).map_err(|e| e.to_string())?;
            let status_file = log_dir.join("status.json");
            match &self.script {
                WorkerScript::Complete(response) => {
                    write_final(&log_dir, response);
                    write_status(&status_file, "completed");
                }
                WorkerScript::NeedsFollowup(response) | WorkerScript::Asks(response) => {
                    write_final(&log_dir, response);
                    write_status(&status_file, "waiting_for_followup");
                }
                WorkerScript::Hang => {}
                WorkerScript::Fail => write_status(&status_file, "failed"),
            }
            let id = request.id.clone();
            self.log.lock().unwrap().spawned.push(request);
            Ok(SpawnedInstance {
                handle: Box::new(FakeProcess {
                    id,
                    status_file: status_file.clone(),
                    completes_on_input: !matches!(self.script, WorkerScript::Asks(_)),
                    log: self.log.clone(),
                }),
                status_file,
                log_dir,
            })
        })
    }
}

struct FakeProcess {
    id: String,
    status_file: PathBuf,
    completes_on_input: bool,
    log: Arc<Mutex<WorkerLog>>,
}

impl InstanceProcess for FakeProcess {
    fn try_exit_code(&mut self) -> Result<Option<i32>, String> {
        Ok(None)
    }

    fn send_input<'a>(&'a mut self, message: &'a str) -> RuntimeFuture<'a, ()> {
        self.log
            .lock()
            .unwrap()
            .inputs
            .push((self.id.clone(), message.to_string()));
        if self.completes_on_input {
            write_status(&self.status_file, "completed");
        }
        Box::pin(async { Ok(()) })
    }

    fn stop(&mut self) -> RuntimeFuture<'_, ()> {
        self.log.lock().unwrap().stopped.push(self.id.clone());
        Box::pin(async { Ok(()) })
    }
}

// ── Delivery ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl DeliverySink for RecordingSink {
    fn deliver<'a>(&'a self, delivery: &'a Delivery) -> DeliveryFuture<'a> {
        self.deliveries.lock().unwrap().push(delivery.clone());
        Box::pin(async { Ok(()) })
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

pub fn finding_json() -> serde_json::Value {
    serde_json::json!({
        "title": "IDOR on order details",
        "asset": "https://shop.example/api/orders",
        "vuln_type": "IDOR",
        "severity": "High",
        "description": "Order ids are sequential and not scoped to the session user.",
        "repro_steps": "1. Log in as user A\n2. GET /api/orders/1002 (owned by B)",
        "impact": "Any customer can read other customers' addresses.",
        "cleanup": "None required"
    })
}

pub fn finding() -> Finding {
    serde_json::from_value(finding_json()).unwrap()
}
