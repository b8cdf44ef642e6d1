//! Launches and tracks triage pipelines for submitted findings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::finding::Finding;
use super::journal::{FEEDBACK_FILE, TriageJournal};
use super::pipeline::{PipelineConfig, TriageOutcome, TriagePipeline, TriageSession};
use crate::CompletionService;
use crate::context::ContextWindow;
use crate::delivery::{Delivery, DeliverySink};
use crate::instance::{DEFAULT_POLL_INTERVAL, InstanceRuntime, Supervisor};

/// Directory under the session holding one workspace per pipeline.
pub const TRIAGE_DIR: &str = "triage_instances";

/// Lifecycle of one pipeline as tracked by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

/// One submitted finding and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageRecord {
    pub id: String,
    pub title: String,
    pub workspace: PathBuf,
    pub status: TriageStatus,
    /// `reproduced_and_classified`, `unable_to_reproduce`, `rejected` or
    /// `error` once finished.
    pub result: Option<String>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Aggregate counts for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriageCounts {
    pub running: usize,
    pub completed: usize,
    pub total: usize,
}

/// Result label recorded for an outcome.
pub fn result_label(outcome: &TriageOutcome) -> &'static str {
    match outcome {
        TriageOutcome::Completed(_) => "reproduced_and_classified",
        TriageOutcome::NotReproduced { .. } => "unable_to_reproduce",
        TriageOutcome::Rejected { .. } => "rejected",
        TriageOutcome::Error(_) => "error",
    }
}

fn outcome_detail(outcome: &TriageOutcome) -> Option<String> {
    match outcome {
        TriageOutcome::Rejected { reasoning } => Some(reasoning.clone()),
        TriageOutcome::NotReproduced { feedback } => feedback.clone(),
        TriageOutcome::Completed(c) => Some(format!("{} ({:.1})", c.severity, c.score)),
        TriageOutcome::Error(e) => Some(e.clone()),
    }
}

/// Short hex id from the clock and a process-wide counter.
fn generate_triage_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = ts ^ count.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    format!("{:08x}", (mixed ^ (mixed >> 32)) as u32)
}

type Records = Arc<Mutex<HashMap<String, TriageRecord>>>;

fn update(records: &Records, id: &str, f: impl FnOnce(&mut TriageRecord)) {
    match records.lock() {
        Ok(mut map) => {
            if let Some(record) = map.get_mut(id) {
                f(record);
            }
        }
        Err(e) => warn!("Triage registry lock poisoned: {e}"),
    }
}

/// Owns every triage pipeline of a session.
///
/// Each [`submit`](Self::submit) creates `<session>/triage_instances/triager_<id>/`
/// and runs a [`TriagePipeline`] there as a background task with its own
/// single-worker supervisor. Completed classifications go to the
/// [`DeliverySink`].
pub struct TriageManager {
    root: PathBuf,
    scope: String,
    client: Arc<dyn CompletionService>,
    window: ContextWindow,
    runtime: Arc<dyn InstanceRuntime>,
    sink: Arc<dyn DeliverySink>,
    config: PipelineConfig,
    poll_interval: Duration,
    records: Records,
    prior: Vec<String>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl TriageManager {
    pub fn new(
        session_dir: &Path,
        scope: impl Into<String>,
        client: Arc<dyn CompletionService>,
        window: ContextWindow,
        runtime: Arc<dyn InstanceRuntime>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            root: session_dir.join(TRIAGE_DIR),
            scope: scope.into(),
            client,
            window,
            runtime,
            sink,
            config: PipelineConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            records: Arc::new(Mutex::new(HashMap::new())),
            prior: Vec::new(),
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Poll interval of the nested supervisors.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start triage of a validated finding. Returns the triage id.
    pub async fn submit(&mut self, finding: Finding) -> Result<String, String> {
        let id = {
            let records = self
                .records
                .lock()
                .map_err(|e| format!("triage registry unavailable: {e}"))?;
            let mut id = generate_triage_id();
            while records.contains_key(&id) {
                id = generate_triage_id();
            }
            id
        };
        let workspace = self.root.join(format!("triager_{id}"));
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| format!("failed to create {}: {e}", workspace.display()))?;

        let record = TriageRecord {
            id: id.clone(),
            title: finding.title.clone(),
            workspace: workspace.clone(),
            status: TriageStatus::Starting,
            result: None,
            detail: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.records
            .lock()
            .map_err(|e| format!("triage registry unavailable: {e}"))?
            .insert(id.clone(), record);

        let prior = self.prior_context();
        self.prior.push(finding.summary_line());

        let journal = TriageJournal::new(&workspace, &id, &finding.title);
        let supervisor = Supervisor::new(
            format!("triage:{id}"),
            Some(1),
            workspace.join("instances"),
            self.runtime.clone(),
        )
        .with_poll_interval(self.poll_interval);
        let pipeline = TriagePipeline::new(
            &id,
            finding,
            &self.scope,
            &prior,
            self.client.clone(),
            self.window.clone(),
            supervisor,
            journal,
            self.config.clone(),
        )
        .with_cancellation(self.cancel.child_token());

        let records = self.records.clone();
        let sink = self.sink.clone();
        let task_id = id.clone();
        self.tasks.spawn(async move {
            update(&records, &task_id, |r| r.status = TriageStatus::Running);
            let session = pipeline.run().await;
            finish(&records, &task_id, &session, sink.as_ref()).await;
        });

        info!("Submitted finding to triage as {id}");
        Ok(id)
    }

    /// Findings already submitted this session, one per line.
    fn prior_context(&self) -> String {
        self.prior
            .iter()
            .map(|line| format!("- {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn counts(&self) -> TriageCounts {
        let records = self.records();
        TriageCounts {
            running: records
                .iter()
                .filter(|r| r.status == TriageStatus::Running)
                .count(),
            completed: records
                .iter()
                .filter(|r| r.status == TriageStatus::Completed)
                .count(),
            total: records.len(),
        }
    }

    /// Snapshot of every record, oldest first.
    pub fn records(&self) -> Vec<TriageRecord> {
        let mut rows: Vec<TriageRecord> = match self.records.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(e) => {
                warn!("Triage registry lock poisoned: {e}");
                Vec::new()
            }
        };
        rows.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        rows
    }

    pub fn record(&self, id: &str) -> Option<TriageRecord> {
        self.records.lock().ok()?.get(id).cloned()
    }

    /// Workspaces of running or completed pipelines that still exist.
    pub fn feedback_dirs(&self) -> Vec<PathBuf> {
        self.records()
            .into_iter()
            .filter(|r| matches!(r.status, TriageStatus::Running | TriageStatus::Completed))
            .map(|r| r.workspace)
            .filter(|dir| dir.exists())
            .collect()
    }

    /// Feedback artifacts currently present, as `(triage id, path)`.
    pub fn feedback_files(&self) -> Vec<(String, PathBuf)> {
        self.records()
            .into_iter()
            .filter(|r| matches!(r.status, TriageStatus::Running | TriageStatus::Completed))
            .map(|r| (r.id, r.workspace.join(FEEDBACK_FILE)))
            .filter(|(_, path)| path.exists())
            .collect()
    }

    /// Wait for every launched pipeline to finish.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Triage task ended abnormally: {e}");
            }
        }
    }

    /// Cancel running pipelines and wait for them to stop.
    pub async fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            info!("Stopping {} triage task(s)", self.tasks.len());
        }
        self.cancel.cancel();
        self.drain().await;
    }
}

async fn finish(records: &Records, id: &str, session: &TriageSession, sink: &dyn DeliverySink) {
    let Some(outcome) = session.outcome.as_ref() else {
        return;
    };
    let status = match outcome {
        TriageOutcome::Error(_) => TriageStatus::Failed,
        _ => TriageStatus::Completed,
    };
    update(records, id, |r| {
        r.status = status;
        r.result = Some(result_label(outcome).to_string());
        r.detail = outcome_detail(outcome);
        r.ended_at = Some(Utc::now());
    });
    info!("Triage {id} finished: {}", result_label(outcome));

    if let TriageOutcome::Completed(classification) = outcome {
        let delivery = Delivery::Classified(classification.clone());
        if let Err(e) = sink.deliver(&delivery).await {
            warn!("Delivery of triage {id} failed: {e}");
        }
    }
}
