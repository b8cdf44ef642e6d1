//! The per-scope instance registry and its operations.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::artifacts::{final_result_excerpt, modified_at, read_status, realtime_excerpt};
use super::logs::read_logs;
use super::runtime::{InstanceProcess, InstanceRuntime, SpawnRequest};
use super::{InstanceStatus, InstanceSummary, SupervisorError, WaitReport};

/// Default interval between status checks while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Only every Nth poll tick is logged at info level.
const LOG_EVERY_N_TICKS: u64 = 5;

/// The status artifact as it stood when a follow-up was delivered. A
/// `waiting_for_followup` read from that same version predates the answer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FollowupMark {
    status_modified: Option<SystemTime>,
}

/// A registered worker.
pub struct InstanceHandle {
    pub id: String,
    pub task: String,
    pub workspace: PathBuf,
    pub started_at: DateTime<Utc>,
    pub status: InstanceStatus,
    pub log_dir: PathBuf,
    pub status_file: PathBuf,
    pub duration: Duration,
    process: Box<dyn InstanceProcess>,
    followup_mark: Option<FollowupMark>,
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

/// Owns the instance registry of one scope.
///
/// `limit` bounds the registry size: `None` at top level, `Some(1)` inside a
/// triage pipeline. Each worker logs to `<log_root>/<id>/`. Registries are
/// never shared between supervisors.
pub struct Supervisor {
    scope: String,
    limit: Option<usize>,
    log_root: PathBuf,
    runtime: Arc<dyn InstanceRuntime>,
    instances: HashMap<String, InstanceHandle>,
    poll_interval: Duration,
}

impl Supervisor {
    pub fn new(
        scope: impl Into<String>,
        limit: Option<usize>,
        log_root: impl Into<PathBuf>,
        runtime: Arc<dyn InstanceRuntime>,
    ) -> Self {
        Self {
            scope: scope.into(),
            limit,
            log_root: log_root.into(),
            runtime,
            instances: HashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval between status checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn log_root(&self) -> &std::path::Path {
        &self.log_root
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<InstanceStatus> {
        self.instances.get(id).map(|h| h.status)
    }

    pub fn get(&self, id: &str) -> Option<&InstanceHandle> {
        self.instances.get(id)
    }

    /// Launch a worker under the default profile and register it as running.
    pub async fn spawn(
        &mut self,
        id: &str,
        task: &str,
        workspace: PathBuf,
        duration: Duration,
    ) -> Result<(), SupervisorError> {
        self.spawn_as(id, task, workspace, duration, None).await
    }

    /// Launch a worker and register it as running.
    ///
    /// Fails without touching the registry when the id is taken or the scope
    /// is at its limit.
    pub async fn spawn_as(
        &mut self,
        id: &str,
        task: &str,
        workspace: PathBuf,
        duration: Duration,
        specialist: Option<&str>,
    ) -> Result<(), SupervisorError> {
        if self.instances.contains_key(id) {
            return Err(SupervisorError::AlreadyExists(id.to_string()));
        }
        if let Some(limit) = self.limit
            && self.instances.len() >= limit
        {
            return Err(SupervisorError::RegistryFull { limit });
        }

        let request = SpawnRequest {
            id: id.to_string(),
            task: task.to_string(),
            workspace: workspace.clone(),
            log_dir: self.log_root.join(id),
            duration,
            specialist: specialist.map(str::to_string),
        };
        let spawned = self
            .runtime
            .spawn(request)
            .await
            .map_err(SupervisorError::Runtime)?;

        info!("[{}] Spawned instance '{id}'", self.scope);
        self.instances.insert(
            id.to_string(),
            InstanceHandle {
                id: id.to_string(),
                task: task.to_string(),
                workspace,
                started_at: Utc::now(),
                status: InstanceStatus::Running,
                log_dir: spawned.log_dir,
                status_file: spawned.status_file,
                duration,
                process: spawned.handle,
                followup_mark: None,
            },
        );
        Ok(())
    }

    /// Stop a worker and remove it from the registry.
    pub async fn terminate(&mut self, id: &str) -> Result<(), SupervisorError> {
        let mut handle = self
            .instances
            .remove(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        if let Err(e) = handle.process.stop().await {
            warn!("[{}] Stopping '{id}' reported: {e}", self.scope);
        }
        info!("[{}] Terminated instance '{id}'", self.scope);
        Ok(())
    }

    /// Forward a follow-up message and mark the worker running again.
    ///
    /// The status artifact keeps saying `waiting_for_followup` until the
    /// worker reads its input, so the next [`wait`](Self::wait) ignores that
    /// status until the artifact is rewritten.
    pub async fn send_followup(&mut self, id: &str, message: &str) -> Result<(), SupervisorError> {
        let handle = self
            .instances
            .get_mut(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        if !handle.status.accepts_input() {
            return Err(SupervisorError::NotAcceptingInput {
                id: id.to_string(),
                status: handle.status,
            });
        }
        let mark = FollowupMark {
            status_modified: modified_at(&handle.status_file).await,
        };
        handle
            .process
            .send_input(message)
            .await
            .map_err(SupervisorError::Runtime)?;
        handle.status = InstanceStatus::Running;
        handle.followup_mark = Some(mark);
        debug!("[{}] Sent followup to '{id}'", self.scope);
        Ok(())
    }

    /// Block until the worker needs input, finishes, the timeout elapses or
    /// `cancel` fires.
    ///
    /// Each tick checks, in order: timeout, process exit, status artifact.
    /// A fresh `waiting_for_followup` status ends the wait. The timeout is
    /// honoured to within one poll, and the report carries the measured
    /// wait. Cancellation leaves the worker running.
    pub async fn wait(
        &mut self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitReport, SupervisorError> {
        let scope = self.scope.clone();
        let poll_interval = self.poll_interval;
        let handle = self
            .instances
            .get_mut(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        if handle.status.is_terminal() {
            return Err(SupervisorError::Finished {
                id: id.to_string(),
                status: handle.status,
            });
        }

        info!(
            "[{scope}] Waiting for instance '{id}' (timeout {}s, status file {})",
            timeout.as_secs(),
            handle.status_file.display()
        );
        let start = Instant::now();
        let mut tick: u64 = 0;

        let report = loop {
            tick += 1;
            if tick % LOG_EVERY_N_TICKS == 1 {
                info!("[{scope}] Poll {tick} for '{id}'");
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break WaitReport::Timeout {
                    waited: elapsed,
                    last_response: realtime_excerpt(&handle.log_dir).await,
                };
            }

            match handle.process.try_exit_code() {
                Ok(Some(0)) => break WaitReport::Completed,
                Ok(Some(code)) => {
                    break WaitReport::Failed {
                        exit_code: Some(code),
                    };
                }
                Ok(None) => {}
                Err(e) => warn!("[{scope}] Exit check of '{id}' failed: {e}"),
            }

            match read_status(&handle.status_file).await {
                Ok(Some(InstanceStatus::WaitingForFollowup)) => {
                    let stale = match handle.followup_mark {
                        Some(mark) => {
                            modified_at(&handle.status_file).await == mark.status_modified
                        }
                        None => false,
                    };
                    if stale {
                        debug!("[{scope}] '{id}' has not picked up its followup yet");
                    } else {
                        info!("[{scope}] Instance '{id}' needs followup");
                        handle.followup_mark = None;
                        break WaitReport::NeedsFollowup {
                            last_response: final_result_excerpt(&handle.log_dir).await,
                        };
                    }
                }
                Ok(Some(InstanceStatus::Completed)) => break WaitReport::Completed,
                Ok(Some(InstanceStatus::Failed)) => break WaitReport::Failed { exit_code: None },
                Ok(Some(InstanceStatus::Starting | InstanceStatus::Running)) => {
                    handle.followup_mark = None;
                }
                Ok(None) => {}
                Err(e) => warn!("[{scope}] Status read for '{id}' failed: {e}"),
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{scope}] Wait for '{id}' cancelled");
                    break WaitReport::Cancelled;
                }
                _ = tokio::time::sleep(poll_interval.min(remaining)) => {}
            }
        };

        match report {
            WaitReport::Completed => handle.status = InstanceStatus::Completed,
            WaitReport::Failed { .. } => handle.status = InstanceStatus::Failed,
            WaitReport::NeedsFollowup { .. } => {
                handle.status = InstanceStatus::WaitingForFollowup;
            }
            WaitReport::Timeout { .. } | WaitReport::Cancelled => {}
        }
        Ok(report)
    }

    /// Registered instances ordered by start time.
    pub fn list(&self) -> Vec<InstanceSummary> {
        let mut rows: Vec<InstanceSummary> = self
            .instances
            .values()
            .map(|h| InstanceSummary {
                id: h.id.clone(),
                status: h.status,
                task: h.task.clone(),
                started_at: h.started_at,
            })
            .collect();
        rows.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        rows
    }

    /// Render the tail of a worker's conversation.
    ///
    /// The returned future owns what it needs, so the registry is not
    /// borrowed while the artifact is read.
    pub fn read_logs(
        &self,
        id: &str,
        tail: usize,
        max_tokens: Option<usize>,
    ) -> impl Future<Output = Result<String, SupervisorError>> + Send + 'static {
        let log_dir = self.instances.get(id).map(|h| h.log_dir.clone());
        let id = id.to_string();
        async move {
            let log_dir = log_dir.ok_or_else(|| SupervisorError::NotFound(id.clone()))?;
            match read_logs(&log_dir, tail, max_tokens).await {
                Ok(Some(text)) => Ok(text),
                Ok(None) => Ok(format!("No logs available yet for instance {id}")),
                Err(e) => Err(SupervisorError::Runtime(e)),
            }
        }
    }

    /// Stop every registered worker concurrently and clear the registry.
    pub async fn shutdown(&mut self) {
        if self.instances.is_empty() {
            return;
        }
        let mut handles: Vec<InstanceHandle> = self.instances.drain().map(|(_, h)| h).collect();
        info!(
            "[{}] Shutting down {} instance(s)",
            self.scope,
            handles.len()
        );
        let results = join_all(handles.iter_mut().map(|h| h.process.stop())).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                warn!("[{}] Stopping '{}' reported: {e}", self.scope, handle.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::runtime::{RuntimeFuture, SpawnedInstance};
    use std::sync::Mutex;

    /// Runtime whose workers never exit on their own. Status files are
    /// written by the tests.
    struct StubRuntime {
        stopped: Arc<Mutex<Vec<String>>>,
        inputs: Arc<Mutex<Vec<String>>>,
    }

    struct StubProcess {
        id: String,
        stopped: Arc<Mutex<Vec<String>>>,
        inputs: Arc<Mutex<Vec<String>>>,
    }

    impl InstanceRuntime for StubRuntime {
        fn spawn(&self, request: SpawnRequest) -> RuntimeFuture<'_, SpawnedInstance> {
            Box::pin(async move {
                if request.id == "broken" {
                    return Err("no such binary".to_string());
                }
                let log_dir = request.log_dir;
                std::fs::create_dir_all(&log_dir).map_err(|e| e.to_string())?;
                Ok(SpawnedInstance {
                    handle: Box::new(StubProcess {
                        id: request.id,
                        stopped: self.stopped.clone(),
                        inputs: self.inputs.clone(),
                    }),
                    status_file: log_dir.join("status.json"),
                    log_dir,
                })
            })
        }
    }

    impl InstanceProcess for StubProcess {
        fn try_exit_code(&mut self) -> Result<Option<i32>, String> {
            Ok(None)
        }

        fn send_input<'a>(&'a mut self, message: &'a str) -> RuntimeFuture<'a, ()> {
            self.inputs.lock().unwrap().push(message.to_string());
            Box::pin(async { Ok(()) })
        }

        fn stop(&mut self) -> RuntimeFuture<'_, ()> {
            self.stopped.lock().unwrap().push(self.id.clone());
            Box::pin(async { Ok(()) })
        }
    }

    fn supervisor(limit: Option<usize>) -> (Supervisor, tempfile::TempDir, Arc<Mutex<Vec<String>>>) {
        let dir = tempfile::tempdir().unwrap();
        let stopped = Arc::new(Mutex::new(Vec::new()));
        let runtime = StubRuntime {
            stopped: stopped.clone(),
            inputs: Arc::new(Mutex::new(Vec::new())),
        };
        (
            Supervisor::new("test", limit, dir.path(), Arc::new(runtime)),
            dir,
            stopped,
        )
    }

    #[tokio::test]
    async fn spawn_registers_running_instance() {
        let (mut sup, dir, _) = supervisor(None);
        sup.spawn("w1", "scan", dir.path().join("ws"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(sup.status("w1"), Some(InstanceStatus::Running));
        assert_eq!(sup.list().len(), 1);
        assert_eq!(sup.list()[0].task, "scan");
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let (mut sup, dir, _) = supervisor(None);
        sup.spawn("w1", "a", dir.path().into(), Duration::ZERO)
            .await
            .unwrap();
        let err = sup
            .spawn("w1", "b", dir.path().into(), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, SupervisorError::AlreadyExists("w1".into()));
        assert_eq!(sup.get("w1").unwrap().task, "a");
    }

    #[tokio::test]
    async fn runtime_failure_leaves_registry_empty() {
        let (mut sup, dir, _) = supervisor(None);
        let err = sup
            .spawn("broken", "x", dir.path().into(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Runtime(_)));
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn terminate_unknown_is_not_found() {
        let (mut sup, _dir, _) = supervisor(None);
        assert_eq!(
            sup.terminate("ghost").await,
            Err(SupervisorError::NotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn terminate_stops_and_removes() {
        let (mut sup, dir, stopped) = supervisor(None);
        sup.spawn("w1", "a", dir.path().into(), Duration::ZERO)
            .await
            .unwrap();
        sup.terminate("w1").await.unwrap();
        assert!(!sup.contains("w1"));
        assert_eq!(*stopped.lock().unwrap(), vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn followup_requires_accepting_state() {
        let (mut sup, dir, _) = supervisor(None);
        sup.spawn("w1", "a", dir.path().into(), Duration::ZERO)
            .await
            .unwrap();
        sup.send_followup("w1", "continue").await.unwrap();

        sup.instances.get_mut("w1").unwrap().status = InstanceStatus::Completed;
        let err = sup.send_followup("w1", "more").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotAcceptingInput { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sees_completed_status_file() {
        let (mut sup, dir, _) = supervisor(None);
        sup.spawn("w1", "a", dir.path().into(), Duration::ZERO)
            .await
            .unwrap();
        std::fs::write(dir.path().join("w1/status.json"), r#"{"status":"completed"}"#).unwrap();
        let report = sup
            .wait("w1", Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, WaitReport::Completed);
        assert_eq!(sup.status("w1"), Some(InstanceStatus::Completed));

        let err = sup
            .wait("w1", Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Finished { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_keeps_worker() {
        let (mut sup, dir, stopped) = supervisor(None);
        sup.spawn("w1", "a", dir.path().into(), Duration::ZERO)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = sup
            .wait("w1", Duration::from_secs(600), &cancel)
            .await
            .unwrap();
        assert_eq!(report, WaitReport::Cancelled);
        assert_eq!(sup.status("w1"), Some(InstanceStatus::Running));
        assert!(stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let (mut sup, dir, stopped) = supervisor(None);
        for id in ["a", "b", "c"] {
            sup.spawn(id, "t", dir.path().into(), Duration::ZERO)
                .await
                .unwrap();
        }
        sup.shutdown().await;
        assert!(sup.is_empty());
        let mut ids = stopped.lock().unwrap().clone();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
