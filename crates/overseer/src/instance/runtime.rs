//! The worker process backend.
//!
//! [`InstanceRuntime`] launches a worker and hands back an
//! [`InstanceProcess`] handle plus the locations of its artifacts. The
//! supervisor never touches the OS directly, so tests can substitute a fake
//! runtime that writes status files on demand.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use super::artifacts::STATUS_FILE;

/// Boxed future returned by runtime and process operations.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// Parameters for launching one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub id: String,
    pub task: String,
    /// Directory the worker operates in.
    pub workspace: PathBuf,
    /// Where the worker writes its artifacts.
    pub log_dir: PathBuf,
    /// Run-time budget handed to the worker.
    pub duration: Duration,
    /// Specialist profile, passed as `--mode` when set.
    pub specialist: Option<String>,
}

/// A launched worker as seen by the supervisor.
pub struct SpawnedInstance {
    pub handle: Box<dyn InstanceProcess>,
    pub status_file: PathBuf,
    pub log_dir: PathBuf,
}

/// Launches workers.
pub trait InstanceRuntime: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> RuntimeFuture<'_, SpawnedInstance>;
}

/// A running worker.
pub trait InstanceProcess: Send {
    /// Exit code if the process has exited, `None` while it runs.
    fn try_exit_code(&mut self) -> Result<Option<i32>, String>;

    /// Deliver one follow-up message to the worker.
    fn send_input<'a>(&'a mut self, message: &'a str) -> RuntimeFuture<'a, ()>;

    /// Stop the worker and reap it.
    fn stop(&mut self) -> RuntimeFuture<'_, ()>;
}

// ── ProcessRuntime ─────────────────────────────────────────────────

/// Runs workers as child processes of this one.
///
/// The task is written to `<workspace>/task.md` and the worker is launched
/// as
///
/// ```text
/// <binary> autonomous --config-file <workspace>/task.md --duration <min> \
///     --logs-dir <log_dir> --full-auto [--mode <specialist>]
/// ```
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    worker_binary: PathBuf,
}

impl ProcessRuntime {
    pub fn new(worker_binary: impl Into<PathBuf>) -> Self {
        Self {
            worker_binary: worker_binary.into(),
        }
    }

    /// Build the worker command line without launching it.
    pub fn command_args(&self, request: &SpawnRequest) -> Vec<String> {
        let minutes = request.duration.as_secs().div_ceil(60).max(1);
        let mut args: Vec<String> = vec![
            "autonomous".into(),
            "--config-file".into(),
            request.workspace.join("task.md").display().to_string(),
            "--duration".into(),
            minutes.to_string(),
            "--logs-dir".into(),
            request.log_dir.display().to_string(),
            "--full-auto".into(),
        ];
        if let Some(ref specialist) = request.specialist {
            args.push("--mode".into());
            args.push(specialist.clone());
        }
        args
    }

    async fn launch(&self, request: SpawnRequest) -> Result<SpawnedInstance, String> {
        let log_dir = request.log_dir.clone();
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(|e| format!("failed to create log dir {}: {e}", log_dir.display()))?;
        tokio::fs::create_dir_all(&request.workspace)
            .await
            .map_err(|e| {
                format!(
                    "failed to create workspace {}: {e}",
                    request.workspace.display()
                )
            })?;

        let task_file = request.workspace.join("task.md");
        tokio::fs::write(&task_file, &request.task)
            .await
            .map_err(|e| format!("failed to write {}: {e}", task_file.display()))?;

        let args = self.command_args(&request);
        debug!(
            "Launching {} {}",
            self.worker_binary.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.worker_binary)
            .args(&args)
            .current_dir(&request.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to launch {}: {e}", self.worker_binary.display()))?;
        let stdin = child.stdin.take();

        info!(
            "Spawned worker '{}' (pid {:?}) logging to {}",
            request.id,
            child.id(),
            log_dir.display()
        );

        Ok(SpawnedInstance {
            handle: Box::new(ChildProcess { child, stdin }),
            status_file: log_dir.join(STATUS_FILE),
            log_dir,
        })
    }
}

impl InstanceRuntime for ProcessRuntime {
    fn spawn(&self, request: SpawnRequest) -> RuntimeFuture<'_, SpawnedInstance> {
        Box::pin(self.launch(request))
    }
}

/// A worker child process with a piped stdin.
struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl InstanceProcess for ChildProcess {
    fn try_exit_code(&mut self) -> Result<Option<i32>, String> {
        match self.child.try_wait() {
            // Killed by a signal: no code.
            Ok(Some(status)) => Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => Ok(None),
            Err(e) => Err(format!("failed to poll worker: {e}")),
        }
    }

    fn send_input<'a>(&'a mut self, message: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let stdin = self
                .stdin
                .as_mut()
                .ok_or_else(|| "worker stdin is closed".to_string())?;
            let line = format!("{}\n", message.replace('\n', " "));
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| format!("failed to write to worker stdin: {e}"))?;
            stdin
                .flush()
                .await
                .map_err(|e| format!("failed to flush worker stdin: {e}"))
        })
    }

    fn stop(&mut self) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.stdin = None;
            if let Ok(Some(_)) = self.child.try_wait() {
                return Ok(());
            }
            if let Err(e) = self.child.kill().await {
                warn!("Failed to kill worker: {e}");
                return Err(format!("failed to kill worker: {e}"));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_matches_worker_contract() {
        let runtime = ProcessRuntime::new("/bin/worker");
        let request = SpawnRequest {
            id: "w1".into(),
            task: "scan".into(),
            workspace: PathBuf::from("/tmp/session/workspaces/w1"),
            log_dir: PathBuf::from("/tmp/logs/w1"),
            duration: Duration::from_secs(90),
            specialist: None,
        };
        let args = runtime.command_args(&request);
        assert_eq!(
            args,
            vec![
                "autonomous",
                "--config-file",
                "/tmp/session/workspaces/w1/task.md",
                "--duration",
                "2",
                "--logs-dir",
                "/tmp/logs/w1",
                "--full-auto",
            ]
        );
    }

    #[test]
    fn sub_minute_durations_round_up_to_one() {
        let runtime = ProcessRuntime::new("w");
        let request = SpawnRequest {
            id: "x".into(),
            task: String::new(),
            workspace: PathBuf::from("ws"),
            log_dir: PathBuf::from("l"),
            duration: Duration::ZERO,
            specialist: None,
        };
        let args = runtime.command_args(&request);
        assert_eq!(args[4], "1");
    }

    #[test]
    fn specialist_becomes_mode_flag() {
        let runtime = ProcessRuntime::new("w");
        let request = SpawnRequest {
            id: "x".into(),
            task: String::new(),
            workspace: PathBuf::from("ws"),
            log_dir: PathBuf::from("l"),
            duration: Duration::from_secs(60),
            specialist: Some("linux-privesc".into()),
        };
        let args = runtime.command_args(&request);
        assert_eq!(args[args.len() - 2..], ["--mode", "linux-privesc"]);
    }

    #[tokio::test]
    async fn missing_binary_is_a_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ProcessRuntime::new(dir.path().join("no-such-worker"));
        let result = runtime
            .spawn(SpawnRequest {
                id: "w1".into(),
                task: "scan".into(),
                workspace: dir.path().join("ws"),
                log_dir: dir.path().join("instances/w1"),
                duration: Duration::from_secs(60),
                specialist: None,
            })
            .await;
        let Err(e) = result else {
            panic!("spawn should fail");
        };
        assert!(e.contains("failed to launch"));
        // Task file is written before launch.
        assert!(dir.path().join("ws/task.md").exists());
    }
}
