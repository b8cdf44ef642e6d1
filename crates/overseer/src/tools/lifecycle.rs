//! Executes [`LifecycleAction`]s against a scope's [`Supervisor`].

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::actions::{LifecycleAction, SpawnInstanceArgs};
use super::core::ActionOutput;
use crate::instance::Supervisor;
use crate::instance::logs::DEFAULT_TAIL_LINES;

/// Where a spawned worker operates.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspacePlacement {
    /// Each worker gets `<root>/<id>/`.
    PerInstance(PathBuf),
    /// Every worker shares one directory (the triage workspace).
    Shared(PathBuf),
}

impl WorkspacePlacement {
    pub fn workspace_for(&self, id: &str) -> PathBuf {
        match self {
            Self::PerInstance(root) => root.join(id),
            Self::Shared(dir) => dir.clone(),
        }
    }
}

/// Scope-specific defaults applied when the model omits optional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleDefaults {
    pub spawn_duration: Duration,
    pub wait_timeout: Duration,
    pub placement: WorkspacePlacement,
}

/// Convert a model-supplied minute count, falling back on nonsense values.
pub fn minutes(value: Option<f64>, default: Duration) -> Duration {
    match value {
        Some(m) if m.is_finite() && m > 0.0 => {
            Duration::try_from_secs_f64(m * 60.0).unwrap_or(default)
        }
        _ => default,
    }
}

/// Spawn a worker, optionally under a specialist profile.
pub async fn spawn(
    supervisor: &mut Supervisor,
    args: SpawnInstanceArgs,
    defaults: &LifecycleDefaults,
    specialist: Option<&str>,
) -> ActionOutput {
    let duration = minutes(args.duration_minutes, defaults.spawn_duration);
    let workspace = defaults.placement.workspace_for(&args.instance_id);
    let budget = duration.as_secs().div_ceil(60).max(1);
    match supervisor
        .spawn_as(
            &args.instance_id,
            &args.task_description,
            workspace,
            duration,
            specialist,
        )
        .await
    {
        Ok(()) => match specialist {
            Some(name) => ActionOutput::ok(format!(
                "Spawned instance {} as {name} ({budget} minute budget)",
                args.instance_id
            )),
            None => ActionOutput::ok(format!(
                "Spawned instance {} ({budget} minute budget)",
                args.instance_id
            )),
        },
        Err(e) => ActionOutput::err(e.to_string()),
    }
}

/// Run one lifecycle action. Structural errors become error outputs.
pub async fn execute(
    supervisor: &mut Supervisor,
    action: LifecycleAction,
    defaults: &LifecycleDefaults,
    cancel: &CancellationToken,
) -> ActionOutput {
    match action {
        LifecycleAction::Spawn(args) => spawn(supervisor, args, defaults, None).await,
        LifecycleAction::Terminate(args) => match supervisor.terminate(&args.instance_id).await {
            Ok(()) => ActionOutput::ok(format!("Terminated instance {}", args.instance_id)),
            Err(e) => ActionOutput::err(e.to_string()),
        },
        LifecycleAction::SendFollowup(args) => {
            match supervisor
                .send_followup(&args.instance_id, &args.message)
                .await
            {
                Ok(()) => ActionOutput::ok(format!(
                    "Sent followup to instance {}. Use wait_for_instance to get the response.",
                    args.instance_id
                )),
                Err(e) => ActionOutput::err(e.to_string()),
            }
        }
        LifecycleAction::List => {
            let rows = supervisor.list();
            if rows.is_empty() {
                return ActionOutput::ok("No instances running");
            }
            let mut text = format!("{} instance(s):", rows.len());
            for row in rows {
                let task: String = row.task.chars().take(80).collect();
                text.push_str(&format!(
                    "\n- {} [{}] started {}: {task}",
                    row.id,
                    row.status,
                    row.started_at.format("%H:%M:%S")
                ));
            }
            ActionOutput::ok(text)
        }
        LifecycleAction::ReadLogs(args) => {
            let tail = args.tail_lines.map_or(DEFAULT_TAIL_LINES, |n| n as usize);
            let max_tokens = args.max_tokens.map(|n| n as usize);
            supervisor
                .read_logs(&args.instance_id, tail, max_tokens)
                .await
                .into()
        }
        LifecycleAction::Wait(args) => {
            let timeout = minutes(args.timeout_minutes, defaults.wait_timeout);
            match supervisor.wait(&args.instance_id, timeout, cancel).await {
                Ok(report) => {
                    let text = report.render(&args.instance_id);
                    if report.is_ok() {
                        ActionOutput::ok(text)
                    } else {
                        ActionOutput::err(text)
                    }
                }
                Err(e) => ActionOutput::err(e.to_string()),
            }
        }
    }
}
