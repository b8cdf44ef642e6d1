//! Workspace-local shell and file actions used during triage validation.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

/// Wall-clock limit for one `exec_command` call.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `sh -c <command>` inside `workdir` and render its output.
///
/// A non-zero exit is still a successful call: the exit code is part of the
/// rendered text. Only spawn failures and timeouts are errors.
pub async fn exec_command(workdir: &Path, command: &str, timeout: Duration) -> Result<String, String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("exec in {}: {command}", workdir.display());
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("failed to execute command: {e}")),
        Err(_) => {
            warn!("Command timed out after {}s: {command}", timeout.as_secs());
            return Err(format!("command timed out after {} seconds", timeout.as_secs()));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output
        .status
        .code()
        .map_or_else(|| "killed by signal".to_string(), |c| c.to_string());
    Ok(format!(
        "Command: {command}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}\nExit code: {code}"
    ))
}

/// Resolve `filename` under `workdir`, refusing absolute paths and `..`.
pub fn resolve_in_workspace(workdir: &Path, filename: &str) -> Result<PathBuf, String> {
    let rel = Path::new(filename);
    if filename.trim().is_empty() {
        return Err("filename must not be empty".to_string());
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(format!(
                    "filename '{filename}' must be a relative path inside the workspace"
                ));
            }
        }
    }
    Ok(workdir.join(rel))
}

/// Write a file inside the workspace, creating parent directories.
pub async fn create_test_file(workdir: &Path, filename: &str, content: &str) -> Result<PathBuf, String> {
    let path = resolve_in_workspace(workdir, filename)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    Ok(path)
}
