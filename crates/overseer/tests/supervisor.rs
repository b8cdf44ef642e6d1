mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{FakeRuntime, WorkerScript, write_final, write_status};
use overseer::instance::{InstanceStatus, Supervisor, SupervisorError, WaitReport};

fn supervisor(dir: &std::path::Path, limit: Option<usize>, script: WorkerScript) -> (Supervisor, Arc<FakeRuntime>) {
    let runtime = Arc::new(FakeRuntime::new(script));
    let supervisor = Supervisor::new("test", limit, dir.join("instances"), runtime.clone())
        .with_poll_interval(Duration::from_secs(2));
    (supervisor, runtime)
}

async fn spawn(supervisor: &mut Supervisor, dir: &std::path::Path, id: &str) -> Result<(), SupervisorError> {
    supervisor
        .spawn(id, "Enumerate the API", dir.join("ws").join(id), Duration::from_secs(600))
        .await
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_and_keeps_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, runtime) = supervisor(dir.path(), None, WorkerScript::Hang);
    spawn(&mut sup, dir.path(), "slow").await.unwrap();

    let timeout = Duration::from_secs(30);
    let started = Instant::now();
    let report = sup.wait("slow", timeout, &CancellationToken::new()).await.unwrap();
    let elapsed = started.elapsed();

    let WaitReport::Timeout { waited, ref last_response } = report else {
        panic!("expected timeout, got {report:?}");
    };
    assert!(waited >= timeout);
    assert!(waited <= elapsed);
    assert_eq!(last_response, "No response available");
    assert!(report.render("slow").starts_with("Timeout waiting for instance slow after 30s"));
    assert_eq!(sup.status("slow"), Some(InstanceStatus::Running));
    assert!(runtime.log().lock().unwrap().stopped.is_empty());
}

#[tokio::test(start_paused = true)]
async fn followup_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, runtime) = supervisor(
        dir.path(),
        None,
        WorkerScript::NeedsFollowup("Found /admin. Should I try default credentials?".into()),
    );
    spawn(&mut sup, dir.path(), "web-1").await.unwrap();
    let cancel = CancellationToken::new();

    let report = sup.wait("web-1", Duration::from_secs(300), &cancel).await.unwrap();
    assert_eq!(
        report,
        WaitReport::NeedsFollowup {
            last_response: "Found /admin. Should I try default credentials?".into()
        }
    );
    assert_eq!(sup.status("web-1"), Some(InstanceStatus::WaitingForFollowup));

    sup.send_followup("web-1", "Yes, try admin/admin").await.unwrap();
    assert_eq!(sup.status("web-1"), Some(InstanceStatus::Running));
    assert_eq!(
        runtime.log().lock().unwrap().inputs,
        vec![("web-1".to_string(), "Yes, try admin/admin".to_string())]
    );

    let report = sup.wait("web-1", Duration::from_secs(300), &cancel).await.unwrap();
    assert_eq!(report, WaitReport::Completed);
    assert_eq!(sup.status("web-1"), Some(InstanceStatus::Completed));
}

#[tokio::test]
async fn limit_bounds_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, runtime) = supervisor(dir.path(), Some(1), WorkerScript::Hang);
    spawn(&mut sup, dir.path(), "a").await.unwrap();

    let err = spawn(&mut sup, dir.path(), "b").await.unwrap_err();
    assert_eq!(err, SupervisorError::RegistryFull { limit: 1 });
    assert_eq!(sup.len(), 1);
    assert_eq!(runtime.log().lock().unwrap().spawned.len(), 1);

    sup.terminate("a").await.unwrap();
    spawn(&mut sup, dir.path(), "b").await.unwrap();
    assert!(sup.contains("b"));
}

#[tokio::test]
async fn failed_worker_cannot_be_waited_again() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _runtime) = supervisor(dir.path(), None, WorkerScript::Fail);
    spawn(&mut sup, dir.path(), "w").await.unwrap();
    let cancel = CancellationToken::new();

    let report = sup.wait("w", Duration::from_secs(60), &cancel).await.unwrap();
    assert_eq!(report, WaitReport::Failed { exit_code: None });
    assert!(!report.is_ok());

    let err = sup.wait("w", Duration::from_secs(60), &cancel).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Finished { .. }));
}

#[tokio::test]
async fn logs_render_the_final_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _runtime) = supervisor(
        dir.path(),
        None,
        WorkerScript::Complete("Two open ports: 22, 443".into()),
    );
    spawn(&mut sup, dir.path(), "scan").await.unwrap();

    let logs = sup.read_logs("scan", 50, None).await.unwrap();
    assert_eq!(logs, "[user] task\n[assistant] Two open ports: 22, 443");

    let missing = sup.read_logs("ghost", 50, None).await.unwrap_err();
    assert_eq!(missing, SupervisorError::NotFound("ghost".into()));
}

#[tokio::test]
async fn logs_before_any_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _runtime) = supervisor(dir.path(), None, WorkerScript::Hang);
    spawn(&mut sup, dir.path(), "fresh").await.unwrap();

    let logs = sup.read_logs("fresh", 50, None).await.unwrap();
    assert_eq!(logs, "No logs available yet for instance fresh");
}

#[tokio::test(start_paused = true)]
async fn short_timeout_returns_within_one_poll() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _runtime) = supervisor(dir.path(), None, WorkerScript::Hang);
    spawn(&mut sup, dir.path(), "idle").await.unwrap();
    let timeout = Duration::from_secs(1);
    let poll = Duration::from_secs(2);

    let started = Instant::now();
    let report = sup.wait("idle", timeout, &CancellationToken::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(elapsed <= timeout + poll, "overran to {elapsed:?}");
    let WaitReport::Timeout { waited, .. } = report else {
        panic!("expected timeout, got {report:?}");
    };
    assert!(waited >= timeout && waited <= elapsed);
}

#[tokio::test(start_paused = true)]
async fn status_flip_during_wait_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _runtime) = supervisor(dir.path(), None, WorkerScript::Hang);
    spawn(&mut sup, dir.path(), "web-2").await.unwrap();
    let log_dir = dir.path().join("instances").join("web-2");
    write_status(&log_dir.join("status.json"), "starting");

    let worker = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        write_final(&log_dir, "Login form found. Brute force it?");
        write_status(&log_dir.join("status.json"), "waiting_for_followup");
    });
    let started = Instant::now();
    let report = sup
        .wait("web-2", Duration::from_secs(60), &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();
    worker.await.unwrap();

    assert_eq!(
        report,
        WaitReport::NeedsFollowup {
            last_response: "Login form found. Brute force it?".into()
        }
    );
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed <= Duration::from_secs(7));
    assert_eq!(sup.status("web-2"), Some(InstanceStatus::WaitingForFollowup));
}

#[tokio::test(start_paused = true)]
async fn answered_question_is_not_reported_again() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _runtime) = supervisor(
        dir.path(),
        None,
        WorkerScript::Asks("Which host next?".into()),
    );
    spawn(&mut sup, dir.path(), "recon").await.unwrap();
    let cancel = CancellationToken::new();

    let report = sup.wait("recon", Duration::from_secs(300), &cancel).await.unwrap();
    assert_eq!(
        report,
        WaitReport::NeedsFollowup {
            last_response: "Which host next?".into()
        }
    );
    sup.send_followup("recon", "Try api.shop.example").await.unwrap();

    // The worker has not read its input, so the artifact still asks.
    let report = sup.wait("recon", Duration::from_secs(10), &cancel).await.unwrap();
    assert!(matches!(report, WaitReport::Timeout { .. }), "got {report:?}");
    assert_eq!(sup.status("recon"), Some(InstanceStatus::Running));

    let log_dir = dir.path().join("instances").join("recon");
    let worker = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        write_status(&log_dir.join("status.json"), "running");
        tokio::time::sleep(Duration::from_secs(4)).await;
        write_final(&log_dir, "api.shop.example is behind a WAF. Continue?");
        write_status(&log_dir.join("status.json"), "waiting_for_followup");
    });
    let report = sup.wait("recon", Duration::from_secs(300), &cancel).await.unwrap();
    worker.await.unwrap();

    assert_eq!(
        report,
        WaitReport::NeedsFollowup {
            last_response: "api.shop.example is behind a WAF. Continue?".into()
        }
    );
}
