//! Start, stop and liveness of supervised workers.

use std::time::Duration;

use frame_supervisor::control::LifecycleState;
use frame_supervisor::supervisor::{Poll, SpawnError, Supervisor, SupervisorError, WorkerCommand};

use super::{config, next_frame, supervisor, wait_for_state};

const SOURCE: &str = "testsrc://bars?width=16&height=8&fps=100";

#[tokio::test]
async fn start_then_stop() {
    let mut supervisor = supervisor(SOURCE);
    supervisor.start().await.expect("worker starts");
    assert!(supervisor.is_alive());
    assert!(supervisor.session_id().is_some());
    assert!(wait_for_state(&supervisor, LifecycleState::Running, Duration::from_secs(5)).await);

    let report = supervisor.stop().await;
    assert!(report.is_clean(), "teardown failures: {:?}", report.failures);
    assert!(!report.forced_kill);
    assert_eq!(report.exit_status, Some(0));
    assert!(!supervisor.is_alive());
    assert_eq!(supervisor.lifecycle(), LifecycleState::Stopped);
    assert_eq!(supervisor.session_id(), None);
    assert_eq!(supervisor.exit_status(), Some(0));
}

#[tokio::test]
async fn double_stop_is_idempotent() {
    let mut supervisor = supervisor(SOURCE);
    supervisor.start().await.unwrap();

    let first = supervisor.stop().await;
    let state_after_first = (supervisor.lifecycle(), supervisor.exit_status(), supervisor.stats());
    let second = supervisor.stop().await;

    assert!(!first.was_noop());
    assert!(second.was_noop());
    assert!(second.is_clean());
    assert_eq!(
        (supervisor.lifecycle(), supervisor.exit_status(), supervisor.stats()),
        state_after_first
    );
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn start_while_running_is_rejected() {
    let mut supervisor = supervisor(SOURCE);
    supervisor.start().await.unwrap();
    let session = supervisor.session_id();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert_eq!(supervisor.session_id(), session);
    assert!(supervisor.is_alive());

    supervisor.stop().await;
}

#[tokio::test]
async fn restart_after_stop_opens_new_session() {
    let mut supervisor = supervisor(SOURCE);
    supervisor.start().await.unwrap();
    let first = supervisor.session_id();
    supervisor.stop().await;

    supervisor.start().await.unwrap();
    let second = supervisor.session_id();
    assert!(second.is_some());
    assert_ne!(first, second);
    assert!(next_frame(&mut supervisor, Duration::from_secs(5)).await.is_some());

    supervisor.stop().await;
}

#[tokio::test]
async fn missing_worker_binary_fails_to_start() {
    let mut supervisor =
        Supervisor::with_worker(config(SOURCE), WorkerCommand::new("/nonexistent/worker"));
    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(SpawnError::NotFound(_))));
    assert!(!supervisor.is_alive());
    assert_eq!(supervisor.lifecycle(), LifecycleState::Stopped);
}

#[tokio::test]
async fn polling_without_session_is_illegal() {
    let mut supervisor = supervisor(SOURCE);
    assert!(matches!(
        supervisor.try_get(),
        Err(SupervisorError::IllegalState(_))
    ));

    supervisor.start().await.unwrap();
    supervisor.stop().await;
    assert!(matches!(
        supervisor.try_get(),
        Err(SupervisorError::IllegalState(_))
    ));
}

#[tokio::test]
async fn polling_dead_worker_is_illegal() {
    // A worker that exits on its own shortly after starting.
    let command = WorkerCommand::new("sleep").arg("0.2");
    let mut supervisor = Supervisor::with_worker(config(SOURCE), command);
    supervisor.start().await.unwrap();
    assert_eq!(supervisor.try_get().unwrap(), Poll::NotReady);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!supervisor.is_alive());
    assert!(wait_for_state(&supervisor, LifecycleState::Stopped, Duration::from_secs(2)).await);
    assert!(matches!(
        supervisor.try_get(),
        Err(SupervisorError::IllegalState(_))
    ));
    assert!(matches!(
        supervisor.latest(),
        Err(SupervisorError::IllegalState(_))
    ));
    assert!(supervisor.session_id().is_some());

    let report = supervisor.stop().await;
    assert!(!report.forced_kill);
    assert_eq!(report.exit_status, Some(0));
}

#[tokio::test]
async fn ensure_started_restarts_dead_worker() {
    let command = WorkerCommand::new("sleep").arg("0.2");
    let mut supervisor = Supervisor::with_worker(config(SOURCE), command);

    supervisor.ensure_started().await.unwrap();
    let first = supervisor.session_id();
    assert!(first.is_some());

    // Alive: nothing to do.
    supervisor.ensure_started().await.unwrap();
    assert_eq!(supervisor.session_id(), first);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!supervisor.is_alive());

    supervisor.ensure_started().await.unwrap();
    assert!(supervisor.is_alive());
    assert_ne!(supervisor.session_id(), first);

    supervisor.stop().await;
}

#[tokio::test]
async fn ensure_started_reports_create_failure() {
    let mut supervisor =
        Supervisor::with_worker(config(SOURCE), WorkerCommand::new("/nonexistent/worker"));
    let err = supervisor.ensure_started().await.unwrap_err();
    let SupervisorError::CreateProcess(inner) = err else {
        panic!("expected CreateProcess, got {err:?}");
    };
    assert!(matches!(*inner, SupervisorError::Spawn(_)));
    assert_eq!(supervisor.session_id(), None);
    assert_eq!(supervisor.lifecycle(), LifecycleState::Stopped);
}

#[tokio::test]
async fn config_changes_apply_to_next_session() {
    let mut supervisor = supervisor("testsrc://solid?width=4&height=4&fps=100");
    supervisor.start().await.unwrap();
    supervisor.facade_mut().set("width", "2").unwrap();
    supervisor.facade_mut().set("height", "2").unwrap();

    // The running session keeps its snapshot.
    let frame = next_frame(&mut supervisor, Duration::from_secs(5)).await.unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 4));
    supervisor.stop().await;

    supervisor.start().await.unwrap();
    let frame = next_frame(&mut supervisor, Duration::from_secs(5)).await.unwrap();
    assert_eq!((frame.width(), frame.height()), (2, 2));
    supervisor.stop().await;
}
