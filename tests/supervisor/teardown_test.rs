//! Bounded teardown of cooperative and uncooperative workers.

use std::time::Duration;

use frame_supervisor::config::Config;
use frame_supervisor::control::LifecycleState;
use frame_supervisor::supervisor::{Supervisor, TeardownStep, WorkerCommand};

use super::{supervisor, wait_for_state};

/// A worker that never reads its control pipe.
fn deaf_supervisor(exit_timeout_seconds: f64) -> Supervisor {
    let config = Config {
        src: "testsrc://bars".to_string(),
        exit_timeout_seconds,
        ..Config::default()
    };
    Supervisor::with_worker(config, WorkerCommand::new("sleep").arg("30"))
}

#[tokio::test]
async fn uncooperative_worker_is_killed_after_timeout() {
    let timeout = Duration::from_millis(500);
    let mut supervisor = deaf_supervisor(timeout.as_secs_f64());
    supervisor.start().await.unwrap();

    let report = supervisor.stop().await;
    assert!(report.forced_kill);
    assert!(!report.failed(TeardownStep::ForceKill));
    assert!(report.elapsed >= timeout, "{:?}", report.elapsed);
    assert!(
        report.elapsed < timeout + Duration::from_millis(2500),
        "{:?}",
        report.elapsed
    );
    #[cfg(unix)]
    assert_eq!(report.exit_status, Some(-9));
    assert!(!supervisor.is_alive());
    assert_eq!(supervisor.lifecycle(), LifecycleState::Stopped);
}

#[test]
fn non_positive_timeout_falls_back_to_default() {
    let supervisor = deaf_supervisor(0.0);
    assert_eq!(
        supervisor.facade().config().exit_timeout(),
        frame_supervisor::config::DEFAULT_EXIT_TIMEOUT
    );
}

#[tokio::test]
async fn cooperative_worker_exits_well_before_timeout() {
    let mut supervisor = supervisor("testsrc://bars?width=8&height=8&fps=30");
    supervisor.start().await.unwrap();
    assert!(wait_for_state(&supervisor, LifecycleState::Running, Duration::from_secs(5)).await);

    let report = supervisor.stop().await;
    assert!(!report.forced_kill);
    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(report.elapsed < Duration::from_secs(3));
    assert_eq!(report.exit_status, Some(0));
}

#[tokio::test]
async fn stop_after_worker_death_is_clean() {
    let mut supervisor =
        Supervisor::with_worker(Config::default(), WorkerCommand::new("sleep").arg("0.1"));
    supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let report = supervisor.stop().await;
    assert!(!report.forced_kill);
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.exit_status, Some(0));

    // The next start is not blocked by the old session.
    supervisor.start().await.unwrap();
    assert!(supervisor.is_alive());
    supervisor.stop().await;
}
