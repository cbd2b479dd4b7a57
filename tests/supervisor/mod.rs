//! Supervisor tests against real worker processes.

mod frames_test;
mod lifecycle_test;
mod teardown_test;

use std::time::{Duration, Instant};

use frame_supervisor::channel::Frame;
use frame_supervisor::config::Config;
use frame_supervisor::control::LifecycleState;
use frame_supervisor::supervisor::{Poll, Supervisor, WorkerCommand};

/// The crate binary in worker mode.
pub fn worker() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_frame-supervisor")).arg("worker")
}

/// Config with short delays so tests stay fast.
pub fn config(src: &str) -> Config {
    Config {
        src: src.to_string(),
        reconnect_delay: 0.05,
        exit_timeout_seconds: 3.0,
        ..Config::default()
    }
}

pub fn supervisor(src: &str) -> Supervisor {
    Supervisor::with_worker(config(src), worker())
}

/// Poll until a frame arrives or `timeout` elapses.
pub async fn next_frame(supervisor: &mut Supervisor, timeout: Duration) -> Option<Frame> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Poll::Frame(frame) = supervisor.try_get().expect("session exists") {
            return Some(frame);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

/// Wait until the mirrored lifecycle reaches `state`.
pub async fn wait_for_state(
    supervisor: &Supervisor,
    state: LifecycleState,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if supervisor.lifecycle() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Verify the public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use frame_supervisor::supervisor::{
        SessionStats, SpawnError, SupervisorError, TeardownFailure, TeardownReport, TeardownStep,
        WorkerProcess, WORKER_SUBCOMMAND,
    };

    let _ = SessionStats::default();
    let _ = TeardownReport::default();
    let _: fn() -> SupervisorError = || SupervisorError::AlreadyRunning;
    let _: fn() -> SpawnError = || SpawnError::MissingPipe("stdout");
    let _ = TeardownFailure {
        step: TeardownStep::ForceKill,
        error: String::new(),
    };
    let _: Option<WorkerProcess> = None;
    assert_eq!(worker().get_args(), [WORKER_SUBCOMMAND]);
}
