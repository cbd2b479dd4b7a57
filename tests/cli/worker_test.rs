//! The hidden `worker` command speaking the pipe protocol directly.

use std::process::Stdio;
use std::time::Duration;

use frame_supervisor::config::Config;
use frame_supervisor::control::LifecycleState;
use frame_supervisor::ipc::{send_control, ControlMessage, FrameReader, Incoming, CONFIG_ENV};
use tokio::process::Command;

fn worker(config: &Config) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_frame-supervisor"));
    command
        .arg("worker")
        .env(CONFIG_ENV, serde_json::to_string(config).unwrap())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    command
}

#[tokio::test]
async fn worker_streams_until_exit_message() {
    let config = Config {
        src: "testsrc://bars?width=6&height=2&fps=100".to_string(),
        ..Config::default()
    };
    let mut child = worker(&config).spawn().unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut reader = FrameReader::new(child.stdout.take().unwrap());

    let mut states = Vec::new();
    let mut frames = 0;
    while frames < 3 {
        match reader.next().await.unwrap().expect("worker output") {
            Incoming::State(state) => states.push(state),
            Incoming::Frame(frame) => {
                assert_eq!(frame.data.len(), 6 * 2 * 3);
                frames += 1;
            }
        }
    }
    // Starting may be skipped when the source opens quickly.
    assert_eq!(states.last(), Some(&LifecycleState::Running));
    assert!(!states.contains(&LifecycleState::Stopped));

    send_control(&mut stdin, ControlMessage::Exit).await.unwrap();
    let mut last = None;
    while let Some(message) = reader.next().await.unwrap() {
        last = Some(message);
    }
    assert_eq!(last, Some(Incoming::State(LifecycleState::Stopped)));

    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn worker_exits_when_control_pipe_closes() {
    let config = Config {
        src: "testsrc://solid?width=2&height=2&fps=50".to_string(),
        ..Config::default()
    };
    let mut child = worker(&config).spawn().unwrap();
    let stdout = child.stdout.take().unwrap();
    drop(child.stdin.take());

    let drain = tokio::spawn(async move {
        let mut reader = FrameReader::new(stdout);
        while reader.next().await.unwrap().is_some() {}
    });

    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
    drain.await.unwrap();
}

#[tokio::test]
async fn worker_without_config_fails() {
    let status = Command::new(env!("CARGO_BIN_EXE_frame-supervisor"))
        .arg("worker")
        .env_remove(CONFIG_ENV)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert!(!status.success());
}
