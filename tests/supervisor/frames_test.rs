//! Frame delivery from worker processes.

use std::time::{Duration, Instant};

use frame_supervisor::config::PixelFormat;
use frame_supervisor::control::LifecycleState;
use frame_supervisor::supervisor::{Poll, Supervisor};

use super::{config, next_frame, supervisor, wait_for_state, worker};

#[tokio::test]
async fn frames_flow_from_test_pattern() {
    let mut supervisor = supervisor("testsrc://bars?width=16&height=8&fps=100");
    supervisor.start().await.unwrap();

    let mut indices = Vec::new();
    for _ in 0..5 {
        let frame = next_frame(&mut supervisor, Duration::from_secs(5))
            .await
            .expect("frame within timeout");
        assert_eq!((frame.width(), frame.height()), (16, 8));
        assert_eq!(frame.meta.format, PixelFormat::Bgr24);
        assert_eq!(frame.data.len(), 16 * 8 * 3);
        assert!(frame.is_well_formed());
        indices.push(frame.index);
    }
    assert!(indices.windows(2).all(|w| w[0] < w[1]), "{indices:?}");
    assert_eq!(supervisor.lifecycle(), LifecycleState::Running);

    supervisor.stop().await;
    assert!(supervisor.stats().frames_received >= 5);
}

#[tokio::test]
async fn output_format_and_size_follow_config() {
    let mut config = config("testsrc://gradient?width=64&height=48&fps=100");
    config.width = 8;
    config.height = 6;
    config.frame_format = PixelFormat::Rgb24;
    let mut supervisor = Supervisor::with_worker(config, worker());
    supervisor.start().await.unwrap();

    let frame = next_frame(&mut supervisor, Duration::from_secs(5)).await.unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 6));
    assert_eq!(frame.meta.format, PixelFormat::Rgb24);
    assert_eq!(frame.data.len(), 8 * 6 * 3);

    supervisor.stop().await;
}

#[tokio::test]
async fn invalid_locator_keeps_worker_retrying() {
    let mut supervisor = supervisor("rtsp://invalid.invalid/stream");
    supervisor.start().await.expect("start succeeds even for a bad source");

    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        assert_eq!(supervisor.try_get().unwrap(), Poll::NotReady);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(supervisor.is_alive());
    assert_ne!(supervisor.lifecycle(), LifecycleState::Running);
    assert!(supervisor.stats().empty_polls > 0);

    // The reconnect sleep is interruptible, so the exit is graceful.
    let report = supervisor.stop().await;
    assert!(!report.forced_kill);
    assert_eq!(report.exit_status, Some(0));
}

#[tokio::test]
async fn slow_consumer_sees_only_recent_frames() {
    let mut config = config("testsrc://solid?width=4&height=4&fps=0");
    config.max_queue_size = 2;
    let mut supervisor = Supervisor::with_worker(config, worker());
    supervisor.start().await.unwrap();
    assert!(wait_for_state(&supervisor, LifecycleState::Running, Duration::from_secs(5)).await);

    // Nobody polls for a while, so the host channel keeps evicting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(next_frame(&mut supervisor, Duration::from_secs(5)).await.is_some());
    let stats = supervisor.stats();
    assert!(stats.frames_dropped > 0, "{stats:?}");
    assert!(stats.frames_received > stats.frames_dropped);

    supervisor.stop().await;
}

#[tokio::test]
async fn latest_retains_newest_frame() {
    let mut supervisor = supervisor("testsrc://bars?width=4&height=2&fps=200");
    supervisor.start().await.unwrap();

    let mut newest = None;
    let deadline = Instant::now() + Duration::from_secs(5);
    while newest.is_none() && Instant::now() < deadline {
        newest = supervisor.latest().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let newest = newest.expect("a frame arrives");

    // Later calls never go back in time.
    for _ in 0..5 {
        let again = supervisor.latest().unwrap().expect("retained frame");
        assert!(again.index >= newest.index);
    }

    supervisor.stop().await;
}

#[tokio::test]
async fn refresh_keeps_frames_flowing() {
    let mut supervisor = supervisor("testsrc://bars?width=4&height=2&fps=100");
    supervisor.start().await.unwrap();
    let before = next_frame(&mut supervisor, Duration::from_secs(5)).await.unwrap();

    supervisor.request_refresh().unwrap();
    assert_eq!(supervisor.stats().refreshes_requested, 1);

    // Indices come from the worker and stay monotonic across reopens.
    let after = next_frame(&mut supervisor, Duration::from_secs(5)).await.unwrap();
    assert!(after.index > before.index);
    assert!(next_frame(&mut supervisor, Duration::from_secs(5)).await.is_some());

    let report = supervisor.stop().await;
    assert!(report.is_clean());
}

#[tokio::test]
async fn stall_detector_requests_refresh() {
    let mut config = config("testsrc://bars?width=4&height=2&fps=100&stall_after=3");
    config.stall_threshold = 10;
    config.exit_timeout_seconds = 0.3;
    let mut supervisor = Supervisor::with_worker(config, worker());
    supervisor.start().await.unwrap();
    assert!(wait_for_state(&supervisor, LifecycleState::Running, Duration::from_secs(5)).await);

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.stats().refreshes_requested == 0 && Instant::now() < deadline {
        let _ = supervisor.try_get().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(supervisor.stats().refreshes_requested >= 1);

    // The stalled decoder never sees the exit request.
    let report = supervisor.stop().await;
    assert!(report.forced_kill);
}
