//! Session statistics and teardown reports.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Counters shared between the supervisor and its reader task.
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    empty_polls: AtomicU64,
    refreshes_requested: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn record_frame(&self, dropped: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            refreshes_requested: self.refreshes_requested.load(Ordering::Relaxed),
        }
    }
}

/// Session statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames read from the worker.
    pub frames_received: u64,
    /// Frames evicted from the host channel before anyone polled them.
    pub frames_dropped: u64,
    /// Polls that found no frame.
    pub empty_polls: u64,
    /// Refresh requests, explicit or from the stall detector.
    pub refreshes_requested: u64,
}

/// One step of the teardown sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    SignalExit,
    AwaitExit,
    ForceKill,
    JoinControl,
    JoinReader,
    ReapProcess,
}

impl TeardownStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignalExit => "signal_exit",
            Self::AwaitExit => "await_exit",
            Self::ForceKill => "force_kill",
            Self::JoinControl => "join_control",
            Self::JoinReader => "join_reader",
            Self::ReapProcess => "reap_process",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A teardown step that failed. Teardown carries on regardless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub error: String,
}

/// Outcome of [`Supervisor::stop`](crate::supervisor::Supervisor::stop).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Session that was torn down, `None` if there was nothing to stop.
    pub session_id: Option<Uuid>,
    /// The worker ignored the exit request and was killed.
    pub forced_kill: bool,
    /// Worker exit status, negative for a terminating signal.
    pub exit_status: Option<i32>,
    pub failures: Vec<TeardownFailure>,
    pub elapsed: Duration,
}

impl TeardownReport {
    pub(crate) fn for_session(session_id: Uuid) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    /// Log and keep a failed step.
    pub(crate) fn record_failure(&mut self, step: TeardownStep, error: impl fmt::Display) {
        let error = error.to_string();
        tracing::warn!(step = %step, error = %error, "Teardown step failed");
        self.failures.push(TeardownFailure { step, error });
    }

    /// No session was running.
    #[must_use]
    pub fn was_noop(&self) -> bool {
        self.session_id.is_none()
    }

    /// Every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failed(&self, step: TeardownStep) -> bool {
        self.failures.iter().any(|failure| failure.step == step)
    }
}
