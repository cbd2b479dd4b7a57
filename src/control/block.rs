//! Session control signals.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Lifecycle of a worker session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LifecycleState {
    #[default]
    Stopped = 0,
    Starting = 1,
    Running = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }

    /// Whether `next` is a legal successor. Staying in the same state is legal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopped)
                | (Self::Running, Self::Stopped)
        ) || self == next
    }
}

/// Control signals shared by a supervisor and its worker.
///
/// Every field is an independent atomic with one logical writer:
/// `exit_requested` is written by the supervisor, `refresh_requested` by the
/// supervisor or its stall detector (and cleared by the worker when consumed),
/// and the lifecycle by the worker.
#[derive(Debug, Default)]
pub struct ControlBlock {
    exit_requested: AtomicBool,
    refresh_requested: AtomicBool,
    lifecycle: AtomicU8,
    sleepers: Mutex<()>,
    exit_signal: Condvar,
}

impl ControlBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the exit flag and wake every [`sleep_unless_exit`](Self::sleep_unless_exit).
    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::Release);
        let _guard = self.sleepers.lock();
        self.exit_signal.notify_all();
    }

    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }

    pub fn request_refresh(&self) {
        self.refresh_requested.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn refresh_requested(&self) -> bool {
        self.refresh_requested.load(Ordering::Acquire)
    }

    /// Consume a pending refresh request. Returns `true` at most once per request.
    pub fn take_refresh(&self) -> bool {
        self.refresh_requested.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Move to `next` if the transition is legal. Returns whether the state is now `next`.
    pub fn transition(&self, next: LifecycleState) -> bool {
        let result = self
            .lifecycle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                LifecycleState::from_u8(raw)
                    .can_transition_to(next)
                    .then_some(next as u8)
            });

        match result {
            Ok(previous) => {
                let from = LifecycleState::from_u8(previous);
                if from != next {
                    tracing::debug!(?from, to = ?next, "Lifecycle transition");
                }
                true
            }
            Err(current) => {
                tracing::warn!(
                    from = ?LifecycleState::from_u8(current),
                    to = ?next,
                    "Rejected lifecycle transition"
                );
                false
            }
        }
    }

    /// Record that the worker is gone. Legal from every state.
    pub fn mark_stopped(&self) {
        self.lifecycle
            .store(LifecycleState::Stopped as u8, Ordering::Release);
    }

    /// Clear both signals and return to `Stopped`.
    pub fn reset(&self) {
        self.exit_requested.store(false, Ordering::Release);
        self.refresh_requested.store(false, Ordering::Release);
        self.mark_stopped();
    }

    /// Sleep for `duration`, waking early when an exit is requested.
    ///
    /// Returns `true` if an exit was requested before the sleep finished.
    pub fn sleep_unless_exit(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut guard = self.sleepers.lock();
        while !self.exit_requested() {
            match deadline {
                Some(deadline) => {
                    if self.exit_signal.wait_until(&mut guard, deadline).timed_out() {
                        return self.exit_requested();
                    }
                }
                None => self.exit_signal.wait(&mut guard),
            }
        }
        true
    }
}
