//! Bounded latest-wins frame queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use super::Frame;

/// Outcome of [`FrameChannel::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was queued without evicting anything.
    Queued,
    /// The oldest frame was evicted to make room.
    ReplacedOldest,
    /// The queue stayed full after eviction; the new frame was dropped.
    Discarded,
    /// The channel is closed; the frame was dropped.
    Closed,
}

impl PushOutcome {
    /// Whether the pushed frame is now in the queue.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued | Self::ReplacedOldest)
    }
}

/// Bounded FIFO of frames that trades completeness for freshness.
///
/// Pushing never blocks: a full queue evicts its single oldest frame first.
/// Its length never exceeds the capacity. Reads never block either, except
/// [`recv_timeout`](Self::recv_timeout), which waits up to its deadline.
#[derive(Debug)]
pub struct FrameChannel {
    queue: ArrayQueue<Frame>,
    closed: AtomicBool,
    doorbell: Mutex<()>,
    ready: Condvar,
}

impl FrameChannel {
    /// Create a channel. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            doorbell: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a frame, evicting the oldest one if the queue is full.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = match self.queue.push(frame) {
            Ok(()) => PushOutcome::Queued,
            Err(frame) => {
                // A consumer may have drained the slot already; then this pop is a no-op.
                let _ = self.queue.pop();
                match self.queue.push(frame) {
                    Ok(()) => PushOutcome::ReplacedOldest,
                    Err(frame) => {
                        tracing::warn!(index = frame.index, "Frame queue is full, dropping frame");
                        PushOutcome::Discarded
                    }
                }
            }
        };

        if outcome.is_queued() {
            let _guard = self.doorbell.lock();
            self.ready.notify_one();
        }
        outcome
    }

    /// Take the oldest queued frame, or `None` when empty or closed.
    #[must_use]
    pub fn try_get(&self) -> Option<Frame> {
        if self.is_closed() {
            return None;
        }
        self.queue.pop()
    }

    /// Drain the queue and return only the newest frame.
    #[must_use]
    pub fn try_get_latest(&self) -> Option<Frame> {
        std::iter::from_fn(|| self.try_get()).last()
    }

    /// Wait up to `timeout` for a frame. Returns `None` on timeout or close.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.doorbell.lock();
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            if self.ready.wait_until(&mut guard, deadline).timed_out() {
                return self.try_get();
            }
        }
    }

    /// Close the channel, drop queued frames and wake any waiting reader.
    ///
    /// Closing twice is harmless.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        while self.queue.pop().is_some() {}
        let _guard = self.doorbell.lock();
        self.ready.notify_all();
    }
}
