//! Decode and reconnect loop run inside the worker process.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::channel::{Frame, FrameChannel, FrameMeta, PushOutcome};
use crate::config::Config;
use crate::control::{ControlBlock, LifecycleState};
use crate::decoder::{DecodeError, DecodeRequest, DecodeSession, MediaDecoder, OpenOptions};
use crate::ipc::MAX_FRAME_BYTES;

/// Where the loop is between two iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    /// The next iteration decodes a frame.
    #[default]
    Decoding,
    /// The last decode failed; the next iteration backs off and reopens.
    ReconnectPending,
}

/// Counters kept by a [`DecodeWorker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub decode_failures: u64,
    pub opens: u64,
    pub open_failures: u64,
    pub refreshes: u64,
    pub panics: u64,
}

/// Owns one decoder session and feeds a [`FrameChannel`] until told to exit.
///
/// Decode failures never end the loop. Every failure backs off for the
/// configured reconnect delay and reopens the source once; the next iteration
/// is the next retry. Only [`ControlBlock::request_exit`] stops the loop.
pub struct DecodeWorker {
    config: Config,
    request: DecodeRequest,
    decoder: Box<dyn MediaDecoder>,
    control: Arc<ControlBlock>,
    frames: Arc<FrameChannel>,
    session: Option<Box<dyn DecodeSession>>,
    state: LoopState,
    next_index: u64,
    stats: WorkerStats,
}

impl DecodeWorker {
    #[must_use]
    pub fn new(
        config: Config,
        decoder: Box<dyn MediaDecoder>,
        control: Arc<ControlBlock>,
        frames: Arc<FrameChannel>,
    ) -> Self {
        let request = DecodeRequest {
            format: config.frame_format,
            width: config.width,
            height: config.height,
            filter: config.scale_filter,
        };
        Self {
            config,
            request,
            decoder,
            control,
            frames,
            session: None,
            state: LoopState::Decoding,
            next_index: 0,
            stats: WorkerStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Open the configured source and select its video stream.
    ///
    /// The first successful open moves the lifecycle to `Running`.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if the source cannot be opened or the stream
    /// cannot be selected. The failure is logged and the session stays closed.
    pub fn open_session(&mut self) -> Result<(), DecodeError> {
        let options = OpenOptions {
            format: &self.config.options,
            streams: &self.config.stream_options,
        };

        let opened = self
            .decoder
            .open(&self.config.src, options)
            .and_then(|mut session| {
                session.select_stream(self.config.video_index)?;
                session.set_thread_count(self.config.decode_threads);
                if self.config.low_delay {
                    session.set_low_latency(true);
                }
                Ok(session)
            });

        match opened {
            Ok(session) => {
                self.session = Some(session);
                self.stats.opens += 1;
                tracing::info!(
                    src = %self.config.src,
                    video_index = self.config.video_index,
                    "Source opened"
                );
                self.control.transition(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                self.stats.open_failures += 1;
                tracing::warn!(src = %self.config.src, error = %e, "Failed to open source");
                Err(e)
            }
        }
    }

    /// Close the current session, if any. Close errors are logged.
    pub fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!(error = %e, "Failed to close source");
            } else {
                tracing::debug!("Source closed");
            }
        }
    }

    /// Close and reopen the source once. Returns whether the reopen succeeded.
    pub fn reopen(&mut self) -> bool {
        self.close_session();
        self.open_session().is_ok()
    }

    /// Run until an exit is requested, then close the source.
    pub fn run(&mut self) {
        self.control.transition(LifecycleState::Starting);
        tracing::info!(src = %self.config.src, "Decode loop started");

        // A failed first open is retried through the regular reconnect path.
        let _ = self.open_session();

        while !self.control.exit_requested() {
            let iteration = catch_unwind(AssertUnwindSafe(|| self.run_iteration()));
            if iteration.is_err() {
                self.stats.panics += 1;
                tracing::error!("Decoder panicked, reconnecting");
                // The session may be left in any state; drop it without closing.
                self.session = None;
                self.state = LoopState::ReconnectPending;
            }
        }

        self.close_session();
        self.control.transition(LifecycleState::Stopped);
        tracing::info!(
            frames = self.stats.frames_decoded,
            failures = self.stats.decode_failures,
            "Decode loop finished"
        );
    }

    /// Perform one loop iteration: refresh, decode or reconnect, idle sleep.
    pub fn run_iteration(&mut self) {
        if self.control.take_refresh() {
            self.stats.refreshes += 1;
            tracing::info!("Refresh requested, reopening source");
            // A failed refresh leaves the session closed; the decode below
            // then fails and takes the reconnect path.
            self.reopen();
            self.state = LoopState::Decoding;
        }

        if self.state == LoopState::Decoding {
            if let Err(e) = self.decode_one() {
                self.stats.decode_failures += 1;
                tracing::warn!(error = %e, "Decode failed");
                self.state = LoopState::ReconnectPending;
            }
        }

        if self.state == LoopState::ReconnectPending {
            let delay = self.config.reconnect_duration();
            if !delay.is_zero() && self.control.sleep_unless_exit(delay) {
                return;
            }
            tracing::info!(src = %self.config.src, "Reconnecting");
            self.reopen();
            self.state = LoopState::Decoding;
        }

        let idle = self.config.iteration_duration();
        if !idle.is_zero() {
            self.control.sleep_unless_exit(idle);
        }
    }

    fn decode_one(&mut self) -> Result<(), DecodeError> {
        let session = self.session.as_mut().ok_or(DecodeError::NotOpen)?;
        let decoded = session.next_frame(&self.request)?;

        let meta = FrameMeta {
            width: decoded.width,
            height: decoded.height,
            format: self.request.format,
        };
        // The host drops its end of the pipe on an oversized frame.
        if meta.byte_len() > MAX_FRAME_BYTES {
            return Err(DecodeError::FrameTooLarge {
                width: meta.width,
                height: meta.height,
                len: meta.byte_len(),
                max: MAX_FRAME_BYTES,
            });
        }
        let frame = Frame::new(self.next_index, decoded.pts, meta, decoded.data);
        if !frame.is_well_formed() {
            return Err(DecodeError::Decoder(format!(
                "frame buffer holds {} bytes, {}x{} needs {}",
                frame.data.len(),
                meta.width,
                meta.height,
                meta.byte_len()
            )));
        }

        tracing::trace!(index = frame.index, pts = ?frame.pts, "Pushing frame");
        self.next_index += 1;
        self.stats.frames_decoded += 1;
        match self.frames.push(frame) {
            PushOutcome::Queued => {}
            PushOutcome::ReplacedOldest | PushOutcome::Discarded | PushOutcome::Closed => {
                self.stats.frames_dropped += 1;
            }
        }
        Ok(())
    }
}
