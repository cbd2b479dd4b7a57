//! IPC message types.
//!
//! Messages are JSON lines. A frame header line is followed by exactly `len`
//! raw pixel bytes.

use serde::{Deserialize, Serialize};

use crate::channel::Frame;
use crate::config::PixelFormat;
use crate::control::LifecycleState;

/// Largest pixel payload accepted from a worker (128 MiB).
pub const MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

/// Longest header line accepted from a worker, newline included.
pub const MAX_HEADER_BYTES: usize = 4096;

/// Signal sent from the supervisor to its worker over the worker's stdin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Finish the current iteration, close the source and exit.
    Exit,
    /// Close and reopen the source once.
    Refresh,
}

/// Header line sent from the worker to the supervisor over the worker's stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The worker changed its lifecycle state.
    State { state: LifecycleState },
    /// A frame follows; `len` pixel bytes come right after this line.
    Frame {
        index: u64,
        pts: Option<i64>,
        width: u32,
        height: u32,
        format: PixelFormat,
        len: usize,
    },
}

impl WorkerMessage {
    /// Header describing `frame`.
    #[must_use]
    pub fn frame_header(frame: &Frame) -> Self {
        Self::Frame {
            index: frame.index,
            pts: frame.pts,
            width: frame.meta.width,
            height: frame.meta.height,
            format: frame.meta.format,
            len: frame.data.len(),
        }
    }
}

/// Message decoded by the supervisor side.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    State(LifecycleState),
    Frame(Frame),
}

/// Errors that can occur during IPC.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Reading from or writing to the pipe failed.
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize a message.
    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A frame header announced a payload above [`MAX_FRAME_BYTES`].
    #[error("Frame payload of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// A header line ran past [`MAX_HEADER_BYTES`] without a newline.
    #[error("Header line exceeds {0} bytes")]
    HeaderTooLong(usize),

    /// A frame header's length disagrees with its geometry.
    #[error("Frame payload is {actual} bytes, geometry needs {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The stream ended inside a frame payload.
    #[error("Stream ended inside a frame payload")]
    Truncated,
}
