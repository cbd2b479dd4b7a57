//! IPC between the supervisor and its worker process.
//!
//! The worker's standard streams are the only channels between the two
//! processes:
//!
//! ```text
//! Supervisor                         Worker
//!     |                                 |
//!     |-- ControlMessage (stdin) ------>| (exit / refresh)
//!     |                                 |
//!     |<-- WorkerMessage (stdout) ------| (state changes, frame header + pixels)
//!     |                                 |
//! ```
//!
//! Control messages are JSON lines. Worker messages are JSON header lines;
//! a frame header is followed by its raw pixel bytes. The worker logs to
//! stderr only.

mod codec;
mod types;

pub use codec::*;
pub use types::*;

/// Environment variable carrying the JSON session configuration to the worker.
pub const CONFIG_ENV: &str = "FRAME_SUPERVISOR_CONFIG";
