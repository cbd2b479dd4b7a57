//! Frame Supervisor - media decoding isolated in a supervised worker process.

pub mod channel;
pub mod config;
pub mod control;
pub mod decoder;
pub mod ipc;
pub mod supervisor;
pub mod worker;
