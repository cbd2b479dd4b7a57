//! Host side: worker process control and the session supervisor.

mod bridge;
mod process;
mod runner;
mod state;

pub use process::*;
pub use runner::*;
pub use state::*;
