//! Worker process: the decode loop and its process entry point.

mod decode;
mod process;

pub use decode::*;
pub use process::*;
