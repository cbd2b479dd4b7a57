//! Control signals and lifecycle state shared across the process boundary.

mod block;

pub use block::*;
