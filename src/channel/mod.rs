//! Frame hand-off between the decode loop and the host.

mod frame;
mod queue;

pub use frame::*;
pub use queue::*;
