//! Configuration module.

mod facade;
mod loader;
mod types;

pub use facade::*;
pub use loader::*;
pub use types::*;
