//! Decoder seam and the built-in synthetic backend.

mod session;
mod testsrc;

pub use session::*;
pub use testsrc::{TestPatternDecoder, SCHEME as TEST_PATTERN_SCHEME};

/// Decoder used by the worker process.
#[must_use]
pub fn default_decoder() -> Box<dyn MediaDecoder> {
    Box::new(TestPatternDecoder)
}
