//! Decoded frame type.

use serde::{Deserialize, Serialize};

use crate::config::PixelFormat;

/// One decoded picture.
///
/// `data` holds `height * width * 3` bytes in row-major order. `index` grows
/// monotonically within a session; `pts` restarts whenever the source is
/// reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u64,
    pub pts: Option<i64>,
    pub meta: FrameMeta,
    pub data: Vec<u8>,
}

/// Geometry of a frame, carried separately from the pixel bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameMeta {
    /// Number of pixel bytes a frame with this geometry carries.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.format.bytes_per_pixel())
    }
}

impl Frame {
    #[must_use]
    pub fn new(index: u64, pts: Option<i64>, meta: FrameMeta, data: Vec<u8>) -> Self {
        Self {
            index,
            pts,
            meta,
            data,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.meta.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Whether the pixel buffer matches the declared geometry.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.meta.byte_len()
    }
}
