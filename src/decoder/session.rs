//! Decoder seam.
//!
//! Container and codec handling live behind these traits. The worker only
//! opens sessions, pulls frames and closes them again.

use crate::config::{OptionMap, PixelFormat, ScaleFilter};

/// Error type for decoder operations.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The source could not be opened.
    #[error("Failed to open {locator}: {reason}")]
    Open { locator: String, reason: String },
    /// The requested video stream does not exist.
    #[error("Video stream {0} not found")]
    StreamNotFound(u32),
    /// The source has no more frames.
    #[error("End of stream")]
    EndOfStream,
    /// There is no open session to decode from.
    #[error("No open session")]
    NotOpen,
    /// The decoded frame cannot be handed to the host in one message.
    #[error("Frame of {width}x{height} needs {len} bytes, limit is {max}")]
    FrameTooLarge {
        width: u32,
        height: u32,
        len: usize,
        max: usize,
    },
    /// The decoder failed on the current frame.
    #[error("Decoder error: {0}")]
    Decoder(String),
    /// I/O error while reading the source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output geometry and layout requested for each decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRequest {
    pub format: PixelFormat,
    /// Target width, 0 keeps the source width.
    pub width: u32,
    /// Target height, 0 keeps the source height.
    pub height: u32,
    pub filter: ScaleFilter,
}

/// A frame as returned by a decode session, already converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Frame index as counted by the session; restarts on every open.
    pub index: u64,
    pub pts: Option<i64>,
}

/// Options passed when opening a source.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions<'a> {
    /// Demuxer (container) options.
    pub format: &'a OptionMap,
    /// Per-stream decoder options.
    pub streams: &'a [OptionMap],
}

/// Factory for decode sessions.
pub trait MediaDecoder: Send {
    /// Open `locator` with the given options.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened.
    fn open(
        &self,
        locator: &str,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn DecodeSession>, DecodeError>;
}

/// One open source.
pub trait DecodeSession: Send {
    /// Select the video stream to decode.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::StreamNotFound` for an unknown index.
    fn select_stream(&mut self, index: u32) -> Result<(), DecodeError>;

    /// Hint how many decoder threads to use, 0 lets the decoder choose.
    fn set_thread_count(&mut self, threads: u32);

    /// Ask for low-latency output.
    fn set_low_latency(&mut self, enabled: bool);

    /// Decode exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns an error at end of stream or on any decode failure.
    fn next_frame(&mut self, request: &DecodeRequest) -> Result<DecodedFrame, DecodeError>;

    /// Release the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoder fails to release its resources.
    fn close(&mut self) -> Result<(), DecodeError>;
}
