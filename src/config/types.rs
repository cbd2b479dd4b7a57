//! Configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Channel capacity used when the configured size is zero.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 4;

/// Graceful shutdown timeout used when the configured value is not positive.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(4);

/// Default delay between a decode failure and the reopen attempt.
pub const DEFAULT_RECONNECT_DELAY_SECS: f64 = 1.0;

/// Option map handed to the decoder (demuxer or per-stream options).
pub type OptionMap = BTreeMap<String, String>;

/// Target pixel layout of decoded frames. Every variant packs 3 bytes per pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgr24,
    Rgb24,
}

impl PixelFormat {
    /// Name used by the config protocol.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bgr24 => "bgr24",
            Self::Rgb24 => "rgb24",
        }
    }

    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgr24 | Self::Rgb24 => 3,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bgr24" => Ok(Self::Bgr24),
            "rgb24" => Ok(Self::Rgb24),
            other => Err(format!("unsupported pixel format '{other}'")),
        }
    }
}

/// Scaling filter applied when the target size differs from the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    FastBilinear,
    #[default]
    Bilinear,
    Bicubic,
    Experimental,
    Neighbor,
    Area,
    Bicublin,
    Gauss,
    Sinc,
    Lanczos,
    Spline,
}

impl ScaleFilter {
    pub const ALL: [Self; 11] = [
        Self::FastBilinear,
        Self::Bilinear,
        Self::Bicubic,
        Self::Experimental,
        Self::Neighbor,
        Self::Area,
        Self::Bicublin,
        Self::Gauss,
        Self::Sinc,
        Self::Lanczos,
        Self::Spline,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FastBilinear => "fast_bilinear",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Experimental => "experimental",
            Self::Neighbor => "neighbor",
            Self::Area => "area",
            Self::Bicublin => "bicublin",
            Self::Gauss => "gauss",
            Self::Sinc => "sinc",
            Self::Lanczos => "lanczos",
            Self::Spline => "spline",
        }
    }
}

impl fmt::Display for ScaleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScaleFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|filter| filter.as_str() == wanted)
            .ok_or_else(|| format!("unknown scaling filter '{wanted}'"))
    }
}

/// Configuration of one decoding session.
///
/// A supervisor snapshots this value on every start; the snapshot stays frozen
/// until the session is stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source locator handed to the decoder.
    pub src: String,
    /// Index of the video stream to decode.
    pub video_index: u32,
    /// Target pixel format.
    pub frame_format: PixelFormat,
    /// Target width, 0 keeps the source width.
    pub width: u32,
    /// Target height, 0 keeps the source height.
    pub height: u32,
    /// Scaling filter for size conversion.
    pub scale_filter: ScaleFilter,
    /// Demuxer (container) options.
    pub options: OptionMap,
    /// Per-stream decoder options, in stream order.
    pub stream_options: Vec<OptionMap>,
    /// Ask the decoder for low-latency output.
    pub low_delay: bool,
    /// Decoder thread count hint, 0 lets the decoder choose.
    pub decode_threads: u32,
    /// Seconds to wait after a decode failure before reopening.
    pub reconnect_delay: f64,
    /// Seconds to sleep after every loop iteration.
    pub iteration_sleep: f64,
    /// Frame channel capacity.
    pub max_queue_size: usize,
    /// Seconds to wait for a voluntary worker exit before killing it.
    pub exit_timeout_seconds: f64,
    /// Consecutive empty polls while running before a refresh is requested.
    pub stall_threshold: u32,
    /// Verbose worker logging.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src: String::new(),
            video_index: 0,
            frame_format: PixelFormat::default(),
            width: 0,
            height: 0,
            scale_filter: ScaleFilter::default(),
            options: OptionMap::new(),
            stream_options: Vec::new(),
            low_delay: false,
            decode_threads: 0,
            reconnect_delay: DEFAULT_RECONNECT_DELAY_SECS,
            iteration_sleep: 0.0,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            exit_timeout_seconds: DEFAULT_EXIT_TIMEOUT.as_secs_f64(),
            stall_threshold: 0,
            verbose: false,
        }
    }
}

impl Config {
    /// Frame channel capacity, never below one.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        if self.max_queue_size > 0 {
            self.max_queue_size
        } else {
            DEFAULT_MAX_QUEUE_SIZE
        }
    }

    /// Graceful shutdown timeout.
    #[must_use]
    pub fn exit_timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.exit_timeout_seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_EXIT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn reconnect_duration(&self) -> Duration {
        seconds(self.reconnect_delay)
    }

    #[must_use]
    pub fn iteration_duration(&self) -> Duration {
        seconds(self.iteration_sleep)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
