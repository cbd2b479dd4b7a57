//! Synthetic `testsrc://` backend.
//!
//! Renders test patterns instead of decoding a real source, so the worker,
//! the supervisor and the CLI can run without a codec library. Locators look
//! like `testsrc://bars?width=320&height=240&fps=30&frames=0`.
//!
//! | Query key     | Meaning                                         | Default |
//! |---------------|-------------------------------------------------|---------|
//! | `width`       | native width                                    | 320     |
//! | `height`      | native height                                   | 240     |
//! | `fps`         | frame pacing, 0 renders as fast as possible     | 30      |
//! | `frames`      | frames per open before end of stream, 0 = never | 0       |
//! | `streams`     | number of selectable video streams              | 1       |
//! | `stall_after` | hang forever after this many frames             | never   |
//!
//! Patterns are `bars`, `gradient` and `solid`. Frames are rendered directly
//! at the requested size, so the scaling filter has no effect here.

use std::time::{Duration, Instant};

use url::Url;

use crate::config::PixelFormat;
use crate::decoder::{
    DecodeError, DecodeRequest, DecodeSession, DecodedFrame, MediaDecoder, OpenOptions,
};

/// URL scheme handled by [`TestPatternDecoder`].
pub const SCHEME: &str = "testsrc";

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_FPS: f64 = 30.0;
const PTS_CLOCK: f64 = 90_000.0;

const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Bars,
    Gradient,
    Solid,
}

#[derive(Debug, Clone, PartialEq)]
struct Params {
    pattern: Pattern,
    width: u32,
    height: u32,
    fps: f64,
    frames: u64,
    streams: u32,
    stall_after: Option<u64>,
}

impl Params {
    fn parse(locator: &str) -> Result<Self, DecodeError> {
        let open_error = |reason: String| DecodeError::Open {
            locator: locator.to_string(),
            reason,
        };

        let url = Url::parse(locator).map_err(|e| open_error(e.to_string()))?;
        if url.scheme() != SCHEME {
            return Err(open_error(format!(
                "no decoder backend for scheme '{}'",
                url.scheme()
            )));
        }

        let pattern = match url.host_str().unwrap_or("bars") {
            "bars" => Pattern::Bars,
            "gradient" => Pattern::Gradient,
            "solid" => Pattern::Solid,
            other => return Err(open_error(format!("unknown pattern '{other}'"))),
        };

        let mut params = Self {
            pattern,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            frames: 0,
            streams: 1,
            stall_after: None,
        };

        for (key, value) in url.query_pairs() {
            let bad = |_| open_error(format!("invalid value '{value}' for '{key}'"));
            match key.as_ref() {
                "width" => params.width = value.parse().map_err(bad)?,
                "height" => params.height = value.parse().map_err(bad)?,
                "frames" => params.frames = value.parse().map_err(bad)?,
                "streams" => params.streams = value.parse().map_err(bad)?,
                "stall_after" => params.stall_after = Some(value.parse().map_err(bad)?),
                "fps" => {
                    params.fps = value
                        .parse::<f64>()
                        .ok()
                        .filter(|fps| fps.is_finite() && *fps >= 0.0)
                        .ok_or_else(|| open_error(format!("invalid fps '{value}'")))?;
                }
                other => tracing::debug!(key = other, "Ignoring unknown testsrc parameter"),
            }
        }

        if params.width == 0 || params.height == 0 {
            return Err(open_error("width and height must be positive".to_string()));
        }
        Ok(params)
    }
}

/// Decoder backend producing synthetic frames for `testsrc://` locators.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPatternDecoder;

impl MediaDecoder for TestPatternDecoder {
    fn open(
        &self,
        locator: &str,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn DecodeSession>, DecodeError> {
        let params = Params::parse(locator)?;
        tracing::debug!(
            locator,
            demuxer_options = options.format.len(),
            stream_options = options.streams.len(),
            "Opened test pattern source"
        );
        Ok(Box::new(TestPatternSession {
            params,
            stream: None,
            produced: 0,
            low_latency: false,
            opened_at: Instant::now(),
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct TestPatternSession {
    params: Params,
    stream: Option<u32>,
    produced: u64,
    low_latency: bool,
    opened_at: Instant,
    closed: bool,
}

impl TestPatternSession {
    fn pace(&self) {
        if self.params.fps <= 0.0 || self.low_latency {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let due = Duration::from_secs_f64(self.produced as f64 / self.params.fps);
        if let Some(wait) = due.checked_sub(self.opened_at.elapsed()) {
            std::thread::sleep(wait);
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn pts(&self) -> i64 {
        if self.params.fps > 0.0 {
            (self.produced as f64 * PTS_CLOCK / self.params.fps) as i64
        } else {
            i64::try_from(self.produced).unwrap_or(i64::MAX)
        }
    }
}

impl DecodeSession for TestPatternSession {
    fn select_stream(&mut self, index: u32) -> Result<(), DecodeError> {
        if index >= self.params.streams {
            return Err(DecodeError::StreamNotFound(index));
        }
        self.stream = Some(index);
        Ok(())
    }

    fn set_thread_count(&mut self, threads: u32) {
        // Rendering is single threaded; the hint only shows up in the log.
        tracing::trace!(threads, "Decoder thread hint");
    }

    fn set_low_latency(&mut self, enabled: bool) {
        self.low_latency = enabled;
    }

    fn next_frame(&mut self, request: &DecodeRequest) -> Result<DecodedFrame, DecodeError> {
        if self.closed {
            return Err(DecodeError::NotOpen);
        }
        let stream = self.stream.unwrap_or(0);
        if self.params.frames > 0 && self.produced >= self.params.frames {
            return Err(DecodeError::EndOfStream);
        }
        if self.params.stall_after.is_some_and(|n| self.produced >= n) {
            tracing::debug!("Test pattern source stalled");
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }

        self.pace();

        let width = if request.width > 0 { request.width } else { self.params.width };
        let height = if request.height > 0 { request.height } else { self.params.height };
        let data = render(
            self.params.pattern,
            width,
            height,
            self.produced + u64::from(stream),
            request.format,
        );

        let frame = DecodedFrame {
            data,
            width,
            height,
            index: self.produced,
            pts: Some(self.pts()),
        };
        self.produced += 1;
        Ok(frame)
    }

    fn close(&mut self) -> Result<(), DecodeError> {
        self.closed = true;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn render(pattern: Pattern, width: u32, height: u32, tick: u64, format: PixelFormat) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (x_span, y_span) = (w.saturating_sub(1).max(1), h.saturating_sub(1).max(1));
    let mut data = Vec::with_capacity(w * h * format.bytes_per_pixel());

    for y in 0..h {
        for x in 0..w {
            let rgb = match pattern {
                Pattern::Bars => BARS[(x * BARS.len() / w + tick as usize) % BARS.len()],
                Pattern::Gradient => [
                    (x * 255 / x_span).min(255) as u8,
                    (y * 255 / y_span).min(255) as u8,
                    (tick % 256) as u8,
                ],
                Pattern::Solid => {
                    let level = (tick % 256) as u8;
                    [level, level, level]
                }
            };
            match format {
                PixelFormat::Rgb24 => data.extend_from_slice(&rgb),
                PixelFormat::Bgr24 => data.extend_from_slice(&[rgb[2], rgb[1], rgb[0]]),
            }
        }
    }
    data
}
