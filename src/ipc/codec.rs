//! Encoding and decoding of the worker pipes.
//!
//! The worker side is synchronous (it runs next to a blocking decoder); the
//! supervisor side reads and writes through tokio.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::channel::{Frame, FrameMeta};
use crate::control::LifecycleState;
use crate::ipc::{
    ControlMessage, Incoming, IpcError, WorkerMessage, MAX_FRAME_BYTES, MAX_HEADER_BYTES,
};

/// Worker-side writer for state changes and frames.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a state change line.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe is closed or serialization fails.
    pub fn write_state(&mut self, state: LifecycleState) -> Result<(), IpcError> {
        self.write_header(&WorkerMessage::State { state })?;
        self.inner.flush()?;
        Ok(())
    }

    /// Write a frame header line followed by its pixel bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe is closed or serialization fails.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), IpcError> {
        self.write_header(&WorkerMessage::frame_header(frame))?;
        self.inner.write_all(&frame.data)?;
        self.inner.flush()?;
        Ok(())
    }

    fn write_header(&mut self, message: &WorkerMessage) -> Result<(), IpcError> {
        serde_json::to_writer(&mut self.inner, message)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Parse one control line read by the worker.
///
/// # Errors
///
/// Returns an error if the line is not a valid control message.
pub fn parse_control(line: &str) -> Result<ControlMessage, IpcError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Send a control message to the worker.
///
/// # Errors
///
/// Returns an error if the pipe is closed or serialization fails.
pub async fn send_control<W>(writer: &mut W, message: ControlMessage) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(&message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Supervisor-side reader of the worker's stdout.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read the next message. Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, malformed or overlong headers,
    /// oversized or inconsistent payloads, and streams that end inside a
    /// payload.
    pub async fn next(&mut self) -> Result<Option<Incoming>, IpcError> {
        loop {
            self.line.clear();
            let read = (&mut self.inner)
                .take(MAX_HEADER_BYTES as u64)
                .read_line(&mut self.line)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if read == MAX_HEADER_BYTES && !self.line.ends_with('\n') {
                return Err(IpcError::HeaderTooLong(MAX_HEADER_BYTES));
            }
            if self.line.trim().is_empty() {
                continue;
            }

            let message: WorkerMessage = serde_json::from_str(self.line.trim())?;
            return match message {
                WorkerMessage::State { state } => Ok(Some(Incoming::State(state))),
                WorkerMessage::Frame {
                    index,
                    pts,
                    width,
                    height,
                    format,
                    len,
                } => {
                    let meta = FrameMeta {
                        width,
                        height,
                        format,
                    };
                    let data = self.read_payload(meta, len).await?;
                    Ok(Some(Incoming::Frame(Frame::new(index, pts, meta, data))))
                }
            };
        }
    }

    async fn read_payload(&mut self, meta: FrameMeta, len: usize) -> Result<Vec<u8>, IpcError> {
        if len > MAX_FRAME_BYTES {
            return Err(IpcError::FrameTooLarge(len));
        }
        let expected = meta.byte_len();
        if len != expected {
            return Err(IpcError::LengthMismatch {
                expected,
                actual: len,
            });
        }

        let mut data = vec![0; len];
        self.inner
            .read_exact(&mut data)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => IpcError::Truncated,
                _ => IpcError::Io(e),
            })?;
        Ok(data)
    }
}
