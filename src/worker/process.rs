//! Entry point of the worker process.
//!
//! The worker reads control messages from stdin, writes state changes and
//! frames to stdout and logs to stderr. Three threads cooperate:
//!
//! - the main thread runs the [`DecodeWorker`] loop,
//! - a control thread applies stdin messages to the local [`ControlBlock`],
//! - a pump thread drains the local [`FrameChannel`] into stdout.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::channel::FrameChannel;
use crate::config::Config;
use crate::control::{ControlBlock, LifecycleState};
use crate::decoder::{default_decoder, MediaDecoder};
use crate::ipc::{parse_control, ControlMessage, FrameWriter, CONFIG_ENV};
use crate::worker::DecodeWorker;

/// How long the pump waits for a frame before re-checking the lifecycle.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for the worker process.
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    /// The configuration environment variable is not set.
    #[error("{CONFIG_ENV} is not set")]
    MissingConfig,
    /// The configuration could not be parsed.
    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
    /// A helper thread could not be started.
    #[error("Failed to start worker thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Read the session configuration handed over by the supervisor.
///
/// # Errors
///
/// Returns an error if the variable is missing or holds invalid JSON.
pub fn config_from_env() -> Result<Config, WorkerError> {
    let raw = std::env::var(CONFIG_ENV).map_err(|_| WorkerError::MissingConfig)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Run the worker on the process's standard streams with the default decoder.
///
/// # Errors
///
/// Returns an error if a thread cannot start.
pub fn run_worker(config: Config) -> Result<(), WorkerError> {
    run_worker_with(
        config,
        default_decoder(),
        BufReader::new(std::io::stdin()),
        BufWriter::new(std::io::stdout()),
    )
}

/// Run the worker loop against arbitrary control input and frame output.
///
/// Returns once an exit was requested (by message, or because the control
/// input closed) and the decode loop has shut down.
///
/// # Errors
///
/// Returns an error if a helper thread cannot be started.
pub fn run_worker_with<R, W>(
    config: Config,
    decoder: Box<dyn MediaDecoder>,
    control_input: R,
    output: W,
) -> Result<(), WorkerError>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let control = Arc::new(ControlBlock::new());
    let frames = Arc::new(FrameChannel::new(config.queue_capacity()));
    tracing::info!(
        pid = std::process::id(),
        src = %config.src,
        capacity = frames.capacity(),
        "Worker started"
    );

    // The pump must never report the initial `Stopped` to the supervisor.
    control.transition(LifecycleState::Starting);

    // The control thread stays blocked on stdin and is never joined.
    spawn_control_listener(Arc::clone(&control), control_input)?;
    let pump = spawn_pump(
        Arc::clone(&control),
        Arc::clone(&frames),
        FrameWriter::new(output),
    )?;

    let mut worker = DecodeWorker::new(config, decoder, Arc::clone(&control), Arc::clone(&frames));
    worker.run();

    frames.close();
    if pump.join().is_err() {
        tracing::error!("Frame pump panicked");
    }

    let stats = worker.stats();
    tracing::info!(
        frames = stats.frames_decoded,
        dropped = stats.frames_dropped,
        failures = stats.decode_failures,
        refreshes = stats.refreshes,
        "Worker finished"
    );
    Ok(())
}

fn spawn_control_listener<R>(control: Arc<ControlBlock>, input: R) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("control".to_string())
        .spawn(move || {
            for line in input.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "Control pipe read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_control(&line) {
                    Ok(ControlMessage::Exit) => {
                        tracing::info!("Exit requested");
                        control.request_exit();
                    }
                    Ok(ControlMessage::Refresh) => {
                        tracing::debug!("Refresh requested");
                        control.request_refresh();
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed control message"),
                }
            }

            // Without a control pipe the supervisor can no longer ask for an exit.
            if !control.exit_requested() {
                tracing::warn!("Control pipe closed, exiting");
                control.request_exit();
            }
        })
}

fn spawn_pump<W>(
    control: Arc<ControlBlock>,
    frames: Arc<FrameChannel>,
    mut writer: FrameWriter<W>,
) -> std::io::Result<JoinHandle<()>>
where
    W: Write + Send + 'static,
{
    std::thread::Builder::new()
        .name("frame-pump".to_string())
        .spawn(move || {
            let mut reported: Option<LifecycleState> = None;
            let mut frame_since_report = false;
            loop {
                // Closing happens after the final transition, so read it first.
                let closed = frames.is_closed();
                let state = control.lifecycle();
                // The final state always goes out last, after any frame.
                if reported != Some(state) || (closed && frame_since_report) {
                    if let Err(e) = writer.write_state(state) {
                        tracing::warn!(error = %e, "Output pipe closed, exiting");
                        control.request_exit();
                        return;
                    }
                    reported = Some(state);
                    frame_since_report = false;
                }

                if closed {
                    return;
                }

                if let Some(frame) = frames.recv_timeout(PUMP_POLL_INTERVAL) {
                    if let Err(e) = writer.write_frame(&frame) {
                        tracing::warn!(error = %e, "Output pipe closed, exiting");
                        control.request_exit();
                        return;
                    }
                    frame_since_report = true;
                }
            }
        })
}
