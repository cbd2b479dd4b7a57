//! Supervisor owning one worker process per session.
//!
//! The supervisor spawns the worker, forwards control signals to it, mirrors
//! its lifecycle and hands its frames to the caller. Teardown is an ordered
//! sequence of steps that each run regardless of earlier failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::channel::{Frame, FrameChannel};
use crate::config::{Config, ConfigFacade};
use crate::control::{ControlBlock, LifecycleState};
use crate::ipc::ControlMessage;
use crate::supervisor::bridge::{forward_control, mirror_worker_output};
use crate::supervisor::{
    SessionCounters, SessionStats, SpawnError, TeardownReport, TeardownStep, WorkerCommand,
    WorkerProcess,
};

/// How long teardown waits for each pipe task to finish.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long teardown waits to reap a worker that should already be gone.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// `start` was called while a worker is alive.
    #[error("Worker is already running")]
    AlreadyRunning,
    /// The worker process could not be spawned.
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] SpawnError),
    /// The worker was gone right after spawning.
    #[error("Worker exited immediately (status {status:?})")]
    ExitedOnStart { status: Option<i32> },
    /// The session configuration could not be handed to the worker.
    #[error("Failed to encode worker configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// `ensure_started` could not bring a worker up.
    #[error("Failed to create worker process: {0}")]
    CreateProcess(#[source] Box<SupervisorError>),
    /// The operation needs a live session and there is none.
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
    /// The worker's control pipe is gone.
    #[error("Worker control pipe is closed")]
    ControlClosed,
}

/// Result of a non-blocking poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    Frame(Frame),
    /// No frame is available right now.
    NotReady,
}

impl Poll {
    #[must_use]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::NotReady => None,
        }
    }
}

/// Everything owned by one running worker.
struct Session {
    id: Uuid,
    config: Config,
    control: Arc<ControlBlock>,
    frames: Arc<FrameChannel>,
    counters: Arc<SessionCounters>,
    process: WorkerProcess,
    control_tx: Option<UnboundedSender<ControlMessage>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    retained: Option<Frame>,
    empty_streak: u32,
}

impl Session {
    fn send(&self, message: ControlMessage) -> Result<(), SupervisorError> {
        self.control_tx
            .as_ref()
            .ok_or(SupervisorError::ControlClosed)?
            .send(message)
            .map_err(|_| SupervisorError::ControlClosed)
    }

    fn refresh(&self) -> Result<(), SupervisorError> {
        self.control.request_refresh();
        self.counters.record_refresh();
        self.send(ControlMessage::Refresh)
    }

    /// Track empty polls and ask for a refresh once the stream looks stalled.
    fn record_poll(&mut self, got_frame: bool) {
        if got_frame {
            self.empty_streak = 0;
            return;
        }
        self.counters.record_empty_poll();

        let threshold = self.config.stall_threshold;
        if threshold == 0 || self.control.lifecycle() != LifecycleState::Running {
            return;
        }
        self.empty_streak = self.empty_streak.saturating_add(1);
        if self.empty_streak >= threshold {
            self.empty_streak = 0;
            tracing::info!(session = %self.id, threshold, "Stream stalled, requesting refresh");
            if let Err(e) = self.refresh() {
                tracing::warn!(session = %self.id, error = %e, "Stall refresh not delivered");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Supervisor for a worker process decoding one source.
///
/// The configuration is a snapshot taken at `start`; changes made through
/// [`facade_mut`](Self::facade_mut) apply to the next session.
pub struct Supervisor {
    facade: ConfigFacade,
    command: WorkerCommand,
    session: Option<Session>,
    last_stats: SessionStats,
    last_exit: Option<i32>,
}

impl Supervisor {
    /// Create a supervisor that runs the current executable as its worker.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_worker(config, WorkerCommand::default())
    }

    /// Create a supervisor with a custom worker command.
    #[must_use]
    pub fn with_worker(config: Config, command: WorkerCommand) -> Self {
        Self {
            facade: ConfigFacade::new(config),
            command,
            session: None,
            last_stats: SessionStats::default(),
            last_exit: None,
        }
    }

    #[must_use]
    pub fn facade(&self) -> &ConfigFacade {
        &self.facade
    }

    pub fn facade_mut(&mut self) -> &mut ConfigFacade {
        &mut self.facade
    }

    #[must_use]
    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Spawn a worker for a new session.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyRunning` without side effects if a
    /// worker is alive, and a spawn error if the worker cannot be started or
    /// is already gone when probed right after spawning.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.is_alive() {
            return Err(SupervisorError::AlreadyRunning);
        }
        if self.session.is_some() {
            // The previous worker died; release what it left behind.
            self.stop().await;
        }

        let config = self.facade.snapshot();
        let payload = serde_json::to_string(&config)?;
        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %id);

        let control = Arc::new(ControlBlock::new());
        let frames = Arc::new(FrameChannel::new(config.queue_capacity()));
        let counters = Arc::new(SessionCounters::default());
        control.transition(LifecycleState::Starting);

        let mut process = WorkerProcess::spawn(&self.command, &payload).inspect_err(|e| {
            tracing::error!(session = %id, error = %e, "Worker spawn failed");
        })?;
        let stdin = process
            .take_stdin()
            .ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = process
            .take_stdout()
            .ok_or(SpawnError::MissingPipe("stdout"))?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(
            forward_control(stdin, control_rx, Arc::clone(&control)).instrument(span.clone()),
        );
        let reader = tokio::spawn(
            mirror_worker_output(
                stdout,
                Arc::clone(&control),
                Arc::clone(&frames),
                Arc::clone(&counters),
                cancel.clone(),
            )
            .instrument(span),
        );

        tracing::info!(
            session = %id,
            pid = process.id(),
            src = %config.src,
            capacity = frames.capacity(),
            "Worker started"
        );
        self.last_exit = None;
        self.session = Some(Session {
            id,
            config,
            control,
            frames,
            counters,
            process,
            control_tx: Some(control_tx),
            writer: Some(writer),
            reader: Some(reader),
            cancel,
            retained: None,
            empty_streak: 0,
        });

        if !self.is_alive() {
            let report = self.stop().await;
            tracing::error!(session = %id, status = ?report.exit_status, "Worker died on start");
            return Err(SupervisorError::ExitedOnStart {
                status: report.exit_status,
            });
        }
        Ok(())
    }

    /// Tear the current session down. Does nothing if there is none.
    ///
    /// Asks the worker to exit, waits up to the configured timeout, then
    /// kills its process group. Every step runs; failures are logged and
    /// collected in the returned report.
    pub async fn stop(&mut self) -> TeardownReport {
        let Some(mut session) = self.session.take() else {
            return TeardownReport::default();
        };
        let started = Instant::now();
        let timeout = session.config.exit_timeout();
        let mut report = TeardownReport::for_session(session.id);
        tracing::debug!(session = %session.id, ?timeout, "Stopping worker");

        // Signal exit. Dropping the sender lets the control task finish.
        session.control.request_exit();
        if let Err(e) = session.send(ControlMessage::Exit) {
            if session.process.is_running() {
                report.record_failure(TeardownStep::SignalExit, e);
            }
        }
        session.control_tx = None;

        // Wait for a graceful exit, then force it.
        let exited = match session.process.wait_timeout(timeout).await {
            Ok(status) => status.is_some(),
            Err(e) => {
                report.record_failure(TeardownStep::AwaitExit, e);
                false
            }
        };
        if !exited {
            tracing::warn!(session = %session.id, ?timeout, "Worker ignored exit request, killing");
            report.forced_kill = true;
            if let Err(e) = session.process.kill_tree().await {
                report.record_failure(TeardownStep::ForceKill, e);
            }
        }

        if let Some(writer) = session.writer.take() {
            if let Err(e) = join_task(writer).await {
                report.record_failure(TeardownStep::JoinControl, e);
            }
        }

        session.cancel.cancel();
        if let Some(reader) = session.reader.take() {
            if let Err(e) = join_task(reader).await {
                report.record_failure(TeardownStep::JoinReader, e);
            }
        }

        session.frames.close();

        match session.process.wait_timeout(REAP_TIMEOUT).await {
            Ok(Some(_)) => {}
            Ok(None) => report.record_failure(TeardownStep::ReapProcess, "worker still running"),
            Err(e) => report.record_failure(TeardownStep::ReapProcess, e),
        }
        report.exit_status = session.process.exit_code();

        session.control.reset();

        report.elapsed = started.elapsed();
        self.last_stats = session.counters.snapshot();
        self.last_exit = report.exit_status;
        log_exit(&report);
        report
    }

    /// Whether a worker exists and the OS reports it running.
    pub fn is_alive(&mut self) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.process.is_running())
    }

    /// Make sure a worker is running, restarting it if it died.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::CreateProcess` if no worker could be
    /// started; the supervisor is then stopped.
    pub async fn ensure_started(&mut self) -> Result<(), SupervisorError> {
        if self.is_alive() {
            return Ok(());
        }
        self.stop().await;
        self.start()
            .await
            .map_err(|e| SupervisorError::CreateProcess(Box::new(e)))
    }

    /// Take the oldest frame without blocking.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::IllegalState` if no session exists or its
    /// worker has stopped.
    pub fn try_get(&mut self) -> Result<Poll, SupervisorError> {
        let session = self.session_mut()?;
        let frame = session.frames.try_get();
        session.record_poll(frame.is_some());
        Ok(frame.map_or(Poll::NotReady, Poll::Frame))
    }

    /// Drain queued frames and return the newest frame seen by this method.
    ///
    /// Falls back to the previously returned frame when nothing new arrived.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::IllegalState` if no session exists or its
    /// worker has stopped.
    pub fn latest(&mut self) -> Result<Option<Frame>, SupervisorError> {
        let session = self.session_mut()?;
        let frame = session.frames.try_get_latest();
        session.record_poll(frame.is_some());
        if frame.is_some() {
            session.retained = frame;
        }
        Ok(session.retained.clone())
    }

    /// Ask the worker to close and reopen its source once.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::IllegalState` if no session exists and
    /// `SupervisorError::ControlClosed` if the worker can no longer be reached.
    pub fn request_refresh(&self) -> Result<(), SupervisorError> {
        let session = self
            .session
            .as_ref()
            .ok_or(SupervisorError::IllegalState("no session to refresh"))?;
        tracing::debug!(session = %session.id, "Refresh requested");
        session.refresh()
    }

    /// Lifecycle as last reported by the worker, `Stopped` without a session.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.session
            .as_ref()
            .map_or(LifecycleState::Stopped, |session| session.control.lifecycle())
    }

    /// Exit status of the last stopped worker, negative for a signal.
    #[must_use]
    pub fn exit_status(&self) -> Option<i32> {
        self.last_exit
    }

    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|session| session.id)
    }

    /// Statistics of the current session, or of the last one once stopped.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.session
            .as_ref()
            .map_or(self.last_stats, |session| session.counters.snapshot())
    }

    fn session_mut(&mut self) -> Result<&mut Session, SupervisorError> {
        let session = self
            .session
            .as_mut()
            .ok_or(SupervisorError::IllegalState("no session, call start first"))?;
        if session.control.lifecycle() == LifecycleState::Stopped {
            return Err(SupervisorError::IllegalState(
                "worker stopped, call ensure_started",
            ));
        }
        Ok(session)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("command", &self.command)
            .field("session", &self.session_id())
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

async fn join_task(handle: JoinHandle<()>) -> Result<(), String> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => {
            abort.abort();
            Err(format!("task did not finish within {TASK_JOIN_TIMEOUT:?}"))
        }
    }
}

fn log_exit(report: &TeardownReport) {
    let session = report.session_id.unwrap_or_default();
    match report.exit_status {
        Some(status) if status < 0 => tracing::info!(
            %session,
            signal = -status,
            forced = report.forced_kill,
            elapsed = ?report.elapsed,
            "Worker terminated by signal"
        ),
        Some(status) => tracing::info!(
            %session,
            status,
            forced = report.forced_kill,
            elapsed = ?report.elapsed,
            "Worker exited"
        ),
        None => tracing::warn!(%session, "Worker exit status unknown"),
    }
}
