//! Worker process spawning and control.
//!
//! [`WorkerCommand`] describes what to launch, [`WorkerProcess`] owns the
//! running child and provides the liveness, wait and kill primitives the
//! supervisor builds its lifecycle on.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::ipc::CONFIG_ENV;

/// Subcommand that turns the crate binary into a worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// How long to wait for the kernel to reap a killed worker.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The worker binary was not found.
    #[error("Worker binary not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    /// A standard stream was not captured.
    #[error("Worker {0} not available")]
    MissingPipe(&'static str),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, program: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// Program, arguments and environment used to launch a worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl WorkerCommand {
    /// A command running `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// The running executable with the worker subcommand.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable cannot be determined.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_SUBCOMMAND))
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an extra environment variable for the worker.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::current_exe().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Cannot resolve current executable, using PATH lookup");
            Self::new(env!("CARGO_PKG_NAME")).arg(WORKER_SUBCOMMAND)
        })
    }
}

/// A running worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    status: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Spawn a worker, handing it `config_json` through the environment.
    ///
    /// The worker gets piped stdin and stdout, inherits stderr and leads its
    /// own process group.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &WorkerCommand, config_json: &str) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(CONFIG_ENV, config_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(e, &command.program))?;
        tracing::debug!(
            program = %command.program.display(),
            pid = child.id(),
            "Worker spawned"
        );

        Ok(Self {
            child,
            status: None,
        })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Get the process ID, if not yet reaped.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the OS still reports the process as running.
    pub fn is_running(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot query worker state");
                false
            }
        }
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns `Ok(None)` if it is still running when the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.status = Some(status);
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Kill the process and everything in its process group, then reap it.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent or the process is
    /// not reaped in time.
    pub async fn kill_tree(&mut self) -> std::io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        self.kill_group()?;

        #[cfg(not(unix))]
        self.child.start_kill()?;

        match self.wait_timeout(KILL_REAP_TIMEOUT).await? {
            Some(_) => Ok(()),
            None => {
                // Fall back to the direct handle in case the group was gone.
                self.child.kill().await?;
                self.status = self.child.try_wait()?;
                Ok(())
            }
        }
    }

    #[cfg(unix)]
    fn kill_group(&self) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            return Ok(());
        };
        let group = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        match killpg(group, Signal::SIGKILL) {
            // The group may already be empty.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from(e)),
        }
    }

    /// Exit status once the process has been reaped.
    ///
    /// Negative values are the signal that terminated the process.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.status.map(exit_code)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the direct child.
        #[cfg(unix)]
        if self.status.is_none() {
            if let Err(e) = self.kill_group() {
                tracing::debug!(error = %e, "Worker group kill on drop failed");
            }
        }
    }
}

/// Flatten an exit status into one integer, negative for signals.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}
