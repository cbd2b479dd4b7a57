//! Frame Supervisor - media decoding isolated in a supervised worker process.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use frame_supervisor::config::{split_option, ConfigError, ConfigFacade, ConfigLoader, LoadError};
use frame_supervisor::control::LifecycleState;
use frame_supervisor::supervisor::{Poll, Supervisor, SupervisorError};
use frame_supervisor::worker::{config_from_env, run_worker, WorkerError};

/// How often `run` prints a progress line.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "frame-supervisor",
    about = "Decode media in a supervised worker process",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a source in a worker process and report frame statistics.
    Run {
        /// Source locator, overriding the configuration file.
        src: Option<String>,
        #[command(flatten)]
        config: ConfigArgs,
        /// Seconds to run before stopping. Runs until Ctrl-C when omitted.
        #[arg(short, long)]
        duration: Option<f64>,
        /// Seconds between polls.
        #[arg(long, default_value_t = 0.005)]
        poll_interval: f64,
    },
    /// Print one configuration value.
    Get {
        key: String,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print every configuration key with its value.
    Keys {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Run as a worker process.
    #[command(hide = true)]
    Worker,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Configuration file. Defaults to the standard search path.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override a configuration value, e.g. `--set width=640`.
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("Configuration file not found: {}", .0.display())]
    MissingConfigFile(PathBuf),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Expected KEY=VALUE, got {0:?}")]
    InvalidOverride(String),
    #[error("Invalid duration: {0}")]
    InvalidDuration(f64),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Worker stdout carries frames, so logs always go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(args: ConfigArgs) -> Result<ConfigFacade, CliError> {
    let loader = match args.config {
        Some(path) if !path.exists() => return Err(CliError::MissingConfigFile(path)),
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };

    let mut facade = ConfigFacade::new(loader.load()?);
    for item in &args.set {
        let (key, value) =
            split_option(item).ok_or_else(|| CliError::InvalidOverride(item.clone()))?;
        facade.set(key, value)?;
    }
    Ok(facade)
}

fn seconds(value: f64) -> Result<Duration, CliError> {
    Duration::try_from_secs_f64(value).map_err(|_| CliError::InvalidDuration(value))
}

async fn run(
    mut facade: ConfigFacade,
    src: Option<String>,
    duration: Option<f64>,
    poll_interval: f64,
) -> Result<(), CliError> {
    if let Some(src) = src {
        facade.set("src", &src)?;
    }
    let deadline = duration
        .map(seconds)
        .transpose()?
        .map(|duration| Instant::now() + duration);
    let mut ticker = tokio::time::interval(seconds(poll_interval)?.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut supervisor = Supervisor::new(facade.snapshot());
    supervisor.start().await?;
    tracing::info!(session = ?supervisor.session_id(), "Supervisor running");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut frames: u64 = 0;
    let mut last_report = Instant::now();
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        if !supervisor.is_alive() || supervisor.lifecycle() == LifecycleState::Stopped {
            tracing::warn!(session = ?supervisor.session_id(), "Worker gone, restarting");
            // Output may end before the process does; drop the session first.
            supervisor.stop().await;
            if let Err(e) = supervisor.ensure_started().await {
                outcome = Err(e.into());
                break;
            }
        }

        match supervisor.try_get() {
            Ok(Poll::Frame(frame)) => {
                frames += 1;
                tracing::debug!(
                    index = frame.index,
                    pts = frame.pts,
                    width = frame.width(),
                    height = frame.height(),
                    "Frame"
                );
            }
            Ok(Poll::NotReady) => {}
            // The worker stopped since the check above; restart on the next tick.
            Err(SupervisorError::IllegalState(reason)) => {
                tracing::debug!(reason, "Poll skipped");
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = Instant::now();
            let stats = supervisor.stats();
            println!(
                "state={:?} frames={frames} received={} dropped={} refreshes={}",
                supervisor.lifecycle(),
                stats.frames_received,
                stats.frames_dropped,
                stats.refreshes_requested,
            );
        }
    }

    let report = supervisor.stop().await;
    let stats = supervisor.stats();
    println!(
        "stopped frames={frames} received={} dropped={} exit_status={} forced_kill={} teardown_failures={}",
        stats.frames_received,
        stats.frames_dropped,
        report
            .exit_status
            .map_or_else(|| "unknown".to_string(), |status| status.to_string()),
        report.forced_kill,
        report.failures.len(),
    );
    outcome
}

fn run_worker_process(verbosity: u8) -> Result<(), CliError> {
    let config = config_from_env()?;
    init_tracing(if config.verbose { verbosity.max(2) } else { verbosity });
    run_worker(config)?;
    Ok(())
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    if !matches!(cli.command, Commands::Worker) {
        init_tracing(cli.verbose);
    }
    match cli.command {
        Commands::Worker => run_worker_process(cli.verbose),
        Commands::Run {
            src,
            config,
            duration,
            poll_interval,
        } => {
            let facade = load_config(config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(facade, src, duration, poll_interval))
        }
        Commands::Get { key, config } => {
            let facade = load_config(config)?;
            println!("{}", facade.get(&key)?);
            Ok(())
        }
        Commands::Keys { config } => {
            let facade = load_config(config)?;
            for key in ConfigFacade::KEYS {
                println!("{key} = {}", facade.get(key)?);
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
