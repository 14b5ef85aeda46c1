//! vrcwatch - VRChat log watcher.
//!
//! This binary tails the VRChat client log, reconstructs instance
//! sessions, and raises join notifications.
//!
//! # Commands
//!
//! - `vrcwatch run`: Start the watcher daemon
//!
//! # Environment Variables
//!
//! See the [`config`](vrcwatch::config) module for available
//! configuration options.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vrcwatch::classifier::LineClassifier;
use vrcwatch::config::Config;
use vrcwatch::dispatch::{Dispatcher, LogAlert, PushChannel};
use vrcwatch::session::SessionReconciler;
use vrcwatch::tailer::{LogTailer, TailerEvent};

/// Bound on the tailer-to-consumer channel. Deep enough to absorb a
/// burst of historical lines on startup.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Graceful shutdown timeout for the tailer task.
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Grace period for in-flight notification deliveries on shutdown.
const DELIVERY_GRACE_SECS: u64 = 5;

/// vrcwatch - VRChat log watcher.
///
/// Tails the VRChat client log, tracks who is in your instance, and
/// raises de-duplicated join notifications.
#[derive(Parser, Debug)]
#[command(name = "vrcwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    VRCWATCH_LOG_DIR         VRChat log directory (default: standard install path)
    VRCWATCH_COOLDOWN_SECS   Notification cooldown in seconds (default: 10)
    VRCWATCH_PUSH_URL        Push endpoint URL (optional)
    VRCWATCH_PUSH_TOKEN      Push endpoint bearer token (required with URL)

EXAMPLES:
    # Start the watcher against the default log directory
    vrcwatch run

    # Watch a custom directory with push notifications
    export VRCWATCH_LOG_DIR=/mnt/vrchat-logs
    export VRCWATCH_PUSH_URL=https://push.example/notify
    export VRCWATCH_PUSH_TOKEN=secret
    vrcwatch run
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the watcher daemon.
    ///
    /// Tails the newest VRChat log file and raises notifications until
    /// interrupted.
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_watcher())
        }
    }
}

/// Runs the watcher daemon.
async fn run_watcher() -> Result<()> {
    init_logging();

    info!("Starting vrcwatch");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        log_dir = %config.log_dir.display(),
        cooldown_secs = config.notify_cooldown.as_secs(),
        push = config.has_push(),
        "Configuration loaded"
    );

    let mut dispatcher = build_dispatcher(&config)?;
    let mut reconciler = SessionReconciler::new();

    let (event_tx, mut event_rx) = mpsc::channel::<TailerEvent>(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let tailer = LogTailer::new(
        config.log_dir.clone(),
        LineClassifier::new(),
        event_tx,
        cancel.clone(),
    );
    let tailer_handle = tokio::spawn(tailer.run());

    info!("Watcher running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                break;
            }

            event = event_rx.recv() => {
                match event {
                    Some(TailerEvent::Line(log_event)) => {
                        for request in reconciler.handle(log_event, Utc::now()) {
                            dispatcher.dispatch(request, Utc::now());
                        }
                    }
                    Some(TailerEvent::LogSwitched(path)) => {
                        info!(path = %path.display(), "Log rotated, resetting session state");
                        reconciler.reset("log switched");
                    }
                    None => {
                        warn!("Tailer channel closed unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    info!("Shutting down...");
    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), tailer_handle)
        .await
        .is_err()
    {
        warn!("Tailer did not stop within the shutdown timeout");
    }

    let abandoned = dispatcher
        .shutdown(Duration::from_secs(DELIVERY_GRACE_SECS))
        .await;
    if abandoned > 0 {
        error!(abandoned, "Some notifications could not be delivered");
    }

    info!("{}", reconciler.summary());
    info!("Watcher stopped");
    Ok(())
}

/// Builds the dispatcher from configuration. The desktop channel is
/// always present; push requires the URL/token pair.
fn build_dispatcher(config: &Config) -> vrcwatch::Result<Dispatcher<LogAlert, PushChannel>> {
    let push = match &config.push {
        Some(push) => Some(PushChannel::new(push.url.clone(), push.token.clone())?),
        None => None,
    };
    Ok(Dispatcher::new(
        config.notify_cooldown,
        Some(LogAlert),
        push,
    ))
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
