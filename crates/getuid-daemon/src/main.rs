//! getuid Daemon
//!
//! Bridges a slow, line-oriented token source (e.g. an RFID reader helper
//! that prints one card UID per newline it receives) to any number of
//! WebSocket clients, coalescing concurrent requests into one round trip.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use getuid_core::protocol::ENDPOINT_PATH;
use getuid_core::tracing_init::{default_filter_for, init_tracing};
use getuid_daemon::broker::Broker;
use getuid_daemon::server::{ServerConfig, build_router, serve};
use getuid_daemon::subprocess::{CommandSpec, RestartPolicy, Supervisor};
use getuid_daemon::wake::{
    CommandWake, DEFAULT_WAKE_COMMAND, DEFAULT_WAKE_DISPLAY, NoWake, WakeTrigger,
};

#[derive(Parser, Debug)]
#[command(name = "getuid-daemon")]
#[command(version, about = "getuid daemon - serve tokens from a line-oriented command over WebSocket")]
struct Args {
    /// TCP bind address
    #[arg(long, default_value = "127.0.0.1:8000", env = "GETUID_ADDR")]
    addr: SocketAddr,

    /// HTTP path of the WebSocket endpoint
    #[arg(long, default_value = ENDPOINT_PATH, env = "GETUID_PATH")]
    path: String,

    /// Capacity of the inbound request queue
    #[arg(long, default_value_t = 64, env = "GETUID_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Command run after each fresh token (whitespace separated)
    #[arg(long, default_value = DEFAULT_WAKE_COMMAND, env = "GETUID_WAKE_COMMAND")]
    wake_command: String,

    /// X display targeted by the wake command
    #[arg(long, default_value = DEFAULT_WAKE_DISPLAY, env = "GETUID_WAKE_DISPLAY")]
    wake_display: String,

    /// Do not run a wake command
    #[arg(long, env = "GETUID_NO_WAKE")]
    no_wake: bool,

    /// Delay before the first restart of the token source, in milliseconds
    #[arg(long, default_value_t = 250, env = "GETUID_RESTART_INITIAL_MS")]
    restart_initial_ms: u64,

    /// Maximum delay between restarts of the token source, in milliseconds
    #[arg(long, default_value_t = 30_000, env = "GETUID_RESTART_MAX_MS")]
    restart_max_ms: u64,

    /// Seconds to wait for pending replies at shutdown
    #[arg(long, default_value_t = 5, env = "GETUID_DRAIN_TIMEOUT")]
    drain_timeout_secs: u64,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "GETUID_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "GETUID_LOG_JSON")]
    log_json: bool,

    /// Token source command and its arguments
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = default_filter_for(&["getuid_daemon", "getuid_core"], &args.log_level);
    init_tracing(&log_filter, args.log_json);

    let command = CommandSpec::from_argv(args.command.clone())
        .context("usage: getuid-daemon [OPTIONS] <COMMAND>...")?;

    let config = ServerConfig::tcp(args.addr)
        .with_path(args.path.clone())
        .with_queue_capacity(args.queue_capacity);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.addr,
        path = %config.path,
        command = %command,
        "Starting getuid-daemon"
    );

    let wake: Arc<dyn WakeTrigger> = if args.no_wake {
        Arc::new(NoWake)
    } else {
        Arc::new(CommandWake::parse(&args.wake_command, &args.wake_display)?)
    };

    let tasks = TaskTracker::new();
    let shutdown = CancellationToken::new();

    let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity);
    let mut broker = Broker::new(inbound_rx, wake, tasks.clone());
    let policy = RestartPolicy::default().with_delays(
        Duration::from_millis(args.restart_initial_ms),
        Duration::from_millis(args.restart_max_ms),
    );
    let supervisor = Supervisor::new(command, policy);
    let supervisor_shutdown = shutdown.clone();
    let supervisor_handle =
        tokio::spawn(async move { supervisor.run(&mut broker, &supervisor_shutdown).await });

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Cannot listen on {}", config.addr))?;
    let router = build_router(&config, inbound_tx);
    let mut server_handle = tokio::spawn(serve(listener, router, shutdown.clone()));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Spawned helpers never inherit $NOTIFY_SOCKET (see `scrub_env`), so the
    // variable stays set here.
    #[cfg(unix)]
    sd_notify::notify(false, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!(addr = %config.addr, "getuid-daemon ready");

    let server_result = tokio::select! {
        result = &mut server_handle => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            None
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
            None
        }
    };

    shutdown.cancel();
    let server_result = match server_result {
        Some(result) => result,
        None => server_handle.await,
    };
    let _ = supervisor_handle.await;

    tasks.close();
    let drain = Duration::from_secs(args.drain_timeout_secs);
    if tokio::time::timeout(drain, tasks.wait()).await.is_err() {
        warn!(pending = tasks.len(), "Gave up waiting for pending replies");
    }

    info!("Daemon stopped");
    server_result??;
    Ok(())
}
