//! chatd - real-time chat daemon
//!
//! Serves the realtime socket surface and the HTTP surface from one
//! process, sharing a single store, cache and connection registry.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! chatd start
//!
//! # Start in the background with a config file
//! chatd start -d --config /etc/chatd.toml
//!
//! # Stop the daemon
//! chatd stop
//!
//! # Check daemon status
//! chatd status
//!
//! # Override addresses and storage from the environment
//! CHATD_LISTEN=0.0.0.0:7878 CHATD_DATABASE_URL=sqlite://chat.db chatd start
//!
//! # Enable debug logging
//! RUST_LOG=chatd=debug chatd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatd::auth::AuthService;
use chatd::cache::spawn_expiry_sweeper;
use chatd::config::{Config, DatabaseConfig};
use chatd::http::{self, AppState};
use chatd::pidfile::{is_process_running, log_file_path, PidFile};
use chatd::registry::spawn_registry;
use chatd::server::ChatServer;
use chatd::service::{MessageCache, MessageService};
use chatd::session::ChatContext;
use chatd::store::{ChatStore, MemoryStore, SqliteStore};

/// chatd - real-time chat daemon
#[derive(Parser, Debug)]
#[command(name = "chatd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Path to a TOML config file
        #[arg(short, long, env = "CHATD_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let target = libc::pid_t::try_from(pid).with_context(|| format!("Invalid PID {pid}"))?;
        let result = unsafe { libc::kill(target, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Bare `chatd` starts in the foreground
    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });
    let pid_file = PidFile::default_location();

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = pid_file.running_pid() {
                eprintln!("Daemon is already running (PID {})", pid);
                eprintln!("Use 'chatd stop' to stop it first.");
                process::exit(1);
            }

            // Load before forking so configuration errors reach the terminal
            let config = Config::load(config.as_deref()).context("Failed to load configuration")?;

            if daemon {
                daemonize()?;
            }

            pid_file.write_current()?;
            let result = run_daemon(config);
            pid_file.remove();

            result
        }
        Command::Stop => {
            if let Some(pid) = pid_file.running_pid() {
                println!("Stopping daemon (PID {})...", pid);
                stop_daemon(pid)?;

                // Wait for process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = pid_file.running_pid() {
                println!("Daemon is running (PID {})", pid);
                println!("PID file: {}", pid_file.path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout.try_clone().context("Failed to open log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

async fn open_store(database: &DatabaseConfig) -> Result<Arc<dyn ChatStore>> {
    match &database.url {
        Some(url) => {
            let store = SqliteStore::open(url)
                .await
                .with_context(|| format!("Failed to open database {url}"))?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured, messages are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("chatd=info".parse()?)
                .add_directive("chat_core=info".parse()?)
                .add_directive("chat_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "chatd starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Store, then cache and service, then warm-up before accepting clients
    let store = open_store(&config.database).await?;
    let cache = Arc::new(MessageCache::with_capacity(config.cache.size_limit));
    let service = Arc::new(MessageService::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        config.cache.message_cache_duration(),
    ));
    service.warm_cache().await;

    let registry = spawn_registry(config.server.max_connections);
    let sweeper = spawn_expiry_sweeper(cache, config.cache.scan_frequency(), cancel_token.clone());

    let ctx = ChatContext::new(service, registry);
    let auth = Arc::new(AuthService::new(store));

    let http_listener = TcpListener::bind(config.server.http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP address {}", config.server.http_addr))?;
    let http_task = tokio::spawn(http::serve(
        http_listener,
        http::router(AppState::new(ctx.clone(), auth)),
        cancel_token.clone(),
    ));

    let server = match ChatServer::bind(config.server.listen_addr, ctx, cancel_token.clone()).await {
        Ok(server) => server,
        Err(e) => {
            cancel_token.cancel();
            return Err(e.into());
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }
    let _ = sweeper.await;

    info!("chatd stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
