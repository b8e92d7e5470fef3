//! Stream-Size Scheduler Server
//!
//! An HTTP front end hosting one `scheduler_core::SchedulerRegistry` shared
//! across every namespace/application that reaches it (`SPEC_FULL.md` E.1,
//! E.8), backed by the same filesystem/SQLite/subprocess collaborators as
//! the `agent` binary and restored from the same kind of SQLite store on
//! startup.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod api;
mod config;
mod infra;
#[cfg(test)]
mod tests;

use api::AppState;
use config::ServerConfig;
use infra::{FsNotificationService, FsSizeProbe, SqliteStore, SubprocessDispatcher};
use scheduler_core::{ProgramRef, SchedulerConfig, SchedulerRegistry};

#[derive(Parser, Debug)]
#[command(name = "scheduler-server")]
#[command(about = "HTTP front end for the stream-size triggered scheduler", long_about = None)]
struct CliArgs {
    /// Path to this server's configuration file (server.toml).
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scheduler_server=info,scheduler_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn build_registry(config: &ServerConfig) -> Result<Arc<SchedulerRegistry>> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    std::fs::create_dir_all(&config.stream_root)
        .with_context(|| format!("failed to create stream root {}", config.stream_root.display()))?;

    let probe = Arc::new(FsSizeProbe::new(config.stream_root.clone()));
    let notifications = FsNotificationService::new(config.stream_root.clone());
    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("failed to open schedule store at {}", config.database_path.display()))?,
    );
    let dispatcher = Arc::new(SubprocessDispatcher::new(config.dispatch_program_root.clone()));

    Ok(Arc::new(SchedulerRegistry::new(
        probe,
        notifications,
        store,
        dispatcher,
        SchedulerConfig::from_seconds(config.polling_delay_seconds),
    )))
}

/// Restores every persisted schedule, deriving each one's `ProgramRef`
/// directly from its `ScheduleId` (which already carries namespace,
/// application, and program name) rather than from a fixed process-wide
/// tenant the way `agent`'s `program_of` closure does.
async fn restore_schedules(registry: &SchedulerRegistry) -> Result<()> {
    let restored = registry
        .restore_all(|schedule_id| {
            ProgramRef::new(
                schedule_id.namespace.clone(),
                schedule_id.application.clone(),
                schedule_id.program_name.clone(),
            )
        })
        .await
        .context("failed to restore persisted schedules")?;
    info!(restored, "restored persisted schedules");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli_args = CliArgs::parse();

    let config = ServerConfig::load(&cli_args.config_file)
        .with_context(|| format!("failed to load server config from {}", cli_args.config_file.display()))?;

    let registry = build_registry(&config)?;
    restore_schedules(&registry).await?;

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.listen_addr))?;

    let app = api::create_router(AppState { registry });

    info!(%listen_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind TCP listener to {listen_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
