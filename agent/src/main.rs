//! Stream-Size Scheduler Agent
//!
//! A CLI host for `scheduler_core::SchedulerRegistry`: one-shot lifecycle
//! commands (`schedule`, `suspend`, `resume`, `delete`, `delete-all`,
//! `list`, `state`) for managing schedules against this agent's local
//! SQLite store, and a `serve` subcommand that restores persisted schedules
//! and keeps their subscribers (notification watch + polling fallback)
//! running until a shutdown signal arrives.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod infra;
#[cfg(test)]
mod tests;

use config::AgentConfig;
use infra::{FsNotificationService, FsSizeProbe, SqliteStore, SubprocessDispatcher};
use scheduler_core::{ProgramRef, ProgramType, ScheduleSpec, SchedulerConfig, SchedulerRegistry};

#[derive(Parser, Debug)]
#[command(name = "scheduler-agent")]
#[command(about = "Stream-size triggered scheduling agent", long_about = None)]
struct CliArgs {
    /// Path to this agent's configuration file (agent.toml).
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a new schedule, seeded from a fresh probe of its stream.
    Schedule {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
        #[arg(long = "schedule-name")]
        schedule_name: String,
        #[arg(long)]
        stream: String,
        #[arg(long = "trigger-mb")]
        trigger_mb: u32,
    },
    /// Suspends a schedule, stopping it from firing until resumed.
    Suspend {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
        #[arg(long = "schedule-name")]
        schedule_name: String,
    },
    /// Resumes a suspended schedule.
    Resume {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
        #[arg(long = "schedule-name")]
        schedule_name: String,
    },
    /// Deletes one schedule.
    Delete {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
        #[arg(long = "schedule-name")]
        schedule_name: String,
    },
    /// Deletes every schedule belonging to one program.
    DeleteAll {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
    },
    /// Lists schedule ids belonging to one program, in their natural order.
    List {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
    },
    /// Prints whether one schedule is scheduled, suspended, or not found.
    State {
        #[arg(long)]
        program: String,
        #[arg(long = "program-type")]
        program_type: String,
        #[arg(long = "schedule-name")]
        schedule_name: String,
    },
    /// Restores every persisted schedule and keeps running until shutdown.
    Serve,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scheduler_agent=info,scheduler_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn build_registry(config: &AgentConfig) -> Result<Arc<SchedulerRegistry>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {}", config.data_dir.display()))?;
    std::fs::create_dir_all(&config.stream_root)
        .with_context(|| format!("failed to create stream root {}", config.stream_root.display()))?;

    let probe = Arc::new(FsSizeProbe::new(config.stream_root.clone()));
    let notifications = FsNotificationService::new(config.stream_root.clone());
    let store = Arc::new(
        SqliteStore::open(&config.database_path())
            .with_context(|| format!("failed to open schedule store at {}", config.database_path().display()))?,
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

fn program_ref(config: &AgentConfig, name: &str) -> ProgramRef {
    ProgramRef::new(config.namespace.clone(), config.application.clone(), name.to_string())
}

async fn run_command(config: &AgentConfig, registry: Arc<SchedulerRegistry>, command: Command) -> Result<()> {
    match command {
        Command::Schedule {
            program,
            program_type,
            schedule_name,
            stream,
            trigger_mb,
        } => {
            registry
                .schedule(
                    program_ref(config, &program),
                    ProgramType(program_type),
                    ScheduleSpec {
                        stream_name: stream,
                        data_trigger_mb: trigger_mb,
                        schedule_name,
                    },
                )
                .await?;
            info!("schedule created");
        }
        Command::Suspend {
            program,
            program_type,
            schedule_name,
        } => {
            registry
                .suspend(&program_ref(config, &program), &ProgramType(program_type), &schedule_name)
                .await?;
            info!("schedule suspended");
        }
        Command::Resume {
            program,
            program_type,
            schedule_name,
        } => {
            registry
                .resume(&program_ref(config, &program), &ProgramType(program_type), &schedule_name)
                .await?;
            info!("schedule resumed");
        }
        Command::Delete {
            program,
            program_type,
            schedule_name,
        } => {
            registry
                .delete(&program_ref(config, &program), &ProgramType(program_type), &schedule_name)
                .await?;
            info!("schedule deleted");
        }
        Command::DeleteAll { program, program_type } => {
            let deleted = registry
                .delete_all(&program_ref(config, &program), &ProgramType(program_type))
                .await?;
            println!("{deleted}");
        }
        Command::List { program, program_type } => {
            let ids = registry
                .list_ids(&program_ref(config, &program), &ProgramType(program_type))
                .await;
            for id in ids {
                println!("{id}");
            }
        }
        Command::State {
            program,
            program_type,
            schedule_name,
        } => {
            let state = registry
                .state(&program_ref(config, &program), &ProgramType(program_type), &schedule_name)
                .await;
            println!("{state:?}");
        }
        Command::Serve => unreachable!("handled by caller"),
    }
    Ok(())
}

async fn serve(config: AgentConfig, registry: Arc<SchedulerRegistry>) -> Result<()> {
    let namespace = config.namespace.clone();
    let application = config.application.clone();
    let restored = registry
        .restore_all(move |schedule_id| {
            ProgramRef::new(namespace.clone(), application.clone(), schedule_id.program_name.clone())
        })
        .await
        .context("failed to restore persisted schedules")?;
    info!(restored, "restored persisted schedules");

    let shutdown_signal = async {
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
    };

    info!("agent serving, press Ctrl+C to stop");
    shutdown_signal.await;
    info!("agent shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli_args = CliArgs::parse();

    let config = AgentConfig::load(&cli_args.config_file)
        .with_context(|| format!("failed to load agent config from {}", cli_args.config_file.display()))?;

    let registry = match build_registry(&config) {
        Ok(registry) => registry,
        Err(e) => {
            error!("failed to initialize scheduler registry: {}", e);
            std::process::exit(1);
        }
    };

    let result = if matches!(cli_args.command, Command::Serve) {
        serve(config, registry).await
    } else {
        run_command(&config, registry, cli_args.command).await
    };

    if let Err(e) = result {
        error!("command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
