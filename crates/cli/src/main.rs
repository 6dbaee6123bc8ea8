//! queuectl - durable job queue with retries and a dead-letter queue
//!
//! Composition root: loads settings, opens the SQLite store and wires the
//! core services for each subcommand.

mod logging;
mod output;
mod settings;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use queuectl_core::application::{shutdown_channel, Dispatcher, DlqManager, JobService};
use queuectl_core::domain::JobState;
use queuectl_core::port::id_provider::UuidProvider;
use queuectl_core::port::time_provider::SystemTimeProvider;
use queuectl_core::port::TimeProvider;
use queuectl_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use queuectl_infra_system::ShellExecutor;

use settings::Settings;

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Durable job queue with retries and a dead-letter queue", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path (overrides configuration)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Configuration file (toml, json or yaml)
    #[arg(long, global = true, env = "QUEUECTL_CONFIG")]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job from a JSON spec: '{"command": "...", "id": "...", "max_retries": 3}'
    Enqueue {
        /// Job spec as JSON string
        job_spec: String,
    },

    /// List jobs in a state
    List {
        /// pending, processing, completed, failed or dead
        #[arg(long, default_value = "pending", value_parser = parse_state)]
        state: JobState,
    },

    /// Show job counts per state
    Status,

    /// Run the worker
    Worker {
        #[command(subcommand)]
        action: WorkerCommand,
    },

    /// Inspect and requeue dead jobs
    Dlq {
        #[command(subcommand)]
        action: DlqCommand,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Process jobs until interrupted (Ctrl+C)
    Start,
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List dead jobs
    List,
    /// Move a dead job back to pending with a fresh retry budget
    Retry {
        /// Job ID
        job_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print one effective configuration value
    Get {
        /// db_path, max_retries, backoff_base, job_timeout_secs or idle_interval_secs
        key: String,
    },
    /// Persist a value into the config file (`--config`, default queuectl.json)
    Set {
        /// db_path, max_retries, backoff_base, job_timeout_secs or idle_interval_secs
        key: String,
        value: String,
    },
}

fn parse_state(s: &str) -> std::result::Result<JobState, String> {
    s.parse::<JobState>().map_err(|e| e.to_string())
}

/// Open (and migrate) the store; the pool is closed when the handle drops
async fn open_store(
    settings: &Settings,
    db_override: Option<&str>,
    time_provider: Arc<dyn TimeProvider>,
) -> Result<Arc<SqliteJobStore>> {
    let database_url = settings.database_url(db_override);
    info!(db_path = %database_url, "Opening database");

    let pool = create_pool(&database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    run_migrations(&pool).await.context("Migration failed")?;

    Ok(Arc::new(SqliteJobStore::new(pool, time_provider)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let settings = Settings::load(cli.config.as_deref())?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let engine_config = settings.engine_config();
    let db_override = cli.db.as_deref();
    let open = || open_store(&settings, db_override, time_provider.clone());

    match cli.command {
        Commands::Enqueue { job_spec } => {
            let service = JobService::new(
                open().await?,
                Arc::new(UuidProvider),
                time_provider,
                engine_config.max_retries,
            );
            let job_id = service.enqueue_spec(&job_spec).await?;
            println!("{} {}", "Job enqueued with ID:".green().bold(), job_id);
        }

        Commands::List { state } => {
            let service = JobService::new(
                open().await?,
                Arc::new(UuidProvider),
                time_provider,
                engine_config.max_retries,
            );
            let jobs = service.list(state).await?;
            if jobs.is_empty() {
                println!("No jobs found in state: {}", output::colored_state(state));
            } else {
                println!("--- Jobs in '{}' state ---", output::colored_state(state));
                println!("{}", output::jobs_table(&jobs));
            }
        }

        Commands::Status => {
            let service = JobService::new(
                open().await?,
                Arc::new(UuidProvider),
                time_provider,
                engine_config.max_retries,
            );
            let counts = service.stats().await?;
            println!("{}", "Queue Status".cyan().bold());
            println!("{}", output::counts_table(&counts));
        }

        Commands::Worker {
            action: WorkerCommand::Start,
        } => {
            let executor = Arc::new(ShellExecutor::new(engine_config.job_timeout));
            let dispatcher = Dispatcher::new(open().await?, executor, time_provider, engine_config);
            let (shutdown_tx, shutdown_rx) = shutdown_channel();

            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Shutdown signal received, finishing current job...");
                        shutdown_tx.shutdown();
                    }
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
            });

            println!("{}", "Worker started. Press Ctrl+C to stop.".green().bold());
            dispatcher.run(shutdown_rx).await?;
            println!("Worker stopped.");
        }

        Commands::Dlq { action } => {
            let dlq = DlqManager::new(open().await?);
            match action {
                DlqCommand::List => {
                    let jobs = dlq.list().await?;
                    if jobs.is_empty() {
                        println!("Dead-letter queue is empty");
                    } else {
                        println!("--- Dead-letter queue ({} jobs) ---", jobs.len());
                        println!("{}", output::jobs_table(&jobs));
                    }
                }
                DlqCommand::Retry { job_id } => {
                    if !dlq.retry(&job_id).await? {
                        bail!("Job '{}' not found in the dead-letter queue", job_id);
                    }
                    println!("{} {}", "Job requeued:".green().bold(), job_id);
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigCommand::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            ConfigCommand::Get { key } => match settings.get(&key)? {
                Some(Value::String(text)) => println!("{}", text),
                Some(value) => println!("{}", value),
                None => bail!("'{}' is not a valid config option", key),
            },
            ConfigCommand::Set { key, value } => {
                let path = Settings::writable_path(cli.config.as_deref());
                let updated = Settings::set_in_file(&path, &key, &value)?;
                let shown = updated.get(&key)?.unwrap_or(Value::Null);
                println!(
                    "{} {} = {} ({})",
                    "Config updated:".green().bold(),
                    key,
                    shown,
                    path.display()
                );
            }
        },
    }

    Ok(())
}
