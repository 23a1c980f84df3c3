mod commands;
mod output;

use clap::{Parser, Subcommand};
use jobq_core::QueueConfig;
use output::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "jobq")]
#[command(about = "Job queue admin CLI", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, env = "JOBQ_CONFIG", default_value = "data/config.yaml")]
    config: PathBuf,

    /// Override the database path from the configuration file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a job described as JSON, e.g. '{"id":"job1","command":"echo hi"}'
    Enqueue {
        /// Job JSON with `command` and optional `id`, `priority`, `max_retries`
        job: String,
    },

    /// Show job counts per state
    Status,

    /// List jobs
    List {
        /// Filter by state (pending, processing, completed, dead)
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Inspect or retry the dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Read or change persisted settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DlqCommands {
    /// List dead jobs
    List,

    /// Move a dead job back to pending
    Retry {
        /// Job ID
        job_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print one setting
    Get { key: String },

    /// Change one setting
    Set { key: String, value: String },

    /// Print all settings
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = QueueConfig::load_or_init(&args.config)?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    match args.command {
        Commands::Enqueue { job } => {
            let store = commands::open_store(&config)?;
            let job = commands::enqueue(&store, &config, &job).await?;
            match args.format {
                OutputFormat::Table => println!("Job enqueued: {}", job.id),
                format => println!("{}", output::render_job(&job, format)?),
            }
        }

        Commands::Status => {
            let store = commands::open_store(&config)?;
            let counts = store.aggregate_by_state()?;
            println!("{}", output::render_counts(&counts, args.format)?);
        }

        Commands::List { state } => {
            let store = commands::open_store(&config)?;
            let jobs = commands::list(&store, state.as_deref())?;
            println!("{}", output::render_jobs(&jobs, args.format)?);
        }

        Commands::Dlq { command } => {
            let store = commands::open_store(&config)?;
            match command {
                DlqCommands::List => {
                    let jobs = store.list_dead()?;
                    println!("{}", output::render_jobs(&jobs, args.format)?);
                }
                DlqCommands::Retry { job_id } => {
                    let job = commands::retry_dead(&store, &job_id).await?;
                    match args.format {
                        OutputFormat::Table => println!("Job {} moved back to pending", job.id),
                        format => println!("{}", output::render_job(&job, format)?),
                    }
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => println!("{}", config.get(&key)?),
            ConfigCommands::Set { key, value } => {
                let updated = commands::config_set(&args.config, &key, &value)?;
                println!("{} = {}", key, updated.get(&key)?);
            }
            ConfigCommands::List => {
                println!("{}", output::render_config(&config.entries(), args.format)?);
            }
        },
    }

    Ok(())
}
