use clap::Parser;
use jobq_core::QueueConfig;
use jobq_worker::{run_workers, ShellRunner, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "jobq-worker")]
#[command(about = "Background job queue worker", long_about = None)]
struct Args {
    /// Number of worker loops to run
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// Worker ID prefix (derived from host and pid if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Path to configuration file
    #[arg(long, env = "JOBQ_CONFIG", default_value = "data/config.yaml")]
    config: PathBuf,

    /// Override the database path from the configuration file
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration once; workers never re-read it.
    let mut queue_config = QueueConfig::load_or_init(&args.config)?;
    if let Some(database) = args.database {
        queue_config.database_path = database;
    }

    let mut config = WorkerConfig::from_queue_config(&queue_config);
    config.count = args.count.max(1);
    config.worker_id = args.worker_id;

    tracing::info!("Starting {} worker(s) with config: {:?}", config.count, config);

    // Handle shutdown signals
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal, finishing in-flight jobs");
        signal_token.cancel();
    });

    run_workers(config, Arc::new(ShellRunner), shutdown).await?;

    Ok(())
}
