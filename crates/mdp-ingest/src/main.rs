//! MDP Ingest - Museum event ingestion pipeline

use anyhow::Result;
use clap::Parser;
use mdp_common::logging::{init_logging, LogConfig, LogLevel};
use mdp_ingest::batch::BatchLoader;
use mdp_ingest::config::{BatchPaths, RetryConfig, StreamConfig};
use mdp_ingest::db::{create_pool, health_check, DbConfig};
use mdp_ingest::stream::kafka::KafkaSource;
use mdp_ingest::stream::StreamConsumer;
use mdp_ingest::PipelineCoordinator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mdp-ingest")]
#[command(author, version, about = "Museum visitor event ingestion pipeline")]
struct Cli {
    /// Ingestion mode
    #[command(subcommand)]
    mode: Mode,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Mode {
    /// Load the historical archive (exhibition catalogue plus kiosk events)
    Batch {
        /// Exhibition metadata CSV (overrides BATCH_EXHIBITIONS_PATH)
        #[arg(long)]
        exhibitions: Option<PathBuf>,

        /// Kiosk event archive CSV (overrides BATCH_EVENTS_PATH)
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Consume the live kiosk event feed until interrupted
    Stream,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("mdp-ingest".to_string())
        .build();

    // Environment variables take precedence over flags
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    let db_config = DbConfig::from_env()?;
    let pool = create_pool(&db_config).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    health_check(&pool).await?;
    info!("Database ready");

    let coordinator = Arc::new(PipelineCoordinator::new(pool, RetryConfig::from_env()));

    match cli.mode {
        Mode::Batch {
            exhibitions,
            events,
        } => {
            let mut paths = BatchPaths::from_env();
            if let Some(path) = exhibitions {
                paths.exhibitions = path;
            }
            if let Some(path) = events {
                paths.events = path;
            }

            info!(
                exhibitions = %paths.exhibitions.display(),
                events = %paths.events.display(),
                "Starting archive load"
            );
            let loader = BatchLoader::new(Arc::clone(&coordinator), paths);
            loader.run().await?;
        }
        Mode::Stream => {
            coordinator.bootstrap().await?;
            let stream_config = StreamConfig::from_env()?;
            let source = KafkaSource::connect(&stream_config)
                .map_err(|e| anyhow::anyhow!("Kafka setup failed: {e}"))?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                let _ = shutdown_tx.send(true);
            });

            let mut consumer = StreamConsumer::new(
                source,
                coordinator.clone() as Arc<dyn mdp_ingest::RecordDispatcher>,
                stream_config,
                shutdown_rx,
            );
            consumer.run().await?;

            let stats = coordinator.stats();
            info!(
                votes = stats.votes.total(),
                assistance = stats.assistance.total(),
                emergencies = stats.emergencies.total(),
                "Stream consumer stopped"
            );
        }
    }

    info!("Ingestion complete");
    Ok(())
}
