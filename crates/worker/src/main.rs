//! ConvoForge Indexing Worker
//!
//! Executes broker jobs: sessionizing, embedding, vector purges,
//! backfills and attachment ingestion. Runs a fixed pool of executors
//! plus a lease sweeper; holds no state across jobs.

mod chunker;
mod executor;
mod extract;
mod fetch;
mod jobs;
mod vision;

use convoforge_common::{
    broker::{BrokerSettings, JobBroker},
    config::AppConfig,
    db::{init_schema, DbPool, Repository},
    embeddings::create_embedder,
    errors::AppError,
    metrics,
    vector::VectorStore,
    VERSION,
};
use fetch::AttachmentFetcher;
use jobs::JobContext;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting ConvoForge Worker v{}", VERSION);

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
    }
    metrics::register_metrics();

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    init_schema(db.write()).await?;

    let embedder = create_embedder(&config.embedding)?;
    if embedder.dimension() != config.embedding.dimension {
        return Err(Box::new(AppError::DimensionMismatch {
            expected: config.embedding.dimension,
            actual: embedder.dimension(),
        }) as Box<dyn std::error::Error>);
    }

    // Runtime manifest: the embedder identity is fixed for the process
    // lifetime and checked against the vector namespace.
    let identity = config.embedder_identity();
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        identity = %identity,
        "Embedder initialized"
    );

    let vector = if config.vector.url.is_some() {
        let mut vector_db = config.database.clone();
        vector_db.url = config.vector_url().to_string();
        vector_db.read_url = None;
        vector_db.connect_timeout_secs = config.vector.timeout_secs;
        VectorStore::new(&vector_db, config.embedding.dimension).await?
    } else {
        VectorStore::with_pool(db.clone(), config.embedding.dimension)
    };
    vector.ensure_namespace(&identity).await?;

    let repo = Repository::new(db.clone());
    let broker = JobBroker::new(db, BrokerSettings::from(&config.jobs));

    let ctx = Arc::new(JobContext {
        repo,
        broker: broker.clone(),
        vector,
        embedder,
        vision: vision::create_vision(&config)?,
        fetcher: AttachmentFetcher::new(
            config.attachments.blocked_extensions.clone(),
            Duration::from_secs(config.attachments.fetch_timeout_secs),
        )?,
        config: config.clone(),
    });

    // Lease sweeper: expired leases are implicit nacks.
    let sweeper_broker = broker.clone();
    let sweep_interval = Duration::from_secs(config.jobs.sweep_interval_secs);
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper_broker.sweep_expired_leases().await {
                error!(error = %e, "Lease sweep failed");
            }
            match sweeper_broker.depth().await {
                Ok(depth) => metrics::set_queue_depth(depth),
                Err(e) => error!(error = %e, "Queue depth probe failed"),
            }
        }
    });

    let concurrency = config.jobs.worker_concurrency.max(1);
    info!(concurrency, "Starting executors");
    let mut executors = Vec::with_capacity(concurrency);
    for executor_id in 0..concurrency {
        let ctx = ctx.clone();
        executors.push(tokio::spawn(executor::run_executor(executor_id, ctx)));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweeper.abort();
    for handle in executors {
        handle.abort();
    }

    info!("Worker shutdown complete");
    Ok(())
}
