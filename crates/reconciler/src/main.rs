//! ConvoForge Reconciler
//!
//! Periodic drift repair between the relational store and the vector
//! namespace: re-enqueues unindexed and stale work, escalates pending
//! purges, deletes orphaned points, and publishes per-guild sync health.
//! Runs once at startup, then on the configured interval.

mod scan;

use convoforge_common::{
    broker::{BrokerSettings, JobBroker},
    config::AppConfig,
    db::{init_schema, DbPool, Repository},
    metrics,
    vector::VectorStore,
    VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use scan::Reconciler;
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

    info!("Starting ConvoForge Reconciler v{}", VERSION);

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
    }
    metrics::register_metrics();

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    init_schema(db.write()).await?;

    let vector = if config.vector.url.is_some() {
        let mut vector_db = config.database.clone();
        vector_db.url = config.vector_url().to_string();
        vector_db.read_url = None;
        vector_db.connect_timeout_secs = config.vector.timeout_secs;
        VectorStore::new(&vector_db, config.embedding.dimension).await?
    } else {
        VectorStore::with_pool(db.clone(), config.embedding.dimension)
    };
    vector.ensure_namespace(&config.embedder_identity()).await?;

    let repo = Repository::new(db.clone());
    let broker = JobBroker::new(db, BrokerSettings::from(&config.jobs));
    let reconciler = Reconciler::new(repo, broker, vector, config.reconciler.batch_limit);

    let interval = Duration::from_secs(config.reconciler.interval_secs);
    info!(interval_secs = interval.as_secs(), "Reconciler ready");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!("Reconcile cycle starting");
                if let Err(e) = reconciler.run_cycle().await {
                    error!(error = %e, "Reconcile cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Reconciler shutdown complete");
    Ok(())
}
