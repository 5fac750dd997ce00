//! ConvoForge Gateway Ingestor
//!
//! Receives platform events from the upstream chat-platform adapter and
//! turns them into relational-store state plus broker work. Never calls
//! the vector namespace and never downloads attachment bytes.

mod events;
mod processor;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use convoforge_common::{
    broker::{BrokerSettings, JobBroker},
    config::AppConfig,
    db::{init_schema, DbPool, Repository},
    errors::AppError,
    metrics, VERSION,
};
use events::GatewayEvent;
use metrics_exporter_prometheus::PrometheusBuilder;
use processor::EventProcessor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

#[derive(Clone)]
struct AppState {
    processor: Arc<EventProcessor>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting ConvoForge Ingestor v{}", VERSION);

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

    let repo = Repository::new(db.clone());
    let broker = JobBroker::new(db, BrokerSettings::from(&config.jobs));
    let processor = Arc::new(EventProcessor::new(repo, broker, config.clone()));

    let state = AppState { processor };

    let app = Router::new()
        .route("/v1/events", post(ingest_event))
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Ingestor shutdown complete");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// One event in, 202 out. The upstream adapter retries on 5xx, so a
/// failed handler run is replayed; all handlers are idempotent.
async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<GatewayEvent>,
) -> Result<StatusCode, AppError> {
    state.processor.process(event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
