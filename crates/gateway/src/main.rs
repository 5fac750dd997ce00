//! ConvoForge Gateway
//!
//! The administrative control plane and the read-only query surface:
//! - channel indexing / guild activity toggles (which schedule purge or
//!   backfill work per the ingestion contracts)
//! - tenant-scoped semantic search and recent-message listing for the
//!   agent layer
//! - per-guild sync health and dead-letter inspection
//!
//! Authorization is out of scope: the endpoints trust their caller.

mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use convoforge_common::{
    broker::{BrokerSettings, JobBroker},
    config::AppConfig,
    db::{init_schema, DbPool, Repository},
    embeddings::{create_embedder, Embedder},
    metrics,
    vector::VectorStore,
    VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Repository,
    pub broker: JobBroker,
    pub vector: VectorStore,
    pub embedder: Arc<dyn Embedder>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting ConvoForge Gateway v{}", VERSION);

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

    let state = AppState {
        config: config.clone(),
        repo: Repository::new(db.clone()),
        broker: JobBroker::new(db, BrokerSettings::from(&config.jobs)),
        vector,
        embedder,
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Query surface (read-only)
        .route("/search", post(handlers::search::search_semantic))
        .route(
            "/guilds/:guild_id/channels/:channel_id/messages",
            get(handlers::search::list_recent),
        )
        // Consistency surface
        .route("/guilds/:guild_id/sync-health", get(handlers::sync::sync_health))
        .route("/admin/dead-letters", get(handlers::sync::dead_letters))
        // Administrative control
        .route(
            "/admin/guilds/:guild_id/channels/:channel_id/indexed",
            put(handlers::admin::set_channel_indexed),
        )
        .route(
            "/admin/guilds/:guild_id/active",
            put(handlers::admin::set_guild_active),
        );

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
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
