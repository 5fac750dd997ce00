//! Health handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness: the process is up.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: convoforge_common::VERSION,
    })
}

/// Readiness: the relational store answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<HealthResponse>, StatusCode> {
    match state.repo.ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "ready",
            version: convoforge_common::VERSION,
        })),
        Err(e) => {
            tracing::error!(error = %e, "Readiness check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
