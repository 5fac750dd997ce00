//! Consistency surface: sync health and dead-letter inspection.
//!
//! These are the only admin-visible error channels; workers never
//! surface failures to end users.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use convoforge_common::{db::SyncHealth, errors::Result};

#[derive(Serialize)]
pub struct SyncHealthResponse {
    pub guild_id: i64,
    #[serde(flatten)]
    pub health: SyncHealth,
    pub ratio: f64,
    pub healthy: bool,
}

/// Per-guild sync health: `synced / (synced + unindexed + stale)`.
pub async fn sync_health(
    State(state): State<AppState>,
    Path(guild_id): Path<i64>,
) -> Result<Json<SyncHealthResponse>> {
    let health = state.repo.sync_health(guild_id).await?;
    Ok(Json(SyncHealthResponse {
        guild_id,
        ratio: health.ratio(),
        healthy: health.is_healthy(),
        health,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

#[derive(Serialize)]
pub struct DeadLetterResponse {
    pub dead_letters: Vec<DeadLetterItem>,
}

#[derive(Serialize)]
pub struct DeadLetterItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: String,
    pub reason: String,
    pub attempt_count: i32,
    pub failed_at: DateTime<FixedOffset>,
}

/// Recent permanently failed jobs.
pub async fn dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLetterQuery>,
) -> Result<Json<DeadLetterResponse>> {
    let records = state.broker.list_dead_letters(params.limit.min(500)).await?;
    Ok(Json(DeadLetterResponse {
        dead_letters: records
            .into_iter()
            .map(|d| DeadLetterItem {
                id: d.id,
                job_id: d.job_id,
                kind: d.kind,
                reason: d.reason,
                attempt_count: d.attempt_count,
                failed_at: d.failed_at,
            })
            .collect(),
    }))
}
