//! Administrative control handlers
//!
//! The toggles mirror the ingestion contracts: flipping a channel off
//! schedules a high-priority purge; flipping it on schedules a
//! low-priority backfill. The relational commit always lands before the
//! enqueue.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::AppState;
use convoforge_common::{
    broker::{backfill_dedup_key, JobPayload, JobPriority},
    errors::Result,
};

#[derive(Debug, Deserialize)]
pub struct IndexedBody {
    pub indexed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActiveBody {
    pub active: bool,
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub changed: bool,
}

/// `set_channel_indexed(guild_id, channel_id, bool)`
pub async fn set_channel_indexed(
    State(state): State<AppState>,
    Path((guild_id, channel_id)): Path<(i64, i64)>,
    Json(body): Json<IndexedBody>,
) -> Result<Json<ToggleResponse>> {
    let (_, previous) = state
        .repo
        .set_channel_indexed(guild_id, channel_id, body.indexed)
        .await?;

    if previous == body.indexed {
        return Ok(Json(ToggleResponse { changed: false }));
    }

    if body.indexed {
        state
            .broker
            .enqueue(
                JobPayload::BackfillChannel {
                    guild_id,
                    channel_id,
                    after_message_id: 0,
                },
                JobPriority::Low,
                Some(&backfill_dedup_key(channel_id, 0)),
                None,
            )
            .await?;
    } else {
        state
            .broker
            .enqueue(
                JobPayload::PurgeChannelVectors {
                    guild_id,
                    channel_id,
                },
                JobPriority::High,
                None,
                None,
            )
            .await?;
    }

    tracing::info!(guild_id, channel_id, indexed = body.indexed, "Channel indexing toggled");
    Ok(Json(ToggleResponse { changed: true }))
}

/// `set_guild_active(guild_id, bool)`. Deactivated guilds stop being
/// reconciled and their vectors are swept as orphans.
pub async fn set_guild_active(
    State(state): State<AppState>,
    Path(guild_id): Path<i64>,
    Json(body): Json<ActiveBody>,
) -> Result<Json<ToggleResponse>> {
    state.repo.set_guild_active(guild_id, body.active).await?;
    tracing::info!(guild_id, active = body.active, "Guild activity toggled");
    Ok(Json(ToggleResponse { changed: true }))
}
