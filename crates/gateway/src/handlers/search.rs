//! Read-only query surface for the agent layer
//!
//! Both endpoints require the guild in the path or body; the vector
//! adapter's filter type makes a guild-less query unrepresentable.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use convoforge_common::{
    errors::{AppError, Result},
    metrics,
    vector::{ScoredPoint, TenantFilter},
};

/// Semantic search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    pub guild_id: i64,

    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    #[serde(default)]
    pub channel_id: Option<i64>,

    #[serde(default = "default_limit")]
    pub limit: u64,

    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

fn default_limit() -> u64 {
    5
}

fn default_min_score() -> f64 {
    0.2
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SearchResultItem {
    pub id: Uuid,
    pub score: f64,
    pub kind: &'static str,
    pub channel_id: Option<i64>,
    pub source_ids: Vec<i64>,
    pub preview: String,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
}

impl From<ScoredPoint> for SearchResultItem {
    fn from(p: ScoredPoint) -> Self {
        Self {
            id: p.id,
            score: p.score,
            kind: p.payload.kind.as_str(),
            channel_id: p.payload.channel_id,
            source_ids: p.payload.source_ids,
            preview: p.payload.preview,
            start_time: p.payload.start_time,
            end_time: p.payload.end_time,
        }
    }
}

/// `search_semantic`: embed the query and search the guild's slice of
/// the namespace. Read-only.
pub async fn search_semantic(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let mut filter = TenantFilter::for_guild(request.guild_id)?;
    if let Some(channel_id) = request.channel_id {
        filter = filter.channel(channel_id);
    }

    let query_vector = state.embedder.embed(&request.query).await?;
    let results = state
        .vector
        .search(&query_vector, &filter, request.limit.min(50), request.min_score)
        .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    metrics::record_search(processing_time_ms as f64 / 1000.0, results.len());

    tracing::info!(
        guild_id = request.guild_id,
        results = results.len(),
        latency_ms = processing_time_ms,
        "Search completed"
    );

    Ok(Json(SearchResponse {
        results: results.into_iter().map(Into::into).collect(),
        processing_time_ms,
    }))
}

/// Time-range query parameters for `list_recent`.
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub since: Option<DateTime<FixedOffset>>,
    pub until: Option<DateTime<FixedOffset>>,
    #[serde(default = "default_recent_limit")]
    pub limit: u64,
}

fn default_recent_limit() -> u64 {
    50
}

#[derive(Serialize)]
pub struct RecentMessagesResponse {
    pub messages: Vec<RecentMessage>,
}

#[derive(Serialize)]
pub struct RecentMessage {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub reply_to_id: Option<i64>,
    pub timestamp: DateTime<FixedOffset>,
}

/// `list_recent`: recent live messages from the relational store.
/// Soft-deleted rows never appear. Read-only.
pub async fn list_recent(
    State(state): State<AppState>,
    Path((guild_id, channel_id)): Path<(i64, i64)>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<RecentMessagesResponse>> {
    let until = params.until.unwrap_or_else(|| Utc::now().into());
    let since = params.since.unwrap_or(until - Duration::hours(24));

    let messages = state
        .repo
        .list_recent_messages(guild_id, channel_id, since, until, params.limit.min(500))
        .await?;

    Ok(Json(RecentMessagesResponse {
        messages: messages
            .into_iter()
            .map(|m| RecentMessage {
                id: m.id,
                author_id: m.author_id,
                content: m.content,
                reply_to_id: m.reply_to_id,
                timestamp: m.message_timestamp,
            })
            .collect(),
    }))
}
