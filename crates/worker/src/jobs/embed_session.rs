//! `embed_session` and `reindex_session_for` jobs
//!
//! Builds the canonical enrichment text for a session, embeds it, writes
//! the vector point, then confirms in the relational store. The point id
//! equals the session id, so replays overwrite rather than duplicate.

use super::JobContext;
use convoforge_common::broker::{embed_session_dedup_key, JobPayload, JobPriority};
use convoforge_common::errors::{AppError, Result};
use convoforge_common::metrics;
use convoforge_common::sessionizer::{enrich, SessionMessage};
use convoforge_common::vector::{truncate_preview, PointKind, PointPayload, VectorPoint};
use std::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[instrument(skip(ctx), fields(guild_id, session_id = %session_id))]
pub async fn run(ctx: &JobContext, guild_id: i64, session_id: Uuid) -> Result<()> {
    let session = match ctx.repo.find_session(session_id).await? {
        Some(s) => s,
        // Deleted between enqueue and execute: no-op success.
        None => return Ok(()),
    };

    let messages = ctx.repo.messages_in_session(&session).await?;
    if messages.len() < 2 {
        debug!(live = messages.len(), "Session below embedding threshold, skipping");
        return Ok(());
    }

    let channel_name = ctx
        .repo
        .find_channel(session.channel_id)
        .await?
        .map(|c| c.name)
        .unwrap_or_else(|| session.channel_id.to_string());

    let session_messages: Vec<SessionMessage> =
        messages.iter().map(SessionMessage::from).collect();
    let author_ids: Vec<i64> = {
        let mut ids: Vec<i64> = session_messages.iter().map(|m| m.author_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let names = ctx.repo.display_names(&author_ids).await?;
    let text = enrich::session_text(&channel_name, &session_messages, &names);

    let started = Instant::now();
    let vector = ctx.embedder.embed(&text).await;
    metrics::record_embedding(
        started.elapsed().as_secs_f64(),
        ctx.embedder.model_name(),
        1,
        vector.is_ok(),
    );
    let vector = vector?;

    if vector.len() != ctx.vector.dimension() {
        return Err(AppError::DimensionMismatch {
            expected: ctx.vector.dimension(),
            actual: vector.len(),
        });
    }

    let message_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
    ctx.vector
        .upsert(&[VectorPoint {
            id: session.id,
            vector,
            payload: PointPayload {
                guild_id,
                channel_id: Some(session.channel_id),
                kind: PointKind::Session,
                source_ids: message_ids.clone(),
                preview: truncate_preview(&text),
                start_time: Some(session.start_time),
                end_time: Some(session.end_time),
            },
        }])
        .await?;

    // Confirm in the relational store. If the session was superseded
    // while we embedded, remove the point we just wrote.
    match ctx.repo.mark_session_indexed(session.id, session.id).await {
        Ok(()) => {}
        Err(AppError::NotFound { .. }) => {
            ctx.vector.delete(&[session.id]).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    ctx.repo
        .mark_messages_indexed(&message_ids, session.id)
        .await?;

    info!(messages = message_ids.len(), "Session embedded");
    Ok(())
}

/// `reindex_session_for`: find the session containing an edited message
/// and schedule a re-embed; fall back to sessionize when none exists.
#[instrument(skip(ctx), fields(guild_id, message_id))]
pub async fn reindex_for(ctx: &JobContext, guild_id: i64, message_id: i64) -> Result<()> {
    let message = match ctx.repo.find_message(message_id).await? {
        Some(m) => m,
        None => return Ok(()),
    };
    if message.is_deleted {
        return Ok(());
    }

    match ctx
        .repo
        .session_containing(message.channel_id, message_id)
        .await?
    {
        Some(session) => {
            ctx.repo.touch_session(session.id).await?;
            ctx.broker
                .enqueue(
                    JobPayload::EmbedSession {
                        guild_id,
                        session_id: session.id,
                    },
                    JobPriority::Default,
                    Some(&embed_session_dedup_key(session.id)),
                    None,
                )
                .await?;
        }
        None => {
            super::sessionize::run(ctx, guild_id, message.channel_id, message_id).await?;
        }
    }

    Ok(())
}
