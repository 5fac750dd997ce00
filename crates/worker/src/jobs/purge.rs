//! Vector purge jobs: right-to-be-forgotten propagation.
//!
//! `purge_message_vectors` removes every vector point whose sources
//! intersect the deleted messages, then clears the matching vector keys
//! in the relational store. Sessions left with live messages are
//! re-embedded so their point no longer references the deleted ids;
//! emptied sessions are dropped entirely.

use super::JobContext;
use convoforge_common::broker::{embed_session_dedup_key, JobPayload, JobPriority};
use convoforge_common::errors::Result;
use convoforge_common::vector::TenantFilter;
use std::collections::HashSet;
use tracing::{info, instrument};
use uuid::Uuid;

#[instrument(skip(ctx, message_ids), fields(guild_id, count = message_ids.len()))]
pub async fn message_vectors(ctx: &JobContext, guild_id: i64, message_ids: &[i64]) -> Result<()> {
    if message_ids.is_empty() {
        return Ok(());
    }

    let sessions = ctx.repo.sessions_containing_any(guild_id, message_ids).await?;
    let chunks = ctx.repo.chunks_for_messages(guild_id, message_ids).await?;

    // Point ids: the session id and chunk id double as point ids whether
    // or not the indexing confirm ever landed.
    let mut point_ids: Vec<Uuid> = Vec::new();
    point_ids.extend(sessions.iter().map(|s| s.id));
    point_ids.extend(chunks.iter().map(|c| c.id));

    let deleted_points = ctx.vector.delete(&point_ids).await?;

    // Clear message vector keys for the deleted ids themselves.
    for id in message_ids {
        if let Some(message) = ctx.repo.find_message(*id).await? {
            if let Some(key) = message.vector_key {
                ctx.repo.clear_message_vector_key(*id, key).await?;
            }
        }
    }

    let deleted_set: HashSet<i64> = message_ids.iter().copied().collect();
    for session in sessions {
        if let Some(key) = session.vector_key {
            ctx.repo.clear_session_vector_key(session.id, key).await?;
        }

        // Surviving members lose their stamp until the re-embed lands.
        let members = ctx.repo.messages_in_session(&session).await?;
        for member in &members {
            if deleted_set.contains(&member.id) {
                continue;
            }
            if let Some(key) = member.vector_key {
                ctx.repo.clear_message_vector_key(member.id, key).await?;
            }
        }

        let live = ctx
            .repo
            .count_live_messages_in_range(
                session.channel_id,
                session.start_message_id,
                session.end_message_id,
            )
            .await?;

        if live == 0 {
            ctx.repo.delete_session(session.id).await?;
        } else {
            ctx.repo.touch_session(session.id).await?;
            if live >= 2 {
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
        }
    }

    // Chunk rows die with their (soft-deleted) attachments.
    let mut attachment_ids: Vec<i64> = chunks.iter().map(|c| c.attachment_id).collect();
    attachment_ids.sort_unstable();
    attachment_ids.dedup();
    for attachment_id in attachment_ids {
        ctx.repo.delete_chunks_for_attachment(attachment_id).await?;
    }

    info!(points = deleted_points, "Message vectors purged");
    Ok(())
}

/// `purge_channel_vectors`: wipe a channel's slice of the namespace and
/// sweep the matching vector keys in the relational store.
#[instrument(skip(ctx), fields(guild_id, channel_id))]
pub async fn channel_vectors(ctx: &JobContext, guild_id: i64, channel_id: i64) -> Result<()> {
    let filter = TenantFilter::for_guild(guild_id)?.channel(channel_id);
    let deleted = ctx.vector.delete_where(&filter).await?;

    let messages = ctx.repo.clear_channel_vector_keys(guild_id, channel_id).await?;
    let sessions = ctx
        .repo
        .clear_channel_session_vector_keys(guild_id, channel_id)
        .await?;
    let chunks = ctx
        .repo
        .clear_channel_chunk_vector_keys(guild_id, channel_id)
        .await?;

    info!(
        points = deleted,
        messages, sessions, chunks, "Channel vectors purged"
    );
    Ok(())
}
