//! `sessionize` job: window the channel around an anchor message, run
//! the sessionizer, and reconcile the resulting drafts against existing
//! session rows.

use super::JobContext;
use convoforge_common::broker::{embed_session_dedup_key, JobPayload, JobPriority};
use convoforge_common::db::NewSession;
use convoforge_common::errors::Result;
use convoforge_common::sessionizer::{
    self, semantic, SessionDraft, SessionMessage, SessionizerParams,
};
use tracing::{debug, info, instrument};

#[instrument(skip(ctx), fields(guild_id, channel_id, around))]
pub async fn run(ctx: &JobContext, guild_id: i64, channel_id: i64, around: i64) -> Result<()> {
    let channel = match ctx.repo.find_channel(channel_id).await? {
        Some(c) => c,
        None => return Ok(()),
    };
    if !channel.is_indexed || channel.is_deleted {
        // Toggled off between enqueue and execute.
        return Ok(());
    }

    let window = ctx
        .repo
        .read_session_window(
            channel_id,
            around,
            ctx.config.session.window_before,
            ctx.config.session.window_after,
        )
        .await?;
    if window.is_empty() {
        return Ok(());
    }

    let messages: Vec<SessionMessage> = window.iter().map(SessionMessage::from).collect();
    let params = SessionizerParams::from_config(&ctx.config.session);

    let drafts = sessionizer::usable_sessions(sessionizer::sessionize(&messages, &params), &params);
    let drafts = refine_large(ctx, drafts, &params).await?;

    let mut created = 0usize;
    for draft in drafts {
        if draft.len() < params.min_messages {
            continue;
        }
        if let Some(session_id) = reconcile_draft(ctx, guild_id, channel_id, &draft).await? {
            ctx.broker
                .enqueue(
                    JobPayload::EmbedSession {
                        guild_id,
                        session_id,
                    },
                    JobPriority::Default,
                    Some(&embed_session_dedup_key(session_id)),
                    None,
                )
                .await?;
            created += 1;
        }
    }

    if created > 0 {
        info!(created, "Sessionize produced new sessions");
    }
    Ok(())
}

/// Apply semantic refinement to drafts above the size threshold. Each
/// message is embedded individually; the split is a pure function of
/// those embeddings and the percentile.
async fn refine_large(
    ctx: &JobContext,
    drafts: Vec<SessionDraft>,
    params: &SessionizerParams,
) -> Result<Vec<SessionDraft>> {
    let refine = match semantic::RefineParams::from_config(&ctx.config.session) {
        Some(r) => r,
        None => return Ok(drafts),
    };

    let mut out = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if draft.len() < refine.threshold_messages {
            out.push(draft);
            continue;
        }

        let texts: Vec<String> = draft.messages.iter().map(|m| m.content.clone()).collect();
        let embeddings = ctx.embedder.embed_batch(&texts).await?;
        let pieces = semantic::refine(draft, &embeddings, &refine);
        out.extend(
            pieces
                .into_iter()
                .filter(|p| p.len() >= params.min_messages),
        );
    }
    Ok(out)
}

/// Create a session row for a draft unless an identical one exists.
/// Overlapping sessions with a different range are superseded: their
/// vector point is removed and the row deleted before the new row is
/// created. Returns the id to embed, or None when already covered.
async fn reconcile_draft(
    ctx: &JobContext,
    guild_id: i64,
    channel_id: i64,
    draft: &SessionDraft,
) -> Result<Option<uuid::Uuid>> {
    let start_id = draft.start_message_id();
    let end_id = draft.end_message_id();

    let overlapping = ctx
        .repo
        .sessions_overlapping(channel_id, start_id, end_id)
        .await?;

    for existing in &overlapping {
        if existing.start_message_id == start_id && existing.end_message_id == end_id {
            // Already covered; embed only if it never got a vector.
            if existing.vector_key.is_none() {
                return Ok(Some(existing.id));
            }
            return Ok(None);
        }
    }

    for stale in overlapping {
        debug!(session_id = %stale.id, "Superseding overlapping session");
        // Vector first: the point id equals the session id whether or
        // not the confirm write landed.
        ctx.vector.delete(&[stale.id]).await?;
        if let Some(key) = stale.vector_key {
            ctx.repo.clear_session_vector_key(stale.id, key).await?;
        }
        ctx.repo.delete_session(stale.id).await?;
    }

    let (start_time, end_time) = match (draft.start_time(), draft.end_time()) {
        (Some(s), Some(e)) => (s, e),
        _ => return Ok(None),
    };

    let session = ctx
        .repo
        .create_session(NewSession {
            guild_id,
            channel_id,
            start_message_id: start_id,
            end_message_id: end_id,
            message_count: draft.len() as i32,
            start_time,
            end_time,
        })
        .await?;

    Ok(Some(session.id))
}
