//! `backfill_channel` job: walk a newly indexed channel's history in
//! ascending pages, seeding sessionize work as it goes. Low priority and
//! self-continuing: each page enqueues the next, so any higher-priority
//! work preempts between pages.

use super::JobContext;
use convoforge_common::broker::{backfill_dedup_key, JobPayload, JobPriority};
use convoforge_common::errors::Result;
use tracing::{info, instrument};

#[instrument(skip(ctx), fields(guild_id, channel_id, after))]
pub async fn run(ctx: &JobContext, guild_id: i64, channel_id: i64, after: i64) -> Result<()> {
    let channel = match ctx.repo.find_channel(channel_id).await? {
        Some(c) => c,
        None => return Ok(()),
    };
    if !channel.is_indexed || channel.is_deleted {
        // Toggled back off mid-backfill; the purge job handles cleanup.
        return Ok(());
    }

    let page = ctx
        .repo
        .messages_after(channel_id, after, ctx.config.jobs.backfill_page_size)
        .await?;
    if page.is_empty() {
        info!("Backfill complete");
        return Ok(());
    }

    // Anchor one sessionize job per window-sized slice so the page is
    // fully covered by sessionizer windows.
    let window = ctx.config.session.window_before.max(1) as usize;
    let mut anchors = Vec::new();
    let mut i = window.saturating_sub(1);
    loop {
        if i >= page.len() {
            anchors.push(page[page.len() - 1].id);
            break;
        }
        anchors.push(page[i].id);
        if i == page.len() - 1 {
            break;
        }
        i += window;
    }
    anchors.dedup();

    for anchor in &anchors {
        ctx.broker
            .enqueue(
                JobPayload::Sessionize {
                    guild_id,
                    channel_id,
                    around_message_id: *anchor,
                },
                JobPriority::Low,
                Some(&format!("sz:{}:{}", channel_id, anchor)),
                None,
            )
            .await?;
    }

    let last_id = page.last().map(|m| m.id).unwrap_or(after);
    ctx.broker
        .enqueue(
            JobPayload::BackfillChannel {
                guild_id,
                channel_id,
                after_message_id: last_id,
            },
            JobPriority::Low,
            Some(&backfill_dedup_key(channel_id, last_id)),
            None,
        )
        .await?;

    info!(
        page_size = page.len(),
        anchors = anchors.len(),
        next_after = last_id,
        "Backfill page seeded"
    );
    Ok(())
}
