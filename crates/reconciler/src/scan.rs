//! Drift scan
//!
//! For each active guild the scan computes four populations and repairs
//! each with bounded batches:
//! 1. unindexed - should have a vector, never got one -> sessionize
//! 2. stale     - edited after indexing -> reindex
//! 3. pending purge - deleted but still keyed -> purge vectors
//! 4. orphans   - vector points no live record backs -> delete
//!
//! The scan also re-seeds half-applied channel purges and stuck
//! attachments, and publishes the per-guild sync-health gauge.

use convoforge_common::broker::{
    embed_session_dedup_key, sessionize_dedup_key, JobBroker, JobPayload, JobPriority,
};
use convoforge_common::db::Repository;
use convoforge_common::errors::Result;
use convoforge_common::metrics;
use convoforge_common::vector::{TenantFilter, VectorStore};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Attachments stuck in `processing` longer than this are re-enqueued.
const STUCK_ATTACHMENT_SECS: i64 = 1800;

pub struct Reconciler {
    repo: Repository,
    broker: JobBroker,
    vector: VectorStore,
    batch_limit: u64,
}

impl Reconciler {
    pub fn new(repo: Repository, broker: JobBroker, vector: VectorStore, batch_limit: u64) -> Self {
        Self {
            repo,
            broker,
            vector,
            batch_limit,
        }
    }

    /// One full cycle over every active guild plus the orphan sweep for
    /// guilds that are gone entirely.
    pub async fn run_cycle(&self) -> Result<()> {
        let guilds = self.repo.list_active_guilds().await?;
        let active_ids: HashSet<i64> = guilds.iter().map(|g| g.id).collect();

        for guild in &guilds {
            if let Err(e) = self.reconcile_guild(guild.id).await {
                warn!(guild_id = guild.id, error = %e, "Guild reconcile failed");
            }
        }

        if let Err(e) = self.sweep_foreign_guilds(&active_ids).await {
            warn!(error = %e, "Foreign-guild sweep failed");
        }

        Ok(())
    }

    #[instrument(skip(self), fields(guild_id))]
    async fn reconcile_guild(&self, guild_id: i64) -> Result<()> {
        // 1. Unindexed: anchor one sessionize per affected channel.
        let unindexed = self
            .repo
            .list_unindexed_messages(guild_id, self.batch_limit)
            .await?;
        let mut anchors: HashMap<i64, i64> = HashMap::new();
        for message in &unindexed {
            let anchor = anchors.entry(message.channel_id).or_insert(message.id);
            *anchor = (*anchor).max(message.id);
        }
        for (channel_id, anchor) in &anchors {
            self.broker
                .enqueue(
                    JobPayload::Sessionize {
                        guild_id,
                        channel_id: *channel_id,
                        around_message_id: *anchor,
                    },
                    JobPriority::Default,
                    Some(&sessionize_dedup_key(*channel_id)),
                    None,
                )
                .await?;
        }
        metrics::record_reconciler_repair("unindexed", unindexed.len() as u64);

        // 2. Stale: edited messages and sessions needing a re-embed.
        let stale_messages = self
            .repo
            .list_stale_messages(guild_id, self.batch_limit)
            .await?;
        for message in &stale_messages {
            self.broker
                .enqueue(
                    JobPayload::ReindexSessionFor {
                        guild_id,
                        message_id: message.id,
                    },
                    JobPriority::Default,
                    None,
                    None,
                )
                .await?;
        }

        let stale_sessions = self
            .repo
            .list_stale_sessions(guild_id, self.batch_limit)
            .await?;
        for session in &stale_sessions {
            if session.message_count < 2 {
                continue;
            }
            self.broker
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
        metrics::record_reconciler_repair(
            "stale",
            (stale_messages.len() + stale_sessions.len()) as u64,
        );

        // 3. Pending purge: deleted rows still holding vector keys.
        let pending = self
            .repo
            .list_pending_purge(guild_id, self.batch_limit)
            .await?;
        if !pending.is_empty() {
            let ids: Vec<i64> = pending.iter().map(|m| m.id).collect();
            self.broker
                .enqueue(
                    JobPayload::PurgeMessageVectors {
                        guild_id,
                        message_ids: ids,
                    },
                    JobPriority::High,
                    None,
                    None,
                )
                .await?;
        }
        metrics::record_reconciler_repair("pending_purge", pending.len() as u64);

        // Half-applied channel purges (indexing flipped off, keys remain).
        for channel_id in self.repo.channels_needing_purge(guild_id).await? {
            self.broker
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

        // Attachments that never finished processing.
        let stuck = self
            .repo
            .list_stuck_attachments(guild_id, STUCK_ATTACHMENT_SECS, self.batch_limit)
            .await?;
        for attachment in &stuck {
            self.broker
                .enqueue(
                    JobPayload::IngestAttachment {
                        guild_id,
                        attachment_id: attachment.id,
                    },
                    JobPriority::Default,
                    None,
                    None,
                )
                .await?;
        }

        // 4. Orphans within the guild's slice of the namespace.
        let orphans = self.find_orphans(guild_id).await?;
        if !orphans.is_empty() {
            let deleted = self.vector.delete(&orphans).await?;
            metrics::record_reconciler_repair("orphans", deleted);
            warn!(guild_id, orphans = deleted, "Orphaned vector points removed");
        }

        // Health gauge for the admin surface.
        let health = self.repo.sync_health(guild_id).await?;
        metrics::set_sync_health(guild_id, health.ratio());
        info!(
            guild_id,
            total = health.total,
            synced = health.synced,
            unindexed = health.unindexed,
            stale = health.stale,
            ratio = health.ratio(),
            healthy = health.is_healthy(),
            "Sync health"
        );

        Ok(())
    }

    /// Points whose ids no live session or chunk backs.
    async fn find_orphans(&self, guild_id: i64) -> Result<Vec<Uuid>> {
        let filter = TenantFilter::for_guild(guild_id)?;
        let mut orphans = Vec::new();
        let mut after: Option<Uuid> = None;
        let mut scanned: u64 = 0;

        loop {
            let batch = self.vector.scroll(&filter, after, 200).await?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|p| p.id);
            scanned += batch.len() as u64;

            let ids: Vec<Uuid> = batch.iter().map(|p| p.id).collect();
            let live: HashSet<Uuid> = self.repo.live_vector_keys(&ids).await?.into_iter().collect();
            orphans.extend(ids.into_iter().filter(|id| !live.contains(id)));

            // Bounded per cycle; the next cycle resumes the tail.
            if scanned >= self.batch_limit * 10 {
                break;
            }
        }

        Ok(orphans)
    }

    /// Delete every point belonging to a guild that is no longer active.
    async fn sweep_foreign_guilds(&self, active: &HashSet<i64>) -> Result<()> {
        for guild_id in self.vector.guild_ids().await? {
            if active.contains(&guild_id) {
                continue;
            }
            let filter = TenantFilter::for_guild(guild_id)?;
            let deleted = self.vector.delete_where(&filter).await?;
            if deleted > 0 {
                warn!(guild_id, deleted, "Purged vectors for inactive guild");
                metrics::record_reconciler_repair("foreign_guild", deleted);
            }
        }
        Ok(())
    }
}
