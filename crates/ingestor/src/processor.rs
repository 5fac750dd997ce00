//! Event processor
//!
//! Translates platform events into relational-store mutations and broker
//! enqueues. Stateless and idempotent: replaying any event produces the
//! same stored state.
//!
//! Ordering rule: the relational commit always precedes the enqueue. A
//! crash between the two leaves work the reconciler will find; the
//! reverse order could create a vector referring to a missing record and
//! is forbidden.

use convoforge_common::broker::{
    backfill_dedup_key, sessionize_dedup_key, JobBroker, JobPayload, JobPriority,
};
use convoforge_common::config::AppConfig;
use convoforge_common::db::models::{ProcessingStatus, SourceType};
use convoforge_common::db::{NewAttachment, NewMessage, Repository};
use convoforge_common::errors::Result;
use convoforge_common::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::events::*;

pub struct EventProcessor {
    repo: Repository,
    broker: JobBroker,
    config: Arc<AppConfig>,
}

impl EventProcessor {
    pub fn new(repo: Repository, broker: JobBroker, config: Arc<AppConfig>) -> Self {
        Self {
            repo,
            broker,
            config,
        }
    }

    /// Process one event to completion.
    #[instrument(skip(self, event), fields(event_type = event.event_type(), guild_id = event.guild_id()))]
    pub async fn process(&self, event: GatewayEvent) -> Result<()> {
        metrics::record_event(event.event_type());

        match event {
            GatewayEvent::MessageCreate(e) => self.handle_message_create(e).await,
            GatewayEvent::MessageEdit(e) => self.handle_message_edit(e).await,
            GatewayEvent::MessageDelete(e) => self.handle_message_delete(e).await,
            GatewayEvent::MessageBulkDelete(e) => self.handle_bulk_delete(e).await,
            GatewayEvent::ChannelIndexingToggled(e) => self.handle_indexing_toggled(e).await,
            GatewayEvent::ChannelDelete(e) => self.handle_channel_delete(e).await,
            GatewayEvent::GuildActiveToggled(e) => self.handle_guild_toggled(e).await,
            GatewayEvent::AttachmentCreate(e) => self.handle_attachment_create(e).await,
        }
    }

    /// High queue depth sheds low-priority work and widens default-work
    /// batching. Delete work is never throttled.
    async fn over_backpressure(&self) -> bool {
        match self.broker.depth().await {
            Ok(depth) => {
                metrics::set_queue_depth(depth);
                depth > self.config.jobs.backpressure_hi
            }
            Err(e) => {
                warn!(error = %e, "Queue depth check failed; assuming no back-pressure");
                false
            }
        }
    }

    async fn handle_message_create(&self, e: MessageCreate) -> Result<()> {
        self.repo.upsert_guild(e.guild_id, &e.guild_name).await?;
        let channel = self
            .repo
            .upsert_channel(e.channel_id, e.guild_id, &e.channel_name)
            .await?;
        self.repo.upsert_user(e.author_id, &e.author_name).await?;

        self.repo
            .upsert_message(NewMessage {
                id: e.message_id,
                channel_id: e.channel_id,
                guild_id: e.guild_id,
                author_id: e.author_id,
                content: e.content,
                reply_to_id: e.reply_to_id,
                timestamp: e.timestamp,
            })
            .await?;

        if !channel.is_indexed {
            return Ok(());
        }

        // Under back-pressure the dedup window widens batches: the
        // delayed job keeps coalescing new creates onto itself.
        let delay = if self.over_backpressure().await {
            Some(Duration::from_secs(self.config.jobs.dedup_window_secs))
        } else {
            None
        };

        self.broker
            .enqueue(
                JobPayload::Sessionize {
                    guild_id: e.guild_id,
                    channel_id: e.channel_id,
                    around_message_id: e.message_id,
                },
                JobPriority::Default,
                Some(&sessionize_dedup_key(e.channel_id)),
                delay,
            )
            .await?;

        Ok(())
    }

    async fn handle_message_edit(&self, e: MessageEdit) -> Result<()> {
        if e.author_is_bot {
            return Ok(());
        }

        let outcome = self
            .repo
            .upsert_message(NewMessage {
                id: e.message_id,
                channel_id: e.channel_id,
                guild_id: e.guild_id,
                author_id: e.author_id,
                content: e.content,
                reply_to_id: None,
                timestamp: e.timestamp,
            })
            .await?;

        // Replays with unchanged content, and edits to deleted rows, stop here.
        if !outcome.content_changed || outcome.was_deleted {
            return Ok(());
        }

        self.broker
            .enqueue(
                JobPayload::ReindexSessionFor {
                    guild_id: e.guild_id,
                    message_id: e.message_id,
                },
                JobPriority::Default,
                None,
                None,
            )
            .await?;

        Ok(())
    }

    async fn handle_message_delete(&self, e: MessageDelete) -> Result<()> {
        let targets = self
            .repo
            .soft_delete_messages(e.guild_id, &[e.message_id])
            .await?;
        self.repo
            .soft_delete_attachments_for_messages(e.guild_id, &[e.message_id])
            .await?;

        let had_vector = targets.iter().any(|t| t.vector_key.is_some());
        let in_session = !self
            .repo
            .sessions_containing_any(e.guild_id, &[e.message_id])
            .await?
            .is_empty();

        if had_vector || in_session {
            self.broker
                .enqueue(
                    JobPayload::PurgeMessageVectors {
                        guild_id: e.guild_id,
                        message_ids: vec![e.message_id],
                    },
                    JobPriority::High,
                    None,
                    None,
                )
                .await?;
        }

        debug!(message_id = e.message_id, had_vector, in_session, "Message deleted");
        Ok(())
    }

    async fn handle_bulk_delete(&self, e: MessageBulkDelete) -> Result<()> {
        if e.message_ids.is_empty() {
            return Ok(());
        }

        let targets = self
            .repo
            .soft_delete_messages(e.guild_id, &e.message_ids)
            .await?;
        self.repo
            .soft_delete_attachments_for_messages(e.guild_id, &e.message_ids)
            .await?;

        info!(
            channel_id = e.channel_id,
            deleted = targets.len(),
            "Bulk delete soft-applied"
        );

        // One purge job for the whole batch.
        self.broker
            .enqueue(
                JobPayload::PurgeMessageVectors {
                    guild_id: e.guild_id,
                    message_ids: e.message_ids,
                },
                JobPriority::High,
                None,
                None,
            )
            .await?;

        Ok(())
    }

    async fn handle_indexing_toggled(&self, e: ChannelIndexingToggled) -> Result<()> {
        let (_, previous) = self
            .repo
            .set_channel_indexed(e.guild_id, e.channel_id, e.indexed)
            .await?;

        if previous == e.indexed {
            return Ok(());
        }

        if e.indexed {
            if self.over_backpressure().await {
                // Backfill is retried by the reconciler once pressure drops.
                metrics::record_event_shed("backfill_channel");
                warn!(
                    channel_id = e.channel_id,
                    "Back-pressure high; backfill not enqueued"
                );
                return Ok(());
            }
            self.broker
                .enqueue(
                    JobPayload::BackfillChannel {
                        guild_id: e.guild_id,
                        channel_id: e.channel_id,
                        after_message_id: 0,
                    },
                    JobPriority::Low,
                    Some(&backfill_dedup_key(e.channel_id, 0)),
                    None,
                )
                .await?;
        } else {
            self.broker
                .enqueue(
                    JobPayload::PurgeChannelVectors {
                        guild_id: e.guild_id,
                        channel_id: e.channel_id,
                    },
                    JobPriority::High,
                    None,
                    None,
                )
                .await?;
        }

        info!(channel_id = e.channel_id, indexed = e.indexed, "Channel indexing toggled");
        Ok(())
    }

    async fn handle_channel_delete(&self, e: ChannelDelete) -> Result<()> {
        self.repo.soft_delete_channel(e.guild_id, e.channel_id).await?;
        let targets = self
            .repo
            .bulk_soft_delete_channel_messages(e.guild_id, e.channel_id)
            .await?;

        info!(
            channel_id = e.channel_id,
            messages = targets.len(),
            "Channel deleted upstream"
        );

        self.broker
            .enqueue(
                JobPayload::PurgeChannelVectors {
                    guild_id: e.guild_id,
                    channel_id: e.channel_id,
                },
                JobPriority::High,
                None,
                None,
            )
            .await?;

        Ok(())
    }

    async fn handle_guild_toggled(&self, e: GuildActiveToggled) -> Result<()> {
        self.repo.set_guild_active(e.guild_id, e.active).await?;
        info!(guild_id = e.guild_id, active = e.active, "Guild activity toggled");
        Ok(())
    }

    async fn handle_attachment_create(&self, e: AttachmentCreate) -> Result<()> {
        let source_type = match SourceType::classify(&e.mime, &e.filename) {
            Some(t) => t,
            None => {
                // Unsupported types get a terminal row and no job.
                self.repo
                    .insert_attachment(NewAttachment {
                        id: e.attachment_id,
                        message_id: e.message_id,
                        guild_id: e.guild_id,
                        channel_id: e.channel_id,
                        source_url: e.source_url,
                        mime: e.mime.clone(),
                        size_bytes: e.size_bytes,
                        source_type: SourceType::Text,
                    })
                    .await?;
                self.repo
                    .set_attachment_status(
                        e.attachment_id,
                        ProcessingStatus::Failed,
                        Some("unsupported_type"),
                    )
                    .await?;
                return Ok(());
            }
        };

        self.repo
            .insert_attachment(NewAttachment {
                id: e.attachment_id,
                message_id: e.message_id,
                guild_id: e.guild_id,
                channel_id: e.channel_id,
                source_url: e.source_url,
                mime: e.mime,
                size_bytes: e.size_bytes,
                source_type,
            })
            .await?;

        // The worker fetches the bytes; the ingestor never downloads.
        self.broker
            .enqueue(
                JobPayload::IngestAttachment {
                    guild_id: e.guild_id,
                    attachment_id: e.attachment_id,
                },
                JobPriority::Default,
                None,
                None,
            )
            .await?;

        Ok(())
    }
}
