//! Job handlers
//!
//! One module per job family. Every handler is idempotent: replaying a
//! job with the same payload any number of times leaves the relational
//! store and the vector namespace identical to a single execution.
//! Handlers write the vector namespace and then confirm in the
//! relational store inside the same job; a crash between the two is
//! repaired by the reconciler.

pub mod attachment;
pub mod backfill;
pub mod embed_session;
pub mod purge;
pub mod sessionize;

use convoforge_common::broker::{JobBroker, JobPayload};
use convoforge_common::config::AppConfig;
use convoforge_common::db::Repository;
use convoforge_common::embeddings::Embedder;
use convoforge_common::errors::Result;
use convoforge_common::vector::VectorStore;
use std::sync::Arc;

use crate::fetch::AttachmentFetcher;
use crate::vision::VisionDescriber;

/// Everything a job handler may touch. No state survives across jobs.
pub struct JobContext {
    pub repo: Repository,
    pub broker: JobBroker,
    pub vector: VectorStore,
    pub embedder: Arc<dyn Embedder>,
    pub vision: Arc<dyn VisionDescriber>,
    pub fetcher: AttachmentFetcher,
    pub config: Arc<AppConfig>,
}

/// Route a payload to its handler.
pub async fn dispatch(ctx: &JobContext, payload: &JobPayload) -> Result<()> {
    match payload {
        JobPayload::Sessionize {
            guild_id,
            channel_id,
            around_message_id,
        } => sessionize::run(ctx, *guild_id, *channel_id, *around_message_id).await,

        JobPayload::EmbedSession {
            guild_id,
            session_id,
        } => embed_session::run(ctx, *guild_id, *session_id).await,

        JobPayload::ReindexSessionFor {
            guild_id,
            message_id,
        } => embed_session::reindex_for(ctx, *guild_id, *message_id).await,

        JobPayload::PurgeMessageVectors {
            guild_id,
            message_ids,
        } => purge::message_vectors(ctx, *guild_id, message_ids).await,

        JobPayload::PurgeChannelVectors {
            guild_id,
            channel_id,
        } => purge::channel_vectors(ctx, *guild_id, *channel_id).await,

        JobPayload::BackfillChannel {
            guild_id,
            channel_id,
            after_message_id,
        } => backfill::run(ctx, *guild_id, *channel_id, *after_message_id).await,

        JobPayload::IngestAttachment {
            guild_id,
            attachment_id,
        } => attachment::run(ctx, *guild_id, *attachment_id).await,
    }
}
