//! `ingest_attachment` job
//!
//! Fetches attachment bytes (the ingestor never does), extracts text per
//! source type, chunks, embeds, and indexes. Permanent failures land the
//! reason on the attachment row before the job dead-letters, so admins
//! can see why a file never became searchable.

use super::JobContext;
use convoforge_common::db::models::{Attachment, DocumentChunk, ProcessingStatus, SourceType};
use convoforge_common::errors::{AppError, ErrorClass, Result};
use convoforge_common::metrics;
use convoforge_common::vector::{truncate_preview, PointKind, PointPayload, VectorPoint};
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chunker::{chunk_document, ChunkParams};
use crate::extract::extract_pdf_pages;

#[instrument(skip(ctx), fields(guild_id, attachment_id))]
pub async fn run(ctx: &JobContext, guild_id: i64, attachment_id: i64) -> Result<()> {
    let attachment = match ctx.repo.find_attachment(attachment_id).await? {
        Some(a) => a,
        None => return Ok(()),
    };
    if attachment.is_deleted {
        return Ok(());
    }
    if attachment.processing_status() == ProcessingStatus::Completed {
        // Replay after a successful run.
        return Ok(());
    }

    ctx.repo
        .set_attachment_status(attachment_id, ProcessingStatus::Processing, None)
        .await?;

    match process(ctx, guild_id, &attachment).await {
        Ok(chunk_count) => {
            ctx.repo
                .set_attachment_status(attachment_id, ProcessingStatus::Completed, None)
                .await?;
            info!(chunks = chunk_count, "Attachment ingested");
            Ok(())
        }
        Err(e) if e.class() == ErrorClass::Permanent => {
            // Record the reason, then let the broker dead-letter the job.
            let reason = permanent_reason(&e);
            warn!(error = %e, reason, "Attachment permanently failed");
            ctx.repo
                .set_attachment_status(attachment_id, ProcessingStatus::Failed, Some(reason))
                .await?;
            Err(e)
        }
        Err(e) => {
            // Transient: back to pending so a retry reprocesses cleanly.
            ctx.repo
                .set_attachment_status(attachment_id, ProcessingStatus::Pending, None)
                .await?;
            Err(e)
        }
    }
}

fn permanent_reason(e: &AppError) -> &'static str {
    match e {
        AppError::AttachmentBlocked { .. } => "blocked_extension",
        AppError::AttachmentTooLarge { .. } => "oversize",
        AppError::ExtractionFailed { .. } => "corrupt",
        AppError::DimensionMismatch { .. } => "dimension_mismatch",
        _ => "permanent_failure",
    }
}

async fn process(ctx: &JobContext, guild_id: i64, attachment: &Attachment) -> Result<usize> {
    // Policy checks run before any byte is fetched.
    ctx.fetcher.check_extension(&attachment.source_url)?;

    let source_type = attachment.source_type();
    let max_bytes = match source_type {
        SourceType::Text | SourceType::Markdown => ctx.config.attachments.max_size_text,
        SourceType::Pdf => ctx.config.attachments.max_size_pdf,
        SourceType::Image => ctx.config.attachments.max_size_image,
    };
    if attachment.size_bytes > 0 && attachment.size_bytes as u64 > max_bytes {
        return Err(AppError::AttachmentTooLarge {
            size: attachment.size_bytes as u64,
            limit: max_bytes,
        });
    }

    let params = ChunkParams {
        max_tokens: ctx.config.session.max_tokens,
        min_tokens: ctx.config.attachments.chunk_min_tokens,
    };

    let (texts, extracted, description) = match source_type {
        SourceType::Text | SourceType::Markdown => {
            let bytes = ctx.fetcher.fetch(&attachment.source_url, max_bytes).await?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let chunks: Vec<String> = chunk_document(&text, &params)
                .into_iter()
                .map(|c| c.text)
                .collect();
            (chunks, Some(text), None)
        }
        SourceType::Pdf => {
            let bytes = ctx.fetcher.fetch(&attachment.source_url, max_bytes).await?;
            let pages = extract_pdf_pages(&bytes)?;
            let joined = pages.join("\n\n");
            let chunks: Vec<String> = chunk_document(&joined, &params)
                .into_iter()
                .map(|c| c.text)
                .collect();
            (chunks, Some(joined), None)
        }
        SourceType::Image => {
            // The collaborator fetches the image itself; size was checked
            // against the declared length above.
            let description = ctx
                .vision
                .describe_image(&attachment.source_url, &attachment.mime)
                .await?;
            (vec![description.clone()], None, Some(description))
        }
    };

    if texts.is_empty() {
        return Err(AppError::ExtractionFailed {
            message: "attachment produced no indexable text".into(),
        });
    }

    ctx.repo
        .set_attachment_extracted(
            attachment.id,
            extracted.as_deref(),
            description.as_deref(),
        )
        .await?;

    // Replay hygiene: remove any half-written chunks from a prior run.
    let stale_chunks = ctx.repo.chunks_by_attachment(attachment.id).await?;
    if !stale_chunks.is_empty() {
        let stale_ids: Vec<Uuid> = stale_chunks.iter().map(|c| c.id).collect();
        ctx.vector.delete(&stale_ids).await?;
        ctx.repo.delete_chunks_for_attachment(attachment.id).await?;
    }

    let started = Instant::now();
    let embeddings = ctx.embedder.embed_batch(&texts).await;
    metrics::record_embedding(
        started.elapsed().as_secs_f64(),
        ctx.embedder.model_name(),
        texts.len(),
        embeddings.is_ok(),
    );
    let embeddings = embeddings?;

    for (index, (text, vector)) in texts.iter().zip(embeddings.into_iter()).enumerate() {
        if vector.len() != ctx.vector.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: ctx.vector.dimension(),
                actual: vector.len(),
            });
        }

        let chunk = ctx
            .repo
            .insert_chunk(DocumentChunk {
                id: Uuid::new_v4(),
                attachment_id: attachment.id,
                guild_id,
                channel_id: attachment.channel_id,
                chunk_index: index as i32,
                chunk_text: text.clone(),
                parent_chunk_id: None,
                token_count: (text.len() / 4) as i32,
                vector_key: None,
                indexed_at: None,
                created_at: chrono::Utc::now().into(),
            })
            .await?;

        ctx.vector
            .upsert(&[VectorPoint {
                id: chunk.id,
                vector,
                payload: PointPayload {
                    guild_id,
                    channel_id: Some(attachment.channel_id),
                    kind: PointKind::DocChunk,
                    source_ids: vec![attachment.id],
                    preview: truncate_preview(text),
                    start_time: None,
                    end_time: None,
                },
            }])
            .await?;

        ctx.repo.mark_chunk_indexed(chunk.id, chunk.id).await?;
    }

    Ok(texts.len())
}
