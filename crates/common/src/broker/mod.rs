//! Durable priority job broker
//!
//! Postgres-backed work queue with three priority classes, visibility
//! timeouts, bounded retries with exponential backoff and jitter, a
//! 5-minute enqueue deduplication window, and a dead-letter bucket.
//!
//! Delivery is at-least-once: a slow worker may see a duplicate after its
//! lease expires, so every job handler must be idempotent. FIFO holds
//! within a priority class; across classes, higher priority always wins.

use crate::db::models::{
    DeadLetterJob, DeadLetterJobActiveModel, DeadLetterJobColumn, DeadLetterJobEntity, Job,
    JobEntity,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DbBackend, EntityTrait, QueryOrder, QuerySelect, Set,
    Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Priority classes, dequeued in ascending numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Default,
    Low,
}

impl JobPriority {
    pub fn as_i16(self) -> i16 {
        match self {
            JobPriority::High => 0,
            JobPriority::Default => 1,
            JobPriority::Low => 2,
        }
    }

    pub fn from_i16(v: i16) -> Self {
        match v {
            0 => JobPriority::High,
            2 => JobPriority::Low,
            _ => JobPriority::Default,
        }
    }

    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Default, JobPriority::Low];
}

/// Typed job payloads. The serialized form is stored in `jobs.payload`
/// with the kind string duplicated into its own column for inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Sessionize {
        guild_id: i64,
        channel_id: i64,
        around_message_id: i64,
    },
    EmbedSession {
        guild_id: i64,
        session_id: Uuid,
    },
    ReindexSessionFor {
        guild_id: i64,
        message_id: i64,
    },
    PurgeMessageVectors {
        guild_id: i64,
        message_ids: Vec<i64>,
    },
    PurgeChannelVectors {
        guild_id: i64,
        channel_id: i64,
    },
    BackfillChannel {
        guild_id: i64,
        channel_id: i64,
        after_message_id: i64,
    },
    IngestAttachment {
        guild_id: i64,
        attachment_id: i64,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Sessionize { .. } => "sessionize",
            JobPayload::EmbedSession { .. } => "embed_session",
            JobPayload::ReindexSessionFor { .. } => "reindex_session_for",
            JobPayload::PurgeMessageVectors { .. } => "purge_message_vectors",
            JobPayload::PurgeChannelVectors { .. } => "purge_channel_vectors",
            JobPayload::BackfillChannel { .. } => "backfill_channel",
            JobPayload::IngestAttachment { .. } => "ingest_attachment",
        }
    }

    pub fn guild_id(&self) -> i64 {
        match self {
            JobPayload::Sessionize { guild_id, .. }
            | JobPayload::EmbedSession { guild_id, .. }
            | JobPayload::ReindexSessionFor { guild_id, .. }
            | JobPayload::PurgeMessageVectors { guild_id, .. }
            | JobPayload::PurgeChannelVectors { guild_id, .. }
            | JobPayload::BackfillChannel { guild_id, .. }
            | JobPayload::IngestAttachment { guild_id, .. } => *guild_id,
        }
    }
}

/// Dedup key for sessionize jobs: batches bursts per channel.
pub fn sessionize_dedup_key(channel_id: i64) -> String {
    format!("sz:{}", channel_id)
}

/// Dedup key for embed_session: at most one in flight per session.
pub fn embed_session_dedup_key(session_id: Uuid) -> String {
    format!("es:{}", session_id)
}

/// Dedup key for a backfill page.
pub fn backfill_dedup_key(channel_id: i64, after_message_id: i64) -> String {
    format!("bf:{}:{}", channel_id, after_message_id)
}

/// A job claimed by `reserve`, exclusively held until the lease expires.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: Uuid,
    pub payload: JobPayload,
    pub priority: JobPriority,
    pub attempt_count: i32,
    pub max_attempts: i32,
}

/// Why a job is being nacked. Permanent reasons skip the retry budget.
#[derive(Debug, Clone)]
pub enum NackReason {
    Transient(String),
    Permanent(String),
}

/// Broker tuning, lifted from `JobConfig` at startup.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub visibility_timeout: Duration,
    pub dedup_window: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(600),
            visibility_timeout: Duration::from_secs(300),
            dedup_window: Duration::from_secs(300),
        }
    }
}

impl From<&crate::config::JobConfig> for BrokerSettings {
    fn from(c: &crate::config::JobConfig) -> Self {
        Self {
            max_attempts: c.max_attempts,
            backoff_base: Duration::from_secs(c.backoff_base_secs),
            backoff_cap: Duration::from_secs(c.backoff_cap_secs),
            visibility_timeout: Duration::from_secs(c.visibility_timeout_secs),
            dedup_window: Duration::from_secs(c.dedup_window_secs),
        }
    }
}

/// `min(cap, base * 2^attempt) + jitter ∈ [0, base)`
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(cap);
    let jitter_ms = if base.as_millis() == 0 {
        0
    } else {
        rand::random::<u64>() % base.as_millis() as u64
    };
    exp + Duration::from_millis(jitter_ms)
}

/// Durable priority queue client
#[derive(Clone)]
pub struct JobBroker {
    pool: DbPool,
    settings: BrokerSettings,
}

impl JobBroker {
    pub fn new(pool: DbPool, settings: BrokerSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Enqueue a job. With a dedup key, a second enqueue inside the
    /// sliding window coalesces onto the already-pending job and returns
    /// its id.
    pub async fn enqueue(
        &self,
        payload: JobPayload,
        priority: JobPriority,
        dedup_key: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<Uuid> {
        let txn = self.pool.write().begin().await?;

        if let Some(key) = dedup_key {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                SELECT id FROM jobs
                WHERE dedup_key = $1 AND status = 'pending' AND dedup_expires_at > NOW()
                LIMIT 1
                "#,
                vec![key.into()],
            );
            if let Some(row) = txn.query_one(stmt).await? {
                let existing: Uuid = row.try_get("", "id")?;
                txn.commit().await?;
                debug!(job_id = %existing, dedup_key = key, "Enqueue coalesced onto pending job");
                return Ok(existing);
            }
        }

        let job_id = Uuid::new_v4();
        let body = serde_json::to_value(&payload)?;
        let delay_secs = delay.map(|d| d.as_secs_f64()).unwrap_or(0.0);
        let dedup_window_secs = self.settings.dedup_window.as_secs_f64();

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO jobs
                (id, kind, payload, priority, status, dedup_key, dedup_expires_at,
                 attempt_count, max_attempts, next_run_at)
            VALUES
                ($1, $2, $3, $4, 'pending', $5,
                 CASE WHEN $5 IS NULL THEN NULL
                      ELSE NOW() + make_interval(secs => $6) END,
                 0, $7, NOW() + make_interval(secs => $8))
            "#,
            vec![
                job_id.into(),
                payload.kind().into(),
                body.into(),
                priority.as_i16().into(),
                dedup_key.into(),
                dedup_window_secs.into(),
                self.settings.max_attempts.into(),
                delay_secs.into(),
            ],
        );
        txn.execute(stmt).await?;
        txn.commit().await?;

        debug!(
            job_id = %job_id,
            kind = payload.kind(),
            priority = ?priority,
            guild_id = payload.guild_id(),
            "Job enqueued"
        );
        Ok(job_id)
    }

    /// Atomically claim the next ready job in priority order, setting its
    /// lease and incrementing the delivery count.
    pub async fn reserve(
        &self,
        worker_id: &str,
        classes: &[JobPriority],
        visibility_timeout: Duration,
    ) -> Result<Option<LeasedJob>> {
        if classes.is_empty() {
            return Ok(None);
        }
        let class_list = classes
            .iter()
            .map(|c| c.as_i16().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'leased',
                leased_by = $1,
                lease_expires_at = NOW() + make_interval(secs => $2),
                attempt_count = attempt_count + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND next_run_at <= NOW()
                  AND priority IN ({})
                ORDER BY priority ASC, created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, kind, payload, priority, attempt_count, max_attempts
            "#,
            class_list
        );

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![worker_id.into(), visibility_timeout.as_secs_f64().into()],
        );

        let row = match self.pool.write().query_one(stmt).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        let payload_json: serde_json::Value = row.try_get("", "payload")?;
        let payload: JobPayload =
            serde_json::from_value(payload_json).map_err(|e| AppError::QueueError {
                message: format!("Undecodable job payload: {}", e),
            })?;

        Ok(Some(LeasedJob {
            id: row.try_get("", "id")?,
            payload,
            priority: JobPriority::from_i16(row.try_get::<i16>("", "priority")?),
            attempt_count: row.try_get("", "attempt_count")?,
            max_attempts: row.try_get("", "max_attempts")?,
        }))
    }

    /// Remove a completed job.
    pub async fn ack(&self, job_id: Uuid) -> Result<()> {
        JobEntity::delete_by_id(job_id)
            .exec(self.pool.write())
            .await?;
        debug!(job_id = %job_id, "Job acked");
        Ok(())
    }

    /// Release a failed job: reschedule with backoff, or dead-letter when
    /// the reason is permanent or the attempt budget is spent.
    pub async fn nack(&self, job_id: Uuid, reason: NackReason) -> Result<()> {
        let job = match JobEntity::find_by_id(job_id).one(self.pool.write()).await? {
            Some(job) => job,
            // Already acked or swept; nothing to release.
            None => return Ok(()),
        };

        match reason {
            NackReason::Permanent(msg) => {
                warn!(job_id = %job_id, kind = %job.kind, error = %msg, "Dead-lettering job (permanent)");
                self.dead_letter(job, &msg).await
            }
            NackReason::Transient(msg) if job.attempt_count >= job.max_attempts => {
                warn!(
                    job_id = %job_id,
                    kind = %job.kind,
                    attempts = job.attempt_count,
                    error = %msg,
                    "Dead-lettering job (attempts exhausted)"
                );
                self.dead_letter(job, &msg).await
            }
            NackReason::Transient(msg) => {
                let delay = backoff_delay(
                    job.attempt_count.max(0) as u32,
                    self.settings.backoff_base,
                    self.settings.backoff_cap,
                );
                let stmt = Statement::from_sql_and_values(
                    DbBackend::Postgres,
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        leased_by = NULL,
                        lease_expires_at = NULL,
                        next_run_at = NOW() + make_interval(secs => $2),
                        last_error = $3,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                    vec![job_id.into(), delay.as_secs_f64().into(), msg.clone().into()],
                );
                self.pool.write().execute(stmt).await?;
                debug!(
                    job_id = %job_id,
                    attempt = job.attempt_count,
                    delay_secs = delay.as_secs(),
                    "Job nacked, rescheduled"
                );
                Ok(())
            }
        }
    }

    async fn dead_letter(&self, job: Job, reason: &str) -> Result<()> {
        let txn = self.pool.write().begin().await?;

        let dead = DeadLetterJobActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job.id),
            kind: Set(job.kind.clone()),
            payload: Set(job.payload.clone()),
            reason: Set(reason.to_string()),
            attempt_count: Set(job.attempt_count),
            failed_at: Set(Utc::now().into()),
        };
        dead.insert(&txn).await?;
        JobEntity::delete_by_id(job.id).exec(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Release jobs whose lease expired without ack/nack (implicit nack).
    /// Jobs past their attempt budget go to the dead-letter bucket.
    pub async fn sweep_expired_leases(&self) -> Result<u64> {
        let txn = self.pool.write().begin().await?;

        let exhausted = Statement::from_string(
            DbBackend::Postgres,
            r#"
            WITH moved AS (
                DELETE FROM jobs
                WHERE status = 'leased'
                  AND lease_expires_at < NOW()
                  AND attempt_count >= max_attempts
                RETURNING id, kind, payload, attempt_count
            )
            INSERT INTO dead_letter_jobs (id, job_id, kind, payload, reason, attempt_count)
            SELECT gen_random_uuid(), id, kind, payload, 'lease expired, attempts exhausted', attempt_count
            FROM moved
            "#
            .to_string(),
        );
        txn.execute(exhausted).await?;

        let base = self.settings.backoff_base.as_secs_f64();
        let cap = self.settings.backoff_cap.as_secs_f64();
        let released = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE jobs
            SET status = 'pending',
                leased_by = NULL,
                lease_expires_at = NULL,
                next_run_at = NOW() + make_interval(
                    secs => LEAST($2, $1 * POWER(2, attempt_count)) + random() * $1
                ),
                last_error = 'lease expired',
                updated_at = NOW()
            WHERE status = 'leased' AND lease_expires_at < NOW()
            "#,
            vec![base.into(), cap.into()],
        );
        let result = txn.execute(released).await?;
        txn.commit().await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(released = count, "Expired leases swept back to pending");
        }
        Ok(count)
    }

    /// Number of pending jobs; drives back-pressure in the ingestor.
    pub async fn depth(&self) -> Result<i64> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT COUNT(*) AS cnt FROM jobs WHERE status = 'pending'".to_string(),
        );
        let row = self.pool.read().query_one(stmt).await?;
        Ok(row
            .map(|r| r.try_get::<i64>("", "cnt"))
            .transpose()?
            .unwrap_or(0))
    }

    /// Recent dead-letter records for admin inspection.
    pub async fn list_dead_letters(&self, limit: u64) -> Result<Vec<DeadLetterJob>> {
        DeadLetterJobEntity::find()
            .order_by_desc(DeadLetterJobColumn::FailedAt)
            .limit(limit)
            .all(self.pool.read())
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(600);

        for attempt in 0..20 {
            let d = backoff_delay(attempt, base, cap);
            let exp = base.saturating_mul(2u32.saturating_pow(attempt)).min(cap);
            assert!(d >= exp, "backoff below exponential floor at attempt {}", attempt);
            assert!(d < exp + base, "jitter exceeds base at attempt {}", attempt);
        }

        // Deep attempts stay within cap + jitter.
        let d = backoff_delay(30, base, cap);
        assert!(d <= cap + base);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High.as_i16() < JobPriority::Default.as_i16());
        assert!(JobPriority::Default.as_i16() < JobPriority::Low.as_i16());
        assert_eq!(JobPriority::from_i16(0), JobPriority::High);
        assert_eq!(JobPriority::from_i16(7), JobPriority::Default);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = JobPayload::PurgeMessageVectors {
            guild_id: 10,
            message_ids: vec![1, 2, 3],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "purge_message_vectors");
        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.guild_id(), 10);
    }

    #[test]
    fn test_dedup_keys() {
        assert_eq!(sessionize_dedup_key(100), "sz:100");
        assert_eq!(backfill_dedup_key(100, 42), "bf:100:42");
        let id = Uuid::nil();
        assert!(embed_session_dedup_key(id).starts_with("es:"));
    }
}
