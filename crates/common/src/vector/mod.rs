//! Tenant-scoped vector index adapter
//!
//! A pgvector-backed namespace holding one point per embedded session or
//! document chunk. The adapter is the only path to the namespace and it
//! makes tenant isolation structural:
//!
//! - every payload carries a mandatory `guild_id` (non-positive ids fail
//!   closed as a tenant violation)
//! - every read goes through [`TenantFilter`], whose only constructor
//!   requires a guild id
//!
//! Payloads store metadata and a short preview only (at most 1 KiB);
//! attachment bytes never enter the namespace. Cosine is the declared
//! distance and vectors are unit norm when the embedder emits unit norm.

use crate::config::DatabaseConfig;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, FixedOffset};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum preview bytes stored in a point payload.
pub const MAX_PREVIEW_BYTES: usize = 1024;

/// What a point was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Session,
    DocChunk,
}

impl PointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointKind::Session => "session",
            PointKind::DocChunk => "doc_chunk",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "doc_chunk" => PointKind::DocChunk,
            _ => PointKind::Session,
        }
    }
}

/// Mandatory-guild read filter. There is no way to build one without a
/// guild id, so every query through the adapter is tenant-scoped.
#[derive(Debug, Clone)]
pub struct TenantFilter {
    guild_id: i64,
    channel_id: Option<i64>,
    kind: Option<PointKind>,
}

impl TenantFilter {
    pub fn for_guild(guild_id: i64) -> Result<Self> {
        if guild_id <= 0 {
            return Err(AppError::TenantViolation {
                message: format!("filter constructed with invalid guild_id {}", guild_id),
            });
        }
        Ok(Self {
            guild_id,
            channel_id: None,
            kind: None,
        })
    }

    pub fn channel(mut self, channel_id: i64) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn kind(mut self, kind: PointKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn guild_id(&self) -> i64 {
        self.guild_id
    }
}

/// Point payload: source metadata plus a bounded preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub guild_id: i64,
    pub channel_id: Option<i64>,
    pub kind: PointKind,
    pub source_ids: Vec<i64>,
    pub preview: String,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
}

/// A point to upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f64,
    pub payload: PointPayload,
}

/// A scrolled point (no vector, no score); used by the reconciler.
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: Uuid,
    pub payload: PointPayload,
}

/// Truncate text to the payload preview budget on a char boundary.
pub fn truncate_preview(text: &str) -> String {
    if text.len() <= MAX_PREVIEW_BYTES {
        return text.to_string();
    }
    let mut end = MAX_PREVIEW_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Format a vector in pgvector text syntax: `[1,2,3]`
fn embedding_literal(vector: &[f32]) -> String {
    format!(
        "[{}]",
        vector
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Vector namespace client
#[derive(Clone)]
pub struct VectorStore {
    pool: DbPool,
    dimension: usize,
}

impl VectorStore {
    /// Connect to the vector namespace. The pool may share the relational
    /// database or point at a dedicated instance.
    pub async fn new(config: &DatabaseConfig, dimension: usize) -> Result<Self> {
        let pool = DbPool::new(config).await?;
        Ok(Self { pool, dimension })
    }

    /// Reuse an existing pool (single-database deployments).
    pub fn with_pool(pool: DbPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Idempotently create the namespace: pgvector extension, the points
    /// table with payload indexes on guild and channel, and the runtime
    /// manifest row. A dimension or identity mismatch against an existing
    /// namespace is a fatal startup error.
    pub async fn ensure_namespace(&self, embedder_identity: &str) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE EXTENSION IF NOT EXISTS vector;

            CREATE TABLE IF NOT EXISTS vector_namespace_meta (
                id                SMALLINT PRIMARY KEY DEFAULT 1,
                dimension         INTEGER NOT NULL,
                embedder_identity TEXT NOT NULL,
                created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TABLE IF NOT EXISTS vector_points (
                id         UUID PRIMARY KEY,
                guild_id   BIGINT NOT NULL,
                channel_id BIGINT,
                kind       TEXT NOT NULL,
                source_ids JSONB NOT NULL,
                preview    TEXT NOT NULL,
                start_time TIMESTAMPTZ,
                end_time   TIMESTAMPTZ,
                embedding  vector({dim}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_points_guild ON vector_points (guild_id);
            CREATE INDEX IF NOT EXISTS idx_points_guild_channel ON vector_points (guild_id, channel_id);
            "#,
            dim = self.dimension
        );
        self.pool.write().execute_unprepared(&ddl).await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO vector_namespace_meta (id, dimension, embedder_identity)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
            vec![(self.dimension as i32).into(), embedder_identity.into()],
        );
        self.pool.write().execute(stmt).await?;

        let check = Statement::from_string(
            DbBackend::Postgres,
            "SELECT dimension, embedder_identity FROM vector_namespace_meta WHERE id = 1"
                .to_string(),
        );
        if let Some(row) = self.pool.read().query_one(check).await? {
            let dim: i32 = row.try_get("", "dimension")?;
            let identity: String = row.try_get("", "embedder_identity")?;
            if dim as usize != self.dimension {
                return Err(AppError::DimensionMismatch {
                    expected: dim as usize,
                    actual: self.dimension,
                });
            }
            if identity != embedder_identity {
                return Err(AppError::Configuration {
                    message: format!(
                        "embedder identity changed ({} -> {}); bump identity_version and let the reconciler re-embed",
                        identity, embedder_identity
                    ),
                });
            }
        }

        info!(dimension = self.dimension, "Vector namespace ready");
        Ok(())
    }

    fn validate_point(&self, point: &VectorPoint) -> Result<()> {
        if point.payload.guild_id <= 0 {
            return Err(AppError::TenantViolation {
                message: format!(
                    "point {} written without a valid guild_id",
                    point.id
                ),
            });
        }
        if point.vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: point.vector.len(),
            });
        }
        Ok(())
    }

    /// Upsert points. Idempotent by id; blocks until durable.
    pub async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        for point in points {
            self.validate_point(point)?;

            let preview = truncate_preview(&point.payload.preview);
            let source_ids = serde_json::to_value(&point.payload.source_ids)?;

            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO vector_points
                    (id, guild_id, channel_id, kind, source_ids, preview,
                     start_time, end_time, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::vector)
                ON CONFLICT (id) DO UPDATE SET
                    guild_id = EXCLUDED.guild_id,
                    channel_id = EXCLUDED.channel_id,
                    kind = EXCLUDED.kind,
                    source_ids = EXCLUDED.source_ids,
                    preview = EXCLUDED.preview,
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    embedding = EXCLUDED.embedding
                "#,
                vec![
                    point.id.into(),
                    point.payload.guild_id.into(),
                    point.payload.channel_id.into(),
                    point.payload.kind.as_str().into(),
                    source_ids.into(),
                    preview.into(),
                    point.payload.start_time.into(),
                    point.payload.end_time.into(),
                    embedding_literal(&point.vector).into(),
                ],
            );
            self.pool.write().execute(stmt).await?;
        }

        debug!(count = points.len(), "Vector points upserted");
        Ok(())
    }

    /// Delete points by id. Idempotent.
    pub async fn delete(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let list = ids
            .iter()
            .map(|id| format!("'{}'", id))
            .collect::<Vec<_>>()
            .join(",");
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            format!("DELETE FROM vector_points WHERE id IN ({})", list),
        );
        let result = self.pool.write().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Delete every point matching a tenant filter. Idempotent.
    pub async fn delete_where(&self, filter: &TenantFilter) -> Result<u64> {
        let (clause, values) = filter_clause(filter);
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            &format!("DELETE FROM vector_points WHERE {}", clause),
            values,
        );
        let result = self.pool.write().execute(stmt).await?;
        debug!(
            guild_id = filter.guild_id,
            deleted = result.rows_affected(),
            "Vector points deleted by filter"
        );
        Ok(result.rows_affected())
    }

    /// Approximate nearest-neighbor search under a mandatory tenant
    /// filter, cosine similarity, descending.
    pub async fn search(
        &self,
        vector: &[f32],
        filter: &TenantFilter,
        limit: u64,
        score_min: f64,
    ) -> Result<Vec<ScoredPoint>> {
        if vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let (clause, mut values) = filter_clause(filter);
        let embedding = embedding_literal(vector);
        let next = values.len() + 1;
        let sql = format!(
            r#"
            SELECT id, guild_id, channel_id, kind, source_ids, preview,
                   start_time, end_time,
                   1 - (embedding <=> ${next}::vector) AS score
            FROM vector_points
            WHERE {clause}
              AND 1 - (embedding <=> ${next}::vector) >= ${min}
            ORDER BY embedding <=> ${next}::vector
            LIMIT ${lim}
            "#,
            clause = clause,
            next = next,
            min = next + 1,
            lim = next + 2,
        );
        values.push(embedding.into());
        values.push(score_min.into());
        values.push((limit as i64).into());

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let rows = self.pool.read().query_all(stmt).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload = payload_from_row(&row)?;
            // Belt and braces: the clause already pins the guild.
            if payload.guild_id != filter.guild_id {
                return Err(AppError::TenantViolation {
                    message: "search returned a point outside the filtered guild".into(),
                });
            }
            out.push(ScoredPoint {
                id: row.try_get("", "id")?,
                score: row.try_get("", "score")?,
                payload,
            });
        }
        Ok(out)
    }

    /// Keyset-scroll a guild's points, id-ascending. Used by the
    /// reconciler for orphan detection.
    pub async fn scroll(
        &self,
        filter: &TenantFilter,
        after: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<StoredPoint>> {
        let (clause, mut values) = filter_clause(filter);
        let mut sql = format!(
            "SELECT id, guild_id, channel_id, kind, source_ids, preview, start_time, end_time
             FROM vector_points WHERE {}",
            clause
        );
        if let Some(after_id) = after {
            sql.push_str(&format!(" AND id > ${}", values.len() + 1));
            values.push(after_id.into());
        }
        sql.push_str(&format!(" ORDER BY id ASC LIMIT ${}", values.len() + 1));
        values.push((limit as i64).into());

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let rows = self.pool.read().query_all(stmt).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(StoredPoint {
                id: row.try_get("", "id")?,
                payload: payload_from_row(&row)?,
            });
        }
        Ok(out)
    }

    /// Distinct guild ids present in the namespace.
    pub async fn guild_ids(&self) -> Result<Vec<i64>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT DISTINCT guild_id FROM vector_points".to_string(),
        );
        let rows = self.pool.read().query_all(stmt).await?;
        rows.into_iter()
            .map(|r| r.try_get::<i64>("", "guild_id").map_err(Into::into))
            .collect()
    }
}

fn filter_clause(filter: &TenantFilter) -> (String, Vec<sea_orm::Value>) {
    let mut clause = "guild_id = $1".to_string();
    let mut values: Vec<sea_orm::Value> = vec![filter.guild_id.into()];

    if let Some(channel_id) = filter.channel_id {
        values.push(channel_id.into());
        clause.push_str(&format!(" AND channel_id = ${}", values.len()));
    }
    if let Some(kind) = filter.kind {
        values.push(kind.as_str().into());
        clause.push_str(&format!(" AND kind = ${}", values.len()));
    }
    (clause, values)
}

fn payload_from_row(row: &sea_orm::QueryResult) -> Result<PointPayload> {
    let source_ids_json: serde_json::Value = row.try_get("", "source_ids")?;
    let source_ids: Vec<i64> = serde_json::from_value(source_ids_json)?;
    let kind: String = row.try_get("", "kind")?;

    Ok(PointPayload {
        guild_id: row.try_get("", "guild_id")?,
        channel_id: row.try_get("", "channel_id")?,
        kind: PointKind::parse(&kind),
        source_ids,
        preview: row.try_get("", "preview")?,
        start_time: row.try_get("", "start_time")?,
        end_time: row.try_get("", "end_time")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_requires_guild() {
        assert!(TenantFilter::for_guild(0).is_err());
        assert!(TenantFilter::for_guild(-5).is_err());
        assert!(TenantFilter::for_guild(10).is_ok());
    }

    #[test]
    fn test_filter_clause_composition() {
        let filter = TenantFilter::for_guild(10).unwrap();
        let (clause, values) = filter_clause(&filter);
        assert_eq!(clause, "guild_id = $1");
        assert_eq!(values.len(), 1);

        let filter = TenantFilter::for_guild(10)
            .unwrap()
            .channel(100)
            .kind(PointKind::Session);
        let (clause, values) = filter_clause(&filter);
        assert_eq!(clause, "guild_id = $1 AND channel_id = $2 AND kind = $3");
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_truncate_preview_bounds() {
        let short = "hello";
        assert_eq!(truncate_preview(short), "hello");

        let long = "x".repeat(4096);
        let truncated = truncate_preview(&long);
        assert_eq!(truncated.len(), MAX_PREVIEW_BYTES);
    }

    #[test]
    fn test_truncate_preview_char_boundary() {
        // 4-byte scalar values straddling the limit must not split.
        let long = "\u{1F600}".repeat(300);
        let truncated = truncate_preview(&long);
        assert!(truncated.len() <= MAX_PREVIEW_BYTES);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[test]
    fn test_embedding_literal() {
        assert_eq!(embedding_literal(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
    }
}
