//! Repository pattern for database operations
//!
//! All relational-store mutations in the system flow through this type.
//! Mutations are single-transaction; partial writes never persist. The
//! vector-key columns are only changed through the compare-and-swap
//! helpers so concurrent workers converge instead of clobbering.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Input for `upsert_message`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: i64,
    pub channel_id: i64,
    pub guild_id: i64,
    pub author_id: i64,
    pub content: String,
    pub reply_to_id: Option<i64>,
    pub timestamp: DateTime<FixedOffset>,
}

/// Outcome of `upsert_message`, carrying the prior state the ingestor
/// needs to decide what to enqueue.
#[derive(Debug, Clone)]
pub struct MessageUpsert {
    pub message: Message,
    /// False when the replayed content is identical (idempotent replay).
    pub content_changed: bool,
    /// True when the row was already soft-deleted; edits are dropped.
    pub was_deleted: bool,
    pub prior_vector_key: Option<Uuid>,
    /// True when the row did not exist before.
    pub created: bool,
}

/// A soft-deleted message whose vector still needs purging
#[derive(Debug, Clone)]
pub struct PurgeTarget {
    pub message_id: i64,
    pub vector_key: Option<Uuid>,
}

/// Input for `create_session`
#[derive(Debug, Clone)]
pub struct NewSession {
    pub guild_id: i64,
    pub channel_id: i64,
    pub start_message_id: i64,
    pub end_message_id: i64,
    pub message_count: i32,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
}

/// Input for `insert_attachment`
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub id: i64,
    pub message_id: i64,
    pub guild_id: i64,
    pub channel_id: i64,
    pub source_url: String,
    pub mime: String,
    pub size_bytes: i64,
    pub source_type: SourceType,
}

/// Per-guild sync accounting over messages in indexed channels
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncHealth {
    pub total: i64,
    pub synced: i64,
    pub unindexed: i64,
    pub stale: i64,
}

impl SyncHealth {
    /// `synced / (synced + unindexed + stale)`; 1.0 when nothing is indexable.
    pub fn ratio(&self) -> f64 {
        let denom = self.synced + self.unindexed + self.stale;
        if denom == 0 {
            1.0
        } else {
            self.synced as f64 / denom as f64
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.ratio() > 0.95
    }
}

fn ids_list(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn uuid_list(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id))
        .collect::<Vec<_>>()
        .join(",")
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().into()
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Guild Operations
    // ========================================================================

    /// Insert or refresh a guild on first event. Idempotent.
    pub async fn upsert_guild(&self, id: i64, name: &str) -> Result<Guild> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO guilds (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
            "#,
            vec![id.into(), name.into()],
        );
        self.write_conn().execute(stmt).await?;

        GuildEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "guild".into(),
                id: id.to_string(),
            })
    }

    pub async fn find_guild(&self, id: i64) -> Result<Option<Guild>> {
        GuildEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn set_guild_active(&self, id: i64, active: bool) -> Result<Guild> {
        let mut guild: GuildActiveModel = GuildEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "guild".into(),
                id: id.to_string(),
            })?
            .into();

        guild.is_active = Set(active);
        guild.updated_at = Set(now());
        guild.update(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn list_active_guilds(&self) -> Result<Vec<Guild>> {
        GuildEntity::find()
            .filter(GuildColumn::IsActive.eq(true))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Channel Operations
    // ========================================================================

    /// Insert or refresh a channel on first event. Idempotent; never
    /// touches the admin `is_indexed` flag.
    pub async fn upsert_channel(&self, id: i64, guild_id: i64, name: &str) -> Result<Channel> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO channels (id, guild_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
            "#,
            vec![id.into(), guild_id.into(), name.into()],
        );
        self.write_conn().execute(stmt).await?;

        ChannelEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "channel".into(),
                id: id.to_string(),
            })
    }

    pub async fn find_channel(&self, id: i64) -> Result<Option<Channel>> {
        ChannelEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Flip the admin indexing flag; returns the previous value so the
    /// caller can skip enqueuing when the flag did not actually change.
    pub async fn set_channel_indexed(
        &self,
        guild_id: i64,
        channel_id: i64,
        indexed: bool,
    ) -> Result<(Channel, bool)> {
        let channel = ChannelEntity::find_by_id(channel_id)
            .filter(ChannelColumn::GuildId.eq(guild_id))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "channel".into(),
                id: channel_id.to_string(),
            })?;

        let previous = channel.is_indexed;
        if previous == indexed {
            return Ok((channel, previous));
        }

        let mut active: ChannelActiveModel = channel.into();
        active.is_indexed = Set(indexed);
        active.updated_at = Set(now());
        let updated = active.update(self.write_conn()).await?;
        Ok((updated, previous))
    }

    pub async fn soft_delete_channel(&self, guild_id: i64, channel_id: i64) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE channels SET is_deleted = TRUE, updated_at = NOW()
             WHERE id = $1 AND guild_id = $2",
            vec![channel_id.into(), guild_id.into()],
        );
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    pub async fn list_indexed_channels(&self, guild_id: i64) -> Result<Vec<Channel>> {
        ChannelEntity::find()
            .filter(ChannelColumn::GuildId.eq(guild_id))
            .filter(ChannelColumn::IsIndexed.eq(true))
            .filter(ChannelColumn::IsDeleted.eq(false))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn upsert_user(&self, id: i64, display_name: &str) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO users (id, display_name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
                SET display_name = EXCLUDED.display_name, updated_at = NOW()
            "#,
            vec![id.into(), display_name.into()],
        );
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    /// Resolve display names for enrichment. Unknown ids are absent.
    pub async fn display_names(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let users = UserEntity::find()
            .filter(UserColumn::Id.is_in(ids.to_vec()))
            .all(self.read_conn())
            .await?;
        Ok(users.into_iter().map(|u| (u.id, u.display_name)).collect())
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Insert or update a message, serialized per id by row-level locking.
    ///
    /// Replays with unchanged content report `content_changed = false`.
    /// Edits to soft-deleted rows are dropped: deleted content never
    /// comes back.
    pub async fn upsert_message(&self, m: NewMessage) -> Result<MessageUpsert> {
        let txn = self.write_conn().begin().await?;

        let existing = MessageEntity::find_by_id(m.id)
            .lock_exclusive()
            .one(&txn)
            .await?;

        let result = match existing {
            None => {
                let ts = now();
                let model = MessageActiveModel {
                    id: Set(m.id),
                    channel_id: Set(m.channel_id),
                    guild_id: Set(m.guild_id),
                    author_id: Set(m.author_id),
                    content: Set(m.content.clone()),
                    reply_to_id: Set(m.reply_to_id),
                    message_timestamp: Set(m.timestamp),
                    is_deleted: Set(false),
                    deleted_at: Set(None),
                    vector_key: Set(None),
                    indexed_at: Set(None),
                    created_at: Set(ts),
                    updated_at: Set(ts),
                };
                let inserted = model.insert(&txn).await?;
                MessageUpsert {
                    message: inserted,
                    content_changed: true,
                    was_deleted: false,
                    prior_vector_key: None,
                    created: true,
                }
            }
            Some(prev) if prev.is_deleted => MessageUpsert {
                prior_vector_key: prev.vector_key,
                message: prev,
                content_changed: false,
                was_deleted: true,
                created: false,
            },
            Some(prev) if prev.content == m.content => MessageUpsert {
                prior_vector_key: prev.vector_key,
                message: prev,
                content_changed: false,
                was_deleted: false,
                created: false,
            },
            Some(prev) => {
                let prior_vector_key = prev.vector_key;
                let mut active: MessageActiveModel = prev.into();
                active.content = Set(m.content.clone());
                active.updated_at = Set(now());
                let updated = active.update(&txn).await?;
                MessageUpsert {
                    message: updated,
                    content_changed: true,
                    was_deleted: false,
                    prior_vector_key,
                    created: false,
                }
            }
        };

        txn.commit().await?;
        Ok(result)
    }

    /// Soft-delete messages and return every affected row with its prior
    /// vector key. Rows already deleted are skipped (idempotent replay).
    pub async fn soft_delete_messages(
        &self,
        guild_id: i64,
        ids: &[i64],
    ) -> Result<Vec<PurgeTarget>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            UPDATE messages
            SET is_deleted = TRUE,
                deleted_at = NOW(),
                content = $2,
                updated_at = NOW()
            WHERE guild_id = $1 AND id IN ({}) AND is_deleted = FALSE
            RETURNING id, vector_key
            "#,
            ids_list(ids)
        );

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![guild_id.into(), DELETED_CONTENT.into()],
        );

        let rows = self.write_conn().query_all(stmt).await?;
        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            targets.push(PurgeTarget {
                message_id: row.try_get::<i64>("", "id")?,
                vector_key: row.try_get::<Option<Uuid>>("", "vector_key")?,
            });
        }
        Ok(targets)
    }

    /// Soft-delete every message in a channel; used when indexing is
    /// toggled off or the channel is deleted upstream.
    pub async fn bulk_soft_delete_channel_messages(
        &self,
        guild_id: i64,
        channel_id: i64,
    ) -> Result<Vec<PurgeTarget>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE messages
            SET is_deleted = TRUE,
                deleted_at = NOW(),
                content = $3,
                updated_at = NOW()
            WHERE guild_id = $1 AND channel_id = $2 AND is_deleted = FALSE
            RETURNING id, vector_key
            "#,
            vec![guild_id.into(), channel_id.into(), DELETED_CONTENT.into()],
        );

        let rows = self.write_conn().query_all(stmt).await?;
        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            targets.push(PurgeTarget {
                message_id: row.try_get::<i64>("", "id")?,
                vector_key: row.try_get::<Option<Uuid>>("", "vector_key")?,
            });
        }
        Ok(targets)
    }

    pub async fn find_message(&self, id: i64) -> Result<Option<Message>> {
        MessageEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Stamp member messages with the vector key of the session (or chunk)
    /// that now carries their content. Deleted rows are never stamped.
    pub async fn mark_messages_indexed(&self, ids: &[i64], vector_key: Uuid) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            UPDATE messages
            SET vector_key = $1, indexed_at = NOW()
            WHERE id IN ({}) AND is_deleted = FALSE
            "#,
            ids_list(ids)
        );
        let stmt =
            Statement::from_sql_and_values(DbBackend::Postgres, &sql, vec![vector_key.into()]);
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Compare-and-swap: null the vector key only if it still matches.
    /// Returns false on a CAS miss so the caller can re-read and decide.
    pub async fn clear_message_vector_key(&self, id: i64, expected: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE messages SET vector_key = NULL WHERE id = $1 AND vector_key = $2",
            vec![id.into(), expected.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Null vector keys for all of a channel's messages (channel purge).
    pub async fn clear_channel_vector_keys(&self, guild_id: i64, channel_id: i64) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE messages SET vector_key = NULL, indexed_at = NULL
            WHERE guild_id = $1 AND channel_id = $2 AND vector_key IS NOT NULL
            "#,
            vec![guild_id.into(), channel_id.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Null vector keys for a channel's sessions (channel purge).
    pub async fn clear_channel_session_vector_keys(
        &self,
        guild_id: i64,
        channel_id: i64,
    ) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE message_sessions SET vector_key = NULL, indexed_at = NULL
            WHERE guild_id = $1 AND channel_id = $2 AND vector_key IS NOT NULL
            "#,
            vec![guild_id.into(), channel_id.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Null vector keys for a channel's document chunks (channel purge).
    pub async fn clear_channel_chunk_vector_keys(
        &self,
        guild_id: i64,
        channel_id: i64,
    ) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE document_chunks SET vector_key = NULL, indexed_at = NULL
            WHERE guild_id = $1 AND channel_id = $2 AND vector_key IS NOT NULL
            "#,
            vec![guild_id.into(), channel_id.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Load the sessionizer window around an anchor message: up to
    /// `before` messages at or before the anchor and `after` past it,
    /// ascending, excluding soft-deleted rows.
    pub async fn read_session_window(
        &self,
        channel_id: i64,
        around: i64,
        before: u64,
        after: u64,
    ) -> Result<Vec<Message>> {
        let mut earlier = MessageEntity::find()
            .filter(MessageColumn::ChannelId.eq(channel_id))
            .filter(MessageColumn::IsDeleted.eq(false))
            .filter(MessageColumn::Id.lte(around))
            .order_by_desc(MessageColumn::Id)
            .limit(before)
            .all(self.read_conn())
            .await?;
        earlier.reverse();

        let later = MessageEntity::find()
            .filter(MessageColumn::ChannelId.eq(channel_id))
            .filter(MessageColumn::IsDeleted.eq(false))
            .filter(MessageColumn::Id.gt(around))
            .order_by_asc(MessageColumn::Id)
            .limit(after)
            .all(self.read_conn())
            .await?;

        earlier.extend(later);
        Ok(earlier)
    }

    /// Live (non-deleted) messages within a session's id range, ascending.
    pub async fn messages_in_session(&self, session: &MessageSession) -> Result<Vec<Message>> {
        MessageEntity::find()
            .filter(MessageColumn::ChannelId.eq(session.channel_id))
            .filter(MessageColumn::Id.between(session.start_message_id, session.end_message_id))
            .filter(MessageColumn::IsDeleted.eq(false))
            .order_by_asc(MessageColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Page of live messages after `after_id`, ascending; used by backfill.
    pub async fn messages_after(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: u64,
    ) -> Result<Vec<Message>> {
        MessageEntity::find()
            .filter(MessageColumn::ChannelId.eq(channel_id))
            .filter(MessageColumn::Id.gt(after_id))
            .filter(MessageColumn::IsDeleted.eq(false))
            .order_by_asc(MessageColumn::Id)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Recent live messages for the read-only query interface.
    pub async fn list_recent_messages(
        &self,
        guild_id: i64,
        channel_id: i64,
        since: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
        limit: u64,
    ) -> Result<Vec<Message>> {
        MessageEntity::find()
            .filter(MessageColumn::GuildId.eq(guild_id))
            .filter(MessageColumn::ChannelId.eq(channel_id))
            .filter(MessageColumn::IsDeleted.eq(false))
            .filter(MessageColumn::MessageTimestamp.between(since, until))
            .order_by_desc(MessageColumn::MessageTimestamp)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    pub async fn create_session(&self, s: NewSession) -> Result<MessageSession> {
        let ts = now();
        let session = MessageSessionActiveModel {
            id: Set(Uuid::new_v4()),
            guild_id: Set(s.guild_id),
            channel_id: Set(s.channel_id),
            start_message_id: Set(s.start_message_id),
            end_message_id: Set(s.end_message_id),
            message_count: Set(s.message_count),
            start_time: Set(s.start_time),
            end_time: Set(s.end_time),
            vector_key: Set(None),
            indexed_at: Set(None),
            summary: Set(None),
            created_at: Set(ts),
            updated_at: Set(ts),
        };
        session.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn find_session(&self, id: Uuid) -> Result<Option<MessageSession>> {
        MessageSessionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// The session whose id range contains the given message, if any.
    pub async fn session_containing(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> Result<Option<MessageSession>> {
        MessageSessionEntity::find()
            .filter(MessageSessionColumn::ChannelId.eq(channel_id))
            .filter(MessageSessionColumn::StartMessageId.lte(message_id))
            .filter(MessageSessionColumn::EndMessageId.gte(message_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Sessions whose id range overlaps [start, end] in a channel.
    pub async fn sessions_overlapping(
        &self,
        channel_id: i64,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<MessageSession>> {
        MessageSessionEntity::find()
            .filter(MessageSessionColumn::ChannelId.eq(channel_id))
            .filter(MessageSessionColumn::StartMessageId.lte(end_id))
            .filter(MessageSessionColumn::EndMessageId.gte(start_id))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Sessions in a guild containing any of the given message ids. The
    /// join pins the channel: a numeric id range from another channel
    /// never matches.
    pub async fn sessions_containing_any(
        &self,
        guild_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<MessageSession>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT DISTINCT s.* FROM message_sessions s
            JOIN messages m ON m.channel_id = s.channel_id
            WHERE s.guild_id = $1
              AND m.id IN ({})
              AND m.id BETWEEN s.start_message_id AND s.end_message_id
            "#,
            ids_list(message_ids)
        );
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, vec![guild_id.into()]);
        MessageSessionEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_sessions_for_channel(
        &self,
        guild_id: i64,
        channel_id: i64,
    ) -> Result<Vec<MessageSession>> {
        MessageSessionEntity::find()
            .filter(MessageSessionColumn::GuildId.eq(guild_id))
            .filter(MessageSessionColumn::ChannelId.eq(channel_id))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<bool> {
        let result = MessageSessionEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Bump a session's updated_at so it reads as stale until re-embedded.
    pub async fn touch_session(&self, id: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE message_sessions SET updated_at = NOW() WHERE id = $1",
            vec![id.into()],
        );
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    /// Record a successful vector write for a session.
    pub async fn mark_session_indexed(&self, id: Uuid, vector_key: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE message_sessions SET vector_key = $2, indexed_at = NOW() WHERE id = $1",
            vec![id.into(), vector_key.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        if result.rows_affected() == 0 {
            // Session superseded or deleted between embed and confirm.
            return Err(AppError::NotFound {
                resource_type: "message_session".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Compare-and-swap variant of session vector-key clearing.
    pub async fn clear_session_vector_key(&self, id: Uuid, expected: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE message_sessions SET vector_key = NULL WHERE id = $1 AND vector_key = $2",
            vec![id.into(), expected.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Count live messages remaining inside a session's range.
    pub async fn count_live_messages_in_range(
        &self,
        channel_id: i64,
        start_id: i64,
        end_id: i64,
    ) -> Result<i64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT COUNT(*) AS cnt FROM messages
            WHERE channel_id = $1 AND id BETWEEN $2 AND $3 AND is_deleted = FALSE
            "#,
            vec![channel_id.into(), start_id.into(), end_id.into()],
        );
        let row = self.read_conn().query_one(stmt).await?;
        Ok(row.map(|r| r.try_get::<i64>("", "cnt")).transpose()?.unwrap_or(0))
    }

    // ========================================================================
    // Attachment and Chunk Operations
    // ========================================================================

    /// Insert an attachment row in `pending` state. Idempotent on replay.
    pub async fn insert_attachment(&self, a: NewAttachment) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO attachments
                (id, message_id, guild_id, channel_id, source_url, mime, size_bytes, source_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
            vec![
                a.id.into(),
                a.message_id.into(),
                a.guild_id.into(),
                a.channel_id.into(),
                a.source_url.into(),
                a.mime.into(),
                a.size_bytes.into(),
                String::from(a.source_type).into(),
            ],
        );
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    pub async fn find_attachment(&self, id: i64) -> Result<Option<Attachment>> {
        AttachmentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn set_attachment_status(
        &self,
        id: i64,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE attachments
            SET processing_status = $2, processing_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
            vec![id.into(), String::from(status).into(), error.into()],
        );
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    pub async fn set_attachment_extracted(
        &self,
        id: i64,
        extracted_text: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE attachments
            SET extracted_text = $2, description = $3, updated_at = NOW()
            WHERE id = $1
            "#,
            vec![id.into(), extracted_text.into(), description.into()],
        );
        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    /// Soft-delete attachments belonging to deleted messages; returns the
    /// affected attachment ids.
    pub async fn soft_delete_attachments_for_messages(
        &self,
        guild_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<i64>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            UPDATE attachments SET is_deleted = TRUE, updated_at = NOW()
            WHERE guild_id = $1 AND message_id IN ({}) AND is_deleted = FALSE
            RETURNING id
            "#,
            ids_list(message_ids)
        );
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, vec![guild_id.into()]);
        let rows = self.write_conn().query_all(stmt).await?;
        rows.into_iter()
            .map(|r| r.try_get::<i64>("", "id").map_err(Into::into))
            .collect()
    }

    pub async fn insert_chunk(&self, chunk: DocumentChunk) -> Result<DocumentChunk> {
        let active = DocumentChunkActiveModel {
            id: Set(chunk.id),
            attachment_id: Set(chunk.attachment_id),
            guild_id: Set(chunk.guild_id),
            channel_id: Set(chunk.channel_id),
            chunk_index: Set(chunk.chunk_index),
            chunk_text: Set(chunk.chunk_text.clone()),
            parent_chunk_id: Set(chunk.parent_chunk_id),
            token_count: Set(chunk.token_count),
            vector_key: Set(None),
            indexed_at: Set(None),
            created_at: Set(now()),
        };
        active.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn chunks_by_attachment(&self, attachment_id: i64) -> Result<Vec<DocumentChunk>> {
        DocumentChunkEntity::find()
            .filter(DocumentChunkColumn::AttachmentId.eq(attachment_id))
            .order_by_asc(DocumentChunkColumn::ChunkIndex)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn delete_chunks_for_attachment(&self, attachment_id: i64) -> Result<u64> {
        let result = DocumentChunkEntity::delete_many()
            .filter(DocumentChunkColumn::AttachmentId.eq(attachment_id))
            .exec(self.write_conn())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn mark_chunk_indexed(&self, id: Uuid, vector_key: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE document_chunks SET vector_key = $2, indexed_at = NOW() WHERE id = $1",
            vec![id.into(), vector_key.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource_type: "document_chunk".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn clear_chunk_vector_key(&self, id: Uuid, expected: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE document_chunks SET vector_key = NULL WHERE id = $1 AND vector_key = $2",
            vec![id.into(), expected.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Chunks whose parent attachments hang off the given messages;
    /// these share the messages' right-to-be-forgotten fate.
    pub async fn chunks_for_messages(
        &self,
        guild_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<DocumentChunk>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT c.* FROM document_chunks c
            JOIN attachments a ON c.attachment_id = a.id
            WHERE a.guild_id = $1 AND a.message_id IN ({})
            "#,
            ids_list(message_ids)
        );
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, vec![guild_id.into()]);
        DocumentChunkEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Drift Populations (Reconciler)
    // ========================================================================

    /// Live messages in indexed channels that have never been indexed.
    pub async fn list_unindexed_messages(&self, guild_id: i64, limit: u64) -> Result<Vec<Message>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT m.* FROM messages m
            JOIN channels c ON m.channel_id = c.id
            WHERE m.guild_id = $1
              AND c.is_indexed = TRUE
              AND c.is_deleted = FALSE
              AND m.is_deleted = FALSE
              AND m.vector_key IS NULL
              AND m.indexed_at IS NULL
            ORDER BY m.id ASC
            LIMIT $2
            "#,
            vec![guild_id.into(), (limit as i64).into()],
        );
        MessageEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Messages edited after their last indexing.
    pub async fn list_stale_messages(&self, guild_id: i64, limit: u64) -> Result<Vec<Message>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT m.* FROM messages m
            JOIN channels c ON m.channel_id = c.id
            WHERE m.guild_id = $1
              AND c.is_indexed = TRUE
              AND c.is_deleted = FALSE
              AND m.is_deleted = FALSE
              AND m.indexed_at IS NOT NULL
              AND m.updated_at > m.indexed_at
            ORDER BY m.id ASC
            LIMIT $2
            "#,
            vec![guild_id.into(), (limit as i64).into()],
        );
        MessageEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Sessions edited after their last indexing.
    pub async fn list_stale_sessions(
        &self,
        guild_id: i64,
        limit: u64,
    ) -> Result<Vec<MessageSession>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT s.* FROM message_sessions s
            WHERE s.guild_id = $1
              AND (
                  s.indexed_at IS NULL
                  OR s.updated_at > s.indexed_at
              )
            ORDER BY s.updated_at ASC
            LIMIT $2
            "#,
            vec![guild_id.into(), (limit as i64).into()],
        );
        MessageSessionEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Deleted messages still holding a vector key (pending purge).
    pub async fn list_pending_purge(&self, guild_id: i64, limit: u64) -> Result<Vec<Message>> {
        MessageEntity::find()
            .filter(MessageColumn::GuildId.eq(guild_id))
            .filter(MessageColumn::IsDeleted.eq(true))
            .filter(MessageColumn::VectorKey.is_not_null())
            .order_by_asc(MessageColumn::Id)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Attachments stuck in `processing` past the given age; a worker
    /// crash mid-job leaves rows here until re-enqueued.
    pub async fn list_stuck_attachments(
        &self,
        guild_id: i64,
        older_than_secs: i64,
        limit: u64,
    ) -> Result<Vec<Attachment>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT a.* FROM attachments a
            WHERE a.guild_id = $1
              AND a.is_deleted = FALSE
              AND (
                  a.processing_status = 'pending'
                  OR (a.processing_status = 'processing'
                      AND a.updated_at < NOW() - make_interval(secs => $2))
              )
            ORDER BY a.id ASC
            LIMIT $3
            "#,
            vec![
                guild_id.into(),
                (older_than_secs as f64).into(),
                (limit as i64).into(),
            ],
        );
        AttachmentEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Channels that should hold no vectors but whose messages still
    /// carry vector keys: a missed or half-applied purge.
    pub async fn channels_needing_purge(&self, guild_id: i64) -> Result<Vec<i64>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT DISTINCT m.channel_id FROM messages m
            JOIN channels c ON m.channel_id = c.id
            WHERE m.guild_id = $1
              AND m.vector_key IS NOT NULL
              AND (c.is_indexed = FALSE OR c.is_deleted = TRUE)
            "#,
            vec![guild_id.into()],
        );
        let rows = self.read_conn().query_all(stmt).await?;
        rows.into_iter()
            .map(|r| r.try_get::<i64>("", "channel_id").map_err(Into::into))
            .collect()
    }

    /// Which of the given vector keys are backed by a live relational
    /// record (a session id or a chunk vector key). Anything absent is an
    /// orphan in the vector namespace.
    pub async fn live_vector_keys(&self, keys: &[Uuid]) -> Result<Vec<Uuid>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let list = uuid_list(keys);
        let sql = format!(
            r#"
            SELECT id AS key FROM message_sessions WHERE id IN ({list})
            UNION
            SELECT vector_key AS key FROM document_chunks
            WHERE vector_key IS NOT NULL AND vector_key IN ({list})
            "#,
        );
        let stmt = Statement::from_string(DbBackend::Postgres, sql);
        let rows = self.read_conn().query_all(stmt).await?;
        rows.into_iter()
            .map(|r| r.try_get::<Uuid>("", "key").map_err(Into::into))
            .collect()
    }

    /// Per-guild sync accounting over messages in indexed channels.
    pub async fn sync_health(&self, guild_id: i64) -> Result<SyncHealth> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE m.vector_key IS NOT NULL
                      AND m.indexed_at IS NOT NULL
                      AND m.updated_at <= m.indexed_at
                ) AS synced,
                COUNT(*) FILTER (WHERE m.vector_key IS NULL) AS unindexed,
                COUNT(*) FILTER (
                    WHERE m.indexed_at IS NOT NULL AND m.updated_at > m.indexed_at
                ) AS stale
            FROM messages m
            JOIN channels c ON m.channel_id = c.id
            WHERE m.guild_id = $1
              AND c.is_indexed = TRUE
              AND c.is_deleted = FALSE
              AND m.is_deleted = FALSE
            "#,
            vec![guild_id.into()],
        );
        let row = self
            .read_conn()
            .query_one(stmt)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: "sync_health returned no row".into(),
            })?;

        Ok(SyncHealth {
            total: row.try_get::<i64>("", "total")?,
            synced: row.try_get::<i64>("", "synced")?,
            unindexed: row.try_get::<i64>("", "unindexed")?,
            stale: row.try_get::<i64>("", "stale")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_health_ratio() {
        let health = SyncHealth {
            total: 100,
            synced: 96,
            unindexed: 3,
            stale: 1,
        };
        assert!(health.is_healthy());
        assert!((health.ratio() - 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_sync_health_empty_guild_is_healthy() {
        let health = SyncHealth {
            total: 0,
            synced: 0,
            unindexed: 0,
            stale: 0,
        };
        assert_eq!(health.ratio(), 1.0);
        assert!(health.is_healthy());
    }

    #[test]
    fn test_ids_list_formatting() {
        assert_eq!(ids_list(&[1, 2, 3]), "1,2,3");
        assert_eq!(ids_list(&[]), "");
    }
}
