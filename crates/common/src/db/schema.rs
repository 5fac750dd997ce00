//! Schema bootstrap
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` batch executed at startup.
//! All tenant-scoped tables carry `guild_id` and cascade on it so a full
//! tenant hard delete needs only the `guilds` row removed. The vector
//! namespace has its own DDL in the vector adapter.

use crate::errors::Result;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tracing::info;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS guilds (
    id          BIGINT PRIMARY KEY,
    name        TEXT NOT NULL,
    is_active   BOOLEAN NOT NULL DEFAULT TRUE,
    joined_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS channels (
    id          BIGINT PRIMARY KEY,
    guild_id    BIGINT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    is_indexed  BOOLEAN NOT NULL DEFAULT FALSE,
    is_deleted  BOOLEAN NOT NULL DEFAULT FALSE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_channels_guild ON channels (guild_id);

CREATE TABLE IF NOT EXISTS users (
    id            BIGINT PRIMARY KEY,
    display_name  TEXT NOT NULL,
    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS messages (
    id                BIGINT PRIMARY KEY,
    channel_id        BIGINT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    guild_id          BIGINT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
    author_id         BIGINT NOT NULL,
    content           TEXT NOT NULL,
    reply_to_id       BIGINT,
    message_timestamp TIMESTAMPTZ NOT NULL,
    is_deleted        BOOLEAN NOT NULL DEFAULT FALSE,
    deleted_at        TIMESTAMPTZ,
    vector_key        UUID,
    indexed_at        TIMESTAMPTZ,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_messages_channel_ts ON messages (channel_id, message_timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_guild_deleted ON messages (guild_id, is_deleted);

CREATE TABLE IF NOT EXISTS message_sessions (
    id               UUID PRIMARY KEY,
    guild_id         BIGINT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
    channel_id       BIGINT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    start_message_id BIGINT NOT NULL,
    end_message_id   BIGINT NOT NULL,
    message_count    INTEGER NOT NULL,
    start_time       TIMESTAMPTZ NOT NULL,
    end_time         TIMESTAMPTZ NOT NULL,
    vector_key       UUID,
    indexed_at       TIMESTAMPTZ,
    summary          TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_sessions_channel_range
    ON message_sessions (channel_id, start_message_id, end_message_id);
CREATE INDEX IF NOT EXISTS idx_sessions_guild ON message_sessions (guild_id);

CREATE TABLE IF NOT EXISTS attachments (
    id                BIGINT PRIMARY KEY,
    message_id        BIGINT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    guild_id          BIGINT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
    channel_id        BIGINT NOT NULL,
    source_url        TEXT NOT NULL,
    mime              TEXT NOT NULL,
    size_bytes        BIGINT NOT NULL,
    source_type       TEXT NOT NULL,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    processing_error  TEXT,
    extracted_text    TEXT,
    description       TEXT,
    is_deleted        BOOLEAN NOT NULL DEFAULT FALSE,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments (message_id);
CREATE INDEX IF NOT EXISTS idx_attachments_guild_status ON attachments (guild_id, processing_status);

CREATE TABLE IF NOT EXISTS document_chunks (
    id              UUID PRIMARY KEY,
    attachment_id   BIGINT NOT NULL REFERENCES attachments(id) ON DELETE CASCADE,
    guild_id        BIGINT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
    channel_id      BIGINT NOT NULL,
    chunk_index     INTEGER NOT NULL,
    chunk_text      TEXT NOT NULL,
    parent_chunk_id UUID,
    token_count     INTEGER NOT NULL,
    vector_key      UUID,
    indexed_at      TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_chunks_attachment ON document_chunks (attachment_id);

CREATE TABLE IF NOT EXISTS jobs (
    id               UUID PRIMARY KEY,
    kind             TEXT NOT NULL,
    payload          JSONB NOT NULL,
    priority         SMALLINT NOT NULL DEFAULT 1,
    status           TEXT NOT NULL DEFAULT 'pending',
    dedup_key        TEXT,
    dedup_expires_at TIMESTAMPTZ,
    attempt_count    INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL DEFAULT 5,
    leased_by        TEXT,
    lease_expires_at TIMESTAMPTZ,
    next_run_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_error       TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_jobs_reserve ON jobs (status, priority, created_at)
    WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_jobs_dedup ON jobs (dedup_key) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs (lease_expires_at) WHERE status = 'leased';

CREATE TABLE IF NOT EXISTS dead_letter_jobs (
    id            UUID PRIMARY KEY,
    job_id        UUID NOT NULL,
    kind          TEXT NOT NULL,
    payload       JSONB NOT NULL,
    reason        TEXT NOT NULL,
    attempt_count INTEGER NOT NULL,
    failed_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_dead_letter_kind ON dead_letter_jobs (kind);
"#;

/// Create all relational tables and indexes if they do not exist.
pub async fn init_schema(conn: &DatabaseConnection) -> Result<()> {
    conn.execute_unprepared(SCHEMA_SQL).await?;
    info!("Relational schema ready");
    Ok(())
}
