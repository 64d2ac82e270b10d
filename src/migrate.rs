//! Database schema creation.
//!
//! Every statement is `IF NOT EXISTS`, so running `chatarc init` (or
//! starting the server) against an existing database is a no-op.
//!
//! `seq` records insertion order and breaks timestamp ties in newest-first
//! listings. `(platform, message_id)` is indexed but not unique: the ingest
//! service checks for an existing record before inserting.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            creation_time INTEGER NOT NULL,
            platform TEXT NOT NULL,
            group_id TEXT NOT NULL,
            group_name TEXT,
            thread_id TEXT,
            message_id TEXT NOT NULL,
            content TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_name TEXT NOT NULL,
            author_role TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            reply_to_id TEXT,
            reply_to_text TEXT,
            metadata_json TEXT,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            platform TEXT NOT NULL,
            group_id TEXT NOT NULL,
            last_message_id TEXT,
            last_timestamp INTEGER NOT NULL,
            last_sync_at INTEGER NOT NULL,
            PRIMARY KEY (platform, group_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_messages_external ON messages(platform, message_id, seq)",
        "CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(platform, group_id, timestamp DESC, seq DESC)",
        "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(platform, group_id, thread_id, timestamp DESC, seq DESC)",
        "CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(platform, author_id, timestamp DESC, seq DESC)",
        "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp DESC, seq DESC)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
