//! SQLite-backed [`MessageStore`] and [`VectorIndex`] implementation.
//!
//! Maps each trait operation onto the `messages` and `sync_state` tables
//! created by [`crate::migrate`]. Embeddings are stored inline as
//! little-endian `f32` BLOBs; nearest-neighbour search is a brute-force
//! cosine scan over embedded rows, narrowed by the pre-filter in SQL.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use chat_archive_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use chat_archive_core::models::{Message, NewMessage, Stats, SyncState};
use chat_archive_core::store::{ExactFilter, MessageStore, Neighbor, VectorIndex};

use crate::config::Config;
use crate::{db, migrate};

const MESSAGE_COLUMNS: &str = "id, creation_time, platform, group_id, group_name, thread_id, \
     message_id, content, author_id, author_name, author_role, timestamp, \
     reply_to_id, reply_to_text, metadata_json, embedding";

/// SQLite implementation of the [`MessageStore`] and [`VectorIndex`] traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_newest(
        &self,
        where_clause: &str,
        keys: &[&str],
        limit: usize,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE {} ORDER BY timestamp DESC, seq DESC LIMIT ?",
            MESSAGE_COLUMNS, where_clause
        );
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(*key);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_message).collect()
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let metadata_json: Option<String> = row.get("metadata_json");
    let metadata: Option<serde_json::Value> = metadata_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let embedding: Option<Vec<u8>> = row.get("embedding");

    Ok(Message {
        id: row.get("id"),
        creation_time: row.get("creation_time"),
        platform: row.get("platform"),
        group_id: row.get("group_id"),
        group_name: row.get("group_name"),
        thread_id: row.get("thread_id"),
        message_id: row.get("message_id"),
        content: row.get("content"),
        author_id: row.get("author_id"),
        author_name: row.get("author_name"),
        author_role: row.get("author_role"),
        timestamp: row.get("timestamp"),
        reply_to_id: row.get("reply_to_id"),
        reply_to_text: row.get("reply_to_text"),
        metadata,
        embedding: embedding.map(|b| blob_to_vec(&b)),
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn find_by_external_id(
        &self,
        platform: &str,
        message_id: &str,
    ) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE platform = ? AND message_id = ? ORDER BY seq ASC LIMIT 1",
            MESSAGE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(platform)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn insert(&self, msg: &NewMessage) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let metadata_json = msg
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, creation_time, platform, group_id, group_name, thread_id,
                                  message_id, content, author_id, author_name, author_role,
                                  timestamp, reply_to_id, reply_to_text, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(now)
        .bind(&msg.platform)
        .bind(&msg.group_id)
        .bind(&msg.group_name)
        .bind(&msg.thread_id)
        .bind(&msg.message_id)
        .bind(&msg.content)
        .bind(&msg.author_id)
        .bind(&msg.author_name)
        .bind(&msg.author_role)
        .bind(msg.timestamp)
        .bind(&msg.reply_to_id)
        .bind(&msg.reply_to_text)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn patch_content(&self, id: &str, content: &str) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("message not found: {}", id);
        }
        Ok(())
    }

    async fn patch_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(vector))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("message not found: {}", id);
        }
        Ok(())
    }

    async fn list_by_group(
        &self,
        platform: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.fetch_newest("platform = ? AND group_id = ?", &[platform, group_id], limit)
            .await
    }

    async fn list_by_thread(
        &self,
        platform: &str,
        group_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.fetch_newest(
            "platform = ? AND group_id = ? AND thread_id = ?",
            &[platform, group_id, thread_id],
            limit,
        )
        .await
    }

    async fn list_by_author(
        &self,
        platform: &str,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.fetch_newest("platform = ? AND author_id = ?", &[platform, author_id], limit)
            .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Message>> {
        self.fetch_newest("1 = 1", &[], limit).await
    }

    async fn scan(&self, limit: usize) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages ORDER BY seq ASC LIMIT ?",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn stats(&self) -> Result<Stats> {
        let (total, oldest, newest): (i64, Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM messages")
                .fetch_one(&self.pool)
                .await?;

        let mut stats = Stats {
            total: total as u64,
            oldest,
            newest,
            ..Default::default()
        };

        let platforms: Vec<(String, i64)> =
            sqlx::query_as("SELECT platform, COUNT(*) FROM messages GROUP BY platform")
                .fetch_all(&self.pool)
                .await?;
        for (platform, count) in platforms {
            stats.by_platform.insert(platform, count as u64);
        }

        let groups: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT platform, group_id, COUNT(*) FROM messages GROUP BY platform, group_id",
        )
        .fetch_all(&self.pool)
        .await?;
        for (platform, group_id, count) in groups {
            stats
                .by_group
                .insert(Stats::group_key(&platform, &group_id), count as u64);
        }

        Ok(stats)
    }

    async fn get_sync_state(&self, platform: &str, group_id: &str) -> Result<Option<SyncState>> {
        let row = sqlx::query(
            "SELECT platform, group_id, last_message_id, last_timestamp, last_sync_at \
             FROM sync_state WHERE platform = ? AND group_id = ?",
        )
        .bind(platform)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SyncState {
            platform: r.get("platform"),
            group_id: r.get("group_id"),
            last_message_id: r.get("last_message_id"),
            last_timestamp: r.get("last_timestamp"),
            last_sync_at: r.get("last_sync_at"),
        }))
    }

    async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (platform, group_id, last_message_id, last_timestamp, last_sync_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(platform, group_id) DO UPDATE SET
                last_message_id = excluded.last_message_id,
                last_timestamp = excluded.last_timestamp,
                last_sync_at = excluded.last_sync_at
            "#,
        )
        .bind(&state.platform)
        .bind(&state.group_id)
        .bind(&state.last_message_id)
        .bind(state.last_timestamp)
        .bind(state.last_sync_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn search_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&ExactFilter>,
    ) -> Result<Vec<Neighbor>> {
        let (clause, key) = match filter {
            Some(ExactFilter::Platform(p)) => (" AND platform = ?", Some(p.as_str())),
            Some(ExactFilter::GroupId(g)) => (" AND group_id = ?", Some(g.as_str())),
            Some(ExactFilter::AuthorId(a)) => (" AND author_id = ?", Some(a.as_str())),
            None => ("", None),
        };
        let sql = format!(
            "SELECT id, embedding FROM messages WHERE embedding IS NOT NULL{}",
            clause
        );
        let mut query = sqlx::query(&sql);
        if let Some(key) = key {
            query = query.bind(key);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut neighbors: Vec<Neighbor> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Neighbor {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        neighbors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }
}
