//! In-memory [`MessageStore`] and [`VectorIndex`] implementation.
//!
//! Records live in an insertion-ordered `Vec` behind `std::sync::RwLock`.
//! Secondary indexes are `BTreeSet<(timestamp, position)>` per key, so a
//! newest-first listing is a reverse iteration over one set. Vector search is
//! brute-force cosine similarity over all embedded records.
//!
//! Used by tests and by embedders that don't need durability.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{Message, NewMessage, Stats, SyncState};

use super::{ExactFilter, MessageStore, Neighbor, VectorIndex};

type TimeIndex = BTreeSet<(i64, usize)>;

#[derive(Default)]
struct Inner {
    rows: Vec<Message>,
    by_id: HashMap<String, usize>,
    by_external: HashMap<(String, String), usize>,
    by_group: HashMap<(String, String), TimeIndex>,
    by_thread: HashMap<(String, String, String), TimeIndex>,
    by_author: HashMap<(String, String), TimeIndex>,
    by_timestamp: TimeIndex,
    sync: HashMap<(String, String), SyncState>,
}

impl Inner {
    fn newest(&self, index: Option<&TimeIndex>, limit: usize) -> Vec<Message> {
        index
            .map(|set| {
                set.iter()
                    .rev()
                    .take(limit)
                    .map(|(_, pos)| self.rows[*pos].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn row_mut(&mut self, id: &str) -> Result<&mut Message> {
        let pos = *self
            .by_id
            .get(id)
            .ok_or_else(|| anyhow!("message not found: {}", id))?;
        Ok(&mut self.rows[pos])
    }
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, duplicates included.
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn find_by_external_id(
        &self,
        platform: &str,
        message_id: &str,
    ) -> Result<Option<Message>> {
        let inner = self.read()?;
        let key = (platform.to_string(), message_id.to_string());
        Ok(inner.by_external.get(&key).map(|pos| inner.rows[*pos].clone()))
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let inner = self.read()?;
        Ok(inner.by_id.get(id).map(|pos| inner.rows[*pos].clone()))
    }

    async fn insert(&self, msg: &NewMessage) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let record = Message::from_new(id.clone(), now, msg.clone());

        let mut inner = self.write()?;
        let pos = inner.rows.len();
        let ts = record.timestamp;

        inner.by_id.insert(id.clone(), pos);
        inner
            .by_external
            .entry((record.platform.clone(), record.message_id.clone()))
            .or_insert(pos);
        inner
            .by_group
            .entry((record.platform.clone(), record.group_id.clone()))
            .or_default()
            .insert((ts, pos));
        if let Some(thread) = &record.thread_id {
            inner
                .by_thread
                .entry((
                    record.platform.clone(),
                    record.group_id.clone(),
                    thread.clone(),
                ))
                .or_default()
                .insert((ts, pos));
        }
        inner
            .by_author
            .entry((record.platform.clone(), record.author_id.clone()))
            .or_default()
            .insert((ts, pos));
        inner.by_timestamp.insert((ts, pos));
        inner.rows.push(record);

        Ok(id)
    }

    async fn patch_content(&self, id: &str, content: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.row_mut(id)?.content = content.to_string();
        Ok(())
    }

    async fn patch_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut inner = self.write()?;
        inner.row_mut(id)?.embedding = Some(vector.to_vec());
        Ok(())
    }

    async fn list_by_group(
        &self,
        platform: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let inner = self.read()?;
        let key = (platform.to_string(), group_id.to_string());
        Ok(inner.newest(inner.by_group.get(&key), limit))
    }

    async fn list_by_thread(
        &self,
        platform: &str,
        group_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let inner = self.read()?;
        let key = (
            platform.to_string(),
            group_id.to_string(),
            thread_id.to_string(),
        );
        Ok(inner.newest(inner.by_thread.get(&key), limit))
    }

    async fn list_by_author(
        &self,
        platform: &str,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let inner = self.read()?;
        let key = (platform.to_string(), author_id.to_string());
        Ok(inner.newest(inner.by_author.get(&key), limit))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Message>> {
        let inner = self.read()?;
        Ok(inner.newest(Some(&inner.by_timestamp), limit))
    }

    async fn scan(&self, limit: usize) -> Result<Vec<Message>> {
        let inner = self.read()?;
        Ok(inner.rows.iter().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<Stats> {
        let inner = self.read()?;
        let mut stats = Stats::default();
        for m in &inner.rows {
            stats.total += 1;
            *stats.by_platform.entry(m.platform.clone()).or_insert(0) += 1;
            *stats
                .by_group
                .entry(Stats::group_key(&m.platform, &m.group_id))
                .or_insert(0) += 1;
        }
        stats.oldest = inner.by_timestamp.first().map(|(ts, _)| *ts);
        stats.newest = inner.by_timestamp.last().map(|(ts, _)| *ts);
        Ok(stats)
    }

    async fn get_sync_state(&self, platform: &str, group_id: &str) -> Result<Option<SyncState>> {
        let inner = self.read()?;
        Ok(inner
            .sync
            .get(&(platform.to_string(), group_id.to_string()))
            .cloned())
    }

    async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        let mut inner = self.write()?;
        inner.sync.insert(
            (state.platform.clone(), state.group_id.clone()),
            state.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn search_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&ExactFilter>,
    ) -> Result<Vec<Neighbor>> {
        let inner = self.read()?;
        let mut neighbors: Vec<Neighbor> = inner
            .rows
            .iter()
            .filter(|m| filter.map_or(true, |f| f.accepts(m)))
            .filter_map(|m| {
                m.embedding.as_ref().map(|e| Neighbor {
                    id: m.id.clone(),
                    score: cosine_similarity(vector, e) as f64,
                })
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

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(group: &str, id: &str, ts: i64) -> NewMessage {
        NewMessage {
            platform: "telegram".into(),
            group_id: group.into(),
            group_name: None,
            thread_id: None,
            message_id: id.into(),
            content: format!("content {}", id),
            author_id: "u1".into(),
            author_name: "Bob".into(),
            author_role: "user".into(),
            timestamp: ts,
            reply_to_id: None,
            reply_to_text: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = InMemoryStore::new();
        let id = store.insert(&msg("g", "m1", 10)).await.unwrap();

        let by_ext = store.find_by_external_id("telegram", "m1").await.unwrap();
        assert_eq!(by_ext.unwrap().id, id);
        assert!(store
            .find_by_external_id("slack", "m1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get(&id).await.unwrap().unwrap().message_id, "m1");
    }

    #[tokio::test]
    async fn test_find_returns_first_of_duplicates() {
        let store = InMemoryStore::new();
        let first = store.insert(&msg("g", "m1", 10)).await.unwrap();
        store.insert(&msg("g", "m1", 10)).await.unwrap();

        assert_eq!(store.len(), 2);
        let found = store.find_by_external_id("telegram", "m1").await.unwrap();
        assert_eq!(found.unwrap().id, first);
    }

    #[tokio::test]
    async fn test_list_by_group_newest_first_with_insertion_tie_break() {
        let store = InMemoryStore::new();
        store.insert(&msg("g", "a", 100)).await.unwrap();
        store.insert(&msg("g", "b", 300)).await.unwrap();
        store.insert(&msg("g", "c", 200)).await.unwrap();
        store.insert(&msg("g", "d", 300)).await.unwrap();
        store.insert(&msg("other", "e", 999)).await.unwrap();

        let listed = store.list_by_group("telegram", "g", 10).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b", "c", "a"]);

        let capped = store.list_by_group("telegram", "g", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_patches_leave_other_fields() {
        let store = InMemoryStore::new();
        let id = store.insert(&msg("g", "m1", 10)).await.unwrap();

        store.patch_content(&id, "edited").await.unwrap();
        store.patch_embedding(&id, &[1.0, 0.0]).await.unwrap();

        let m = store.get(&id).await.unwrap().unwrap();
        assert_eq!(m.content, "edited");
        assert_eq!(m.embedding, Some(vec![1.0, 0.0]));
        assert_eq!(m.timestamp, 10);
        assert_eq!(m.author_name, "Bob");
    }

    #[tokio::test]
    async fn test_patch_unknown_id_fails() {
        let store = InMemoryStore::new();
        let err = store.patch_content("nope", "x").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_scan_is_insertion_order() {
        let store = InMemoryStore::new();
        store.insert(&msg("g", "late", 500)).await.unwrap();
        store.insert(&msg("g", "early", 1)).await.unwrap();

        let scanned = store.scan(10).await.unwrap();
        assert_eq!(scanned[0].message_id, "late");
        assert_eq!(scanned[1].message_id, "early");

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent[0].message_id, "late");
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryStore::new();
        assert_eq!(store.stats().await.unwrap(), Stats::default());

        store.insert(&msg("a", "1", 50)).await.unwrap();
        store.insert(&msg("a", "2", 10)).await.unwrap();
        store.insert(&msg("b", "3", 70)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_platform["telegram"], 3);
        assert_eq!(stats.by_group["telegram:a"], 2);
        assert_eq!(stats.by_group["telegram:b"], 1);
        assert_eq!(stats.oldest, Some(10));
        assert_eq!(stats.newest, Some(70));
    }

    #[tokio::test]
    async fn test_sync_state_upsert() {
        let store = InMemoryStore::new();
        let mut state = SyncState {
            platform: "slack".into(),
            group_id: "C1".into(),
            last_message_id: None,
            last_timestamp: 1,
            last_sync_at: 2,
        };
        store.put_sync_state(&state).await.unwrap();
        state.last_timestamp = 9;
        state.last_message_id = Some("m9".into());
        store.put_sync_state(&state).await.unwrap();

        let got = store.get_sync_state("slack", "C1").await.unwrap().unwrap();
        assert_eq!(got, state);
        assert!(store.get_sync_state("slack", "C2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_nearest_applies_single_filter() {
        let store = InMemoryStore::new();
        let a = store.insert(&msg("g1", "a", 1)).await.unwrap();
        let b = store.insert(&msg("g2", "b", 2)).await.unwrap();
        let c = store.insert(&msg("g1", "c", 3)).await.unwrap();
        store.patch_embedding(&a, &[1.0, 0.0]).await.unwrap();
        store.patch_embedding(&b, &[1.0, 0.1]).await.unwrap();
        store.patch_embedding(&c, &[0.0, 1.0]).await.unwrap();

        let all = store.search_nearest(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str(), c.as_str()]);

        let filter = ExactFilter::GroupId("g1".into());
        let g1 = store
            .search_nearest(&[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(g1.len(), 2);
        assert!(g1.iter().all(|n| n.id != b));

        let top1 = store.search_nearest(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(top1.len(), 1);
        assert!((top1[0].score - 1.0).abs() < 1e-6);
    }
}
