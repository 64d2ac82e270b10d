//! Retrieval over the archive: exact listing, keyword search, and semantic
//! search.
//!
//! Every function here operates through the [`MessageStore`] and
//! [`VectorIndex`] traits and takes its tuning from [`RetrievalParams`], so
//! the same code serves the HTTP server, the CLI, and tests.
//!
//! # Semantic Search Algorithm
//!
//! 1. Embed the query through the [`EmbeddingProvider`].
//! 2. Ask the vector index for `limit × overfetch` neighbours, pre-filtered
//!    on the single most selective filter supplied (see [`choose_prefilter`]).
//! 3. Fetch each candidate's full record, skipping ids that no longer resolve.
//! 4. Re-apply every supplied filter exactly.
//! 5. Truncate to `limit`, keeping the index's similarity order.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::{embed_text, EmbeddingProvider};
use crate::models::{Message, MessageFilter};
use crate::store::{ExactFilter, MessageStore, VectorIndex};

/// How a `threadId` restriction is applied to a group listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadFilter {
    /// Take the newest `limit` messages of the group, then keep those in the
    /// thread. May return fewer than `limit` even when older thread
    /// messages exist.
    #[default]
    AfterTake,
    /// Scan the thread directly, so up to `limit` thread messages come back.
    Indexed,
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub list_limit: usize,
    pub keyword_limit: usize,
    /// Number of most recent messages examined by keyword search.
    pub keyword_scan_window: usize,
    pub semantic_limit: usize,
    /// Neighbours requested from the index per wanted result.
    pub semantic_overfetch: usize,
    pub thread_filter: ThreadFilter,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            list_limit: 50,
            keyword_limit: 20,
            keyword_scan_window: 1000,
            semantic_limit: 10,
            semantic_overfetch: 3,
            thread_filter: ThreadFilter::AfterTake,
        }
    }
}

/// A semantic search hit: the full record plus its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(rename = "_score")]
    pub score: f64,
}

/// List the newest messages of a group, optionally restricted to a thread.
pub async fn get_by_group<S: MessageStore + ?Sized>(
    store: &S,
    params: &RetrievalParams,
    platform: &str,
    group_id: &str,
    thread_id: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Message>> {
    let limit = limit.unwrap_or(params.list_limit);

    match (thread_id, params.thread_filter) {
        (None, _) => store.list_by_group(platform, group_id, limit).await,
        (Some(thread), ThreadFilter::Indexed) => {
            store.list_by_thread(platform, group_id, thread, limit).await
        }
        (Some(thread), ThreadFilter::AfterTake) => {
            let window = store.list_by_group(platform, group_id, limit).await?;
            Ok(window
                .into_iter()
                .filter(|m| m.thread_id.as_deref() == Some(thread))
                .collect())
        }
    }
}

/// List the newest messages written by an author.
pub async fn get_by_author<S: MessageStore + ?Sized>(
    store: &S,
    params: &RetrievalParams,
    platform: &str,
    author_id: &str,
    limit: Option<usize>,
) -> Result<Vec<Message>> {
    store
        .list_by_author(platform, author_id, limit.unwrap_or(params.list_limit))
        .await
}

/// Case-insensitive substring search over the most recent messages.
///
/// Only the newest `keyword_scan_window` messages are examined, so older
/// matches are never returned. An empty query matches every message in the
/// window.
pub async fn keyword_search<S: MessageStore + ?Sized>(
    store: &S,
    params: &RetrievalParams,
    query: &str,
    filter: &MessageFilter,
    limit: Option<usize>,
) -> Result<Vec<Message>> {
    let limit = limit.unwrap_or(params.keyword_limit);
    let needle = query.to_lowercase();

    let results: Vec<Message> = store
        .recent(params.keyword_scan_window)
        .await?
        .into_iter()
        .filter(|m| m.matches(filter))
        .filter(|m| needle.is_empty() || m.content.to_lowercase().contains(&needle))
        .take(limit)
        .collect();

    debug!(query, hits = results.len(), "keyword search");
    Ok(results)
}

/// Pick the one filter the vector index applies natively.
///
/// Preference is `authorId`, then `groupId`, then `platform`: an author
/// usually has fewer messages than a group, and a group fewer than a
/// platform.
pub fn choose_prefilter(filter: &MessageFilter) -> Option<ExactFilter> {
    if let Some(a) = &filter.author_id {
        return Some(ExactFilter::AuthorId(a.clone()));
    }
    if let Some(g) = &filter.group_id {
        return Some(ExactFilter::GroupId(g.clone()));
    }
    filter.platform.clone().map(ExactFilter::Platform)
}

/// Nearest-neighbour search by meaning.
///
/// A blank query returns no results without calling the provider.
pub async fn semantic_search<S, I, P>(
    store: &S,
    index: &I,
    provider: &P,
    params: &RetrievalParams,
    query: &str,
    filter: &MessageFilter,
    limit: Option<usize>,
) -> Result<Vec<ScoredMessage>>
where
    S: MessageStore + ?Sized,
    I: VectorIndex + ?Sized,
    P: EmbeddingProvider + ?Sized,
{
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let limit = limit.unwrap_or(params.semantic_limit);
    if limit == 0 {
        return Ok(Vec::new());
    }

    let query_vec = embed_text(provider, query).await?;
    let k = limit.saturating_mul(params.semantic_overfetch);
    let prefilter = choose_prefilter(filter);
    let neighbors = index
        .search_nearest(&query_vec, k, prefilter.as_ref())
        .await?;

    let candidates = neighbors.len();
    let mut results = Vec::with_capacity(limit.min(candidates));
    for n in neighbors {
        let Some(message) = store.get(&n.id).await? else {
            continue;
        };
        if !message.matches(filter) {
            continue;
        }
        results.push(ScoredMessage {
            message,
            score: n.score,
        });
        if results.len() == limit {
            break;
        }
    }

    debug!(k, candidates, hits = results.len(), "semantic search");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use crate::store::memory::InMemoryStore;
    use crate::store::Neighbor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn msg(
        platform: &str,
        group: &str,
        author: &str,
        id: &str,
        ts: i64,
        content: &str,
    ) -> NewMessage {
        NewMessage {
            platform: platform.into(),
            group_id: group.into(),
            group_name: None,
            thread_id: None,
            message_id: id.into(),
            content: content.into(),
            author_id: author.into(),
            author_name: author.to_uppercase(),
            author_role: "user".into(),
            timestamp: ts,
            reply_to_id: None,
            reply_to_text: None,
            metadata: None,
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Returns a fixed neighbour list regardless of the filter, and records
    /// what it was asked for.
    struct ScriptedIndex {
        neighbors: Vec<Neighbor>,
        asked: Mutex<Vec<(usize, Option<ExactFilter>)>>,
    }

    #[async_trait]
    impl VectorIndex for ScriptedIndex {
        async fn search_nearest(
            &self,
            _vector: &[f32],
            k: usize,
            filter: Option<&ExactFilter>,
        ) -> Result<Vec<Neighbor>> {
            self.asked.lock().unwrap().push((k, filter.cloned()));
            Ok(self.neighbors.iter().take(k).cloned().collect())
        }
    }

    fn provider() -> CountingProvider {
        CountingProvider {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_thread_filter_after_take_misses_older_matches() {
        let store = InMemoryStore::new();
        for i in 0..60 {
            let mut m = msg("discord", "g", "a", &format!("m{}", i), i as i64, "x");
            if (4..14).contains(&i) {
                m.thread_id = Some("T".into());
            }
            store.insert(&m).await.unwrap();
        }
        let params = RetrievalParams::default();

        let got = get_by_group(&store, &params, "discord", "g", Some("T"), None)
            .await
            .unwrap();
        // The newest 50 cover timestamps 10..=59, so only 10..=13 survive.
        let ts: Vec<i64> = got.iter().map(|m| m.timestamp).collect();
        assert_eq!(ts, vec![13, 12, 11, 10]);

        let indexed = RetrievalParams {
            thread_filter: ThreadFilter::Indexed,
            ..Default::default()
        };
        let got = get_by_group(&store, &indexed, "discord", "g", Some("T"), None)
            .await
            .unwrap();
        assert_eq!(got.len(), 10);
        assert_eq!(got[0].timestamp, 13);
        assert_eq!(got[9].timestamp, 4);
    }

    #[tokio::test]
    async fn test_get_by_group_bounded_and_sorted() {
        let store = InMemoryStore::new();
        for (i, ts) in [5, 9, 1, 9, 7, 3].iter().enumerate() {
            store
                .insert(&msg("slack", "c", "a", &format!("m{}", i), *ts, "x"))
                .await
                .unwrap();
        }
        store
            .insert(&msg("slack", "other", "a", "z", 100, "x"))
            .await
            .unwrap();

        let got = get_by_group(
            &store,
            &RetrievalParams::default(),
            "slack",
            "c",
            None,
            Some(4),
        )
        .await
        .unwrap();
        assert_eq!(got.len(), 4);
        assert!(got.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        // Tie on 9 goes to the later insert.
        assert_eq!(got[0].message_id, "m3");
        assert_eq!(got[1].message_id, "m1");
    }

    #[tokio::test]
    async fn test_get_by_author() {
        let store = InMemoryStore::new();
        store.insert(&msg("slack", "c", "u1", "a", 1, "x")).await.unwrap();
        store.insert(&msg("slack", "d", "u1", "b", 2, "x")).await.unwrap();
        store.insert(&msg("slack", "c", "u2", "c", 3, "x")).await.unwrap();

        let got = get_by_author(&store, &RetrievalParams::default(), "slack", "u1", None)
            .await
            .unwrap();
        let ids: Vec<&str> = got.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_keyword_search_case_insensitive_with_filters() {
        let store = InMemoryStore::new();
        store
            .insert(&msg("slack", "c", "u1", "1", 1, "Deploy finished"))
            .await
            .unwrap();
        store
            .insert(&msg("discord", "c", "u1", "2", 2, "deploy failed"))
            .await
            .unwrap();
        store
            .insert(&msg("slack", "c", "u2", "3", 3, "lunch?"))
            .await
            .unwrap();
        let params = RetrievalParams::default();

        let all = keyword_search(&store, &params, "DEPLOY", &MessageFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message_id, "2");

        let filter = MessageFilter {
            platform: Some("slack".into()),
            ..Default::default()
        };
        let slack = keyword_search(&store, &params, "deploy", &filter, None)
            .await
            .unwrap();
        assert_eq!(slack.len(), 1);
        assert_eq!(slack[0].message_id, "1");

        let everything = keyword_search(&store, &params, "", &MessageFilter::default(), Some(2))
            .await
            .unwrap();
        assert_eq!(everything.len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_search_window_is_bounded() {
        let store = InMemoryStore::new();
        store
            .insert(&msg("slack", "c", "u", "old", 0, "needle"))
            .await
            .unwrap();
        for i in 1..=5 {
            store
                .insert(&msg("slack", "c", "u", &format!("n{}", i), i, "hay"))
                .await
                .unwrap();
        }
        let params = RetrievalParams {
            keyword_scan_window: 5,
            ..Default::default()
        };
        let got = keyword_search(&store, &params, "needle", &MessageFilter::default(), None)
            .await
            .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_choose_prefilter_preference() {
        let all = MessageFilter {
            platform: Some("p".into()),
            group_id: Some("g".into()),
            author_id: Some("a".into()),
        };
        assert_eq!(choose_prefilter(&all), Some(ExactFilter::AuthorId("a".into())));

        let no_author = MessageFilter {
            author_id: None,
            ..all.clone()
        };
        assert_eq!(
            choose_prefilter(&no_author),
            Some(ExactFilter::GroupId("g".into()))
        );

        let platform_only = MessageFilter {
            platform: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(
            choose_prefilter(&platform_only),
            Some(ExactFilter::Platform("p".into()))
        );
        assert_eq!(choose_prefilter(&MessageFilter::default()), None);
    }

    #[tokio::test]
    async fn test_semantic_search_post_filters_every_dimension() {
        let store = InMemoryStore::new();
        let keep = store
            .insert(&msg("slack", "g1", "u1", "keep", 1, "a"))
            .await
            .unwrap();
        let wrong_group = store
            .insert(&msg("slack", "g2", "u1", "wg", 2, "b"))
            .await
            .unwrap();
        let wrong_platform = store
            .insert(&msg("discord", "g1", "u1", "wp", 3, "c"))
            .await
            .unwrap();

        // The index only honours the author filter, so it hands back all three.
        let index = ScriptedIndex {
            neighbors: vec![
                Neighbor { id: wrong_group, score: 0.99 },
                Neighbor { id: "vanished".into(), score: 0.95 },
                Neighbor { id: wrong_platform, score: 0.9 },
                Neighbor { id: keep.clone(), score: 0.5 },
            ],
            asked: Mutex::new(Vec::new()),
        };
        let filter = MessageFilter {
            platform: Some("slack".into()),
            group_id: Some("g1".into()),
            author_id: Some("u1".into()),
        };
        let provider = provider();

        let hits = semantic_search(
            &store,
            &index,
            &provider,
            &RetrievalParams::default(),
            "anything",
            &filter,
            Some(2),
        )
        .await
        .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message.id, keep);
        assert!((hits[0].score - 0.5).abs() < 1e-9);
        assert!(hits.iter().all(|h| h.message.matches(&filter)));

        let asked = index.asked.lock().unwrap();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].0, 6);
        assert_eq!(asked[0].1, Some(ExactFilter::AuthorId("u1".into())));
    }

    #[tokio::test]
    async fn test_semantic_search_keeps_index_order_and_truncates() {
        let store = InMemoryStore::new();
        let mut neighbors = Vec::new();
        for (i, score) in [0.9, 0.8, 0.7, 0.6].iter().enumerate() {
            let id = store
                .insert(&msg("slack", "g", "u", &format!("m{}", i), i as i64, "x"))
                .await
                .unwrap();
            neighbors.push(Neighbor { id, score: *score });
        }
        let index = ScriptedIndex {
            neighbors,
            asked: Mutex::new(Vec::new()),
        };
        let provider = provider();

        let hits = semantic_search(
            &store,
            &index,
            &provider,
            &RetrievalParams::default(),
            "q",
            &MessageFilter::default(),
            Some(3),
        )
        .await
        .unwrap();
        let scores: Vec<f64> = hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7]);
        assert_eq!(index.asked.lock().unwrap()[0], (9, None));
    }

    #[tokio::test]
    async fn test_semantic_search_huge_limit_returns_all_candidates() {
        let store = InMemoryStore::new();
        let mut neighbors = Vec::new();
        for i in 0..2 {
            let id = store
                .insert(&msg("slack", "g", "u", &format!("m{}", i), i, "x"))
                .await
                .unwrap();
            neighbors.push(Neighbor { id, score: 0.5 });
        }
        let index = ScriptedIndex {
            neighbors,
            asked: Mutex::new(Vec::new()),
        };

        let hits = semantic_search(
            &store,
            &index,
            &provider(),
            &RetrievalParams::default(),
            "q",
            &MessageFilter::default(),
            Some(usize::MAX),
        )
        .await
        .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(index.asked.lock().unwrap()[0].0, usize::MAX);
    }

    #[tokio::test]
    async fn test_semantic_search_blank_query_skips_provider() {
        let store = InMemoryStore::new();
        let index = ScriptedIndex {
            neighbors: vec![],
            asked: Mutex::new(Vec::new()),
        };
        let provider = provider();
        let hits = semantic_search(
            &store,
            &index,
            &provider,
            &RetrievalParams::default(),
            "   ",
            &MessageFilter::default(),
            None,
        )
        .await
        .unwrap();
        assert!(hits.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(index.asked.lock().unwrap().is_empty());
    }

    #[test]
    fn test_scored_message_serializes_flat() {
        let m = Message::from_new("id1".into(), 7, msg("slack", "g", "u", "m", 1, "hi"));
        let v = serde_json::to_value(ScoredMessage {
            message: m,
            score: 0.25,
        })
        .unwrap();
        assert_eq!(v["_id"], "id1");
        assert_eq!(v["content"], "hi");
        assert_eq!(v["_score"], 0.25);
    }
}
