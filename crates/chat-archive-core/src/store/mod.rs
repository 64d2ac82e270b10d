//! Storage abstraction for Chat Archive.
//!
//! The [`MessageStore`] trait defines every record operation needed by the
//! ingest service, the embedding pipeline, and the retrieval service. The
//! [`VectorIndex`] trait is the k-nearest-neighbour oracle used by semantic
//! search. Keeping them separate lets a deployment pair a document store with
//! an external vector index; both bundled backends (SQLite, in-memory)
//! implement both traits.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Message, NewMessage, Stats, SyncState};

/// The single equality pre-filter a [`VectorIndex`] can apply natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum ExactFilter {
    Platform(String),
    GroupId(String),
    AuthorId(String),
}

impl ExactFilter {
    /// Returns true if `msg` satisfies this filter.
    pub fn accepts(&self, msg: &Message) -> bool {
        match self {
            ExactFilter::Platform(p) => &msg.platform == p,
            ExactFilter::GroupId(g) => &msg.group_id == g,
            ExactFilter::AuthorId(a) => &msg.author_id == a,
        }
    }
}

/// A candidate returned from a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Storage id of the message.
    pub id: String,
    /// Cosine similarity to the query vector.
    pub score: f64,
}

/// Abstract message storage backend.
///
/// All operations are async (via `async-trait`). In-memory implementations
/// return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_external_id`](MessageStore::find_by_external_id) | Dedup lookup on `(platform, messageId)` |
/// | [`get`](MessageStore::get) | Point fetch by storage id |
/// | [`insert`](MessageStore::insert) | Insert a new record, returning its id |
/// | [`patch_content`](MessageStore::patch_content) | Replace `content` only |
/// | [`patch_embedding`](MessageStore::patch_embedding) | Set `embedding` only |
/// | [`list_by_group`](MessageStore::list_by_group) | Newest-first scan of a group |
/// | [`list_by_thread`](MessageStore::list_by_thread) | Newest-first scan of a thread |
/// | [`list_by_author`](MessageStore::list_by_author) | Newest-first scan of an author |
/// | [`recent`](MessageStore::recent) | Newest-first global scan |
/// | [`scan`](MessageStore::scan) | Insertion-order global scan |
/// | [`stats`](MessageStore::stats) | Aggregate counts |
/// | [`get_sync_state`](MessageStore::get_sync_state) / [`put_sync_state`](MessageStore::put_sync_state) | Sync checkpoints |
///
/// "Newest first" always means `timestamp` descending, with ties going to
/// the most recently inserted record.
///
/// The store does not enforce uniqueness of `(platform, messageId)`; the
/// ingest service checks before inserting. When duplicates exist,
/// `find_by_external_id` returns the earliest inserted record.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Look up a message by its platform identity.
    async fn find_by_external_id(&self, platform: &str, message_id: &str)
        -> Result<Option<Message>>;

    /// Fetch a message by storage id.
    async fn get(&self, id: &str) -> Result<Option<Message>>;

    /// Insert a new record and return the assigned storage id.
    async fn insert(&self, msg: &NewMessage) -> Result<String>;

    /// Replace the content of an existing record.
    async fn patch_content(&self, id: &str, content: &str) -> Result<()>;

    /// Store an embedding vector on an existing record.
    async fn patch_embedding(&self, id: &str, vector: &[f32]) -> Result<()>;

    /// Up to `limit` messages of `(platform, group_id)`, newest first.
    async fn list_by_group(
        &self,
        platform: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Up to `limit` messages of `(platform, group_id, thread_id)`, newest first.
    async fn list_by_thread(
        &self,
        platform: &str,
        group_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Up to `limit` messages written by `(platform, author_id)`, newest first.
    async fn list_by_author(
        &self,
        platform: &str,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Up to `limit` messages across the whole archive, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Message>>;

    /// Up to `limit` messages in insertion order, oldest first.
    async fn scan(&self, limit: usize) -> Result<Vec<Message>>;

    /// Totals per platform and group plus the timestamp range.
    async fn stats(&self) -> Result<Stats>;

    async fn get_sync_state(&self, platform: &str, group_id: &str) -> Result<Option<SyncState>>;

    /// Create or replace the sync state keyed by `(platform, group_id)`.
    async fn put_sync_state(&self, state: &SyncState) -> Result<()>;
}

/// Approximate nearest-neighbour oracle over stored embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` embedded messages ordered by descending similarity
    /// to `vector`, optionally restricted by a single equality filter.
    async fn search_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&ExactFilter>,
    ) -> Result<Vec<Neighbor>>;
}
