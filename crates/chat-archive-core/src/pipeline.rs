//! Embedding pipeline: lazily attach vectors to stored messages.
//!
//! Messages are embedded at most once. A record that already carries an
//! embedding is never sent to the oracle again, which makes re-running a
//! batch after a failure safe.
//!
//! # Batch Selection
//!
//! Stores have no index on "embedding is absent", so [`embed_batch`]
//! over-fetches `limit × 10` records in insertion order and keeps the first
//! `limit` without an embedding. Un-embedded records beyond that window are
//! picked up by later runs once earlier ones are done.

use anyhow::Result;
use tracing::{debug, warn};

use crate::embedding::{embed_text, truncate_chars, EmbeddingProvider};
use crate::store::MessageStore;

/// Characters of content sent to the oracle per message.
pub const DEFAULT_MAX_CHARS: usize = 8000;

/// Default number of messages embedded per batch run.
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Candidates scanned per requested embedding.
pub const SCAN_FACTOR: usize = 10;

/// Settings for the embedding pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineParams {
    /// Content is truncated to this many characters before embedding.
    pub max_chars: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

/// Embed a single stored message.
///
/// Returns `Ok(true)` if a vector was computed and stored, `Ok(false)` if
/// the message does not exist or was already embedded.
pub async fn embed_one<S, P>(
    store: &S,
    provider: &P,
    params: PipelineParams,
    id: &str,
) -> Result<bool>
where
    S: MessageStore + ?Sized,
    P: EmbeddingProvider + ?Sized,
{
    let msg = match store.get(id).await? {
        Some(m) => m,
        None => return Ok(false),
    };
    if msg.has_embedding() {
        return Ok(false);
    }

    let text = truncate_chars(&msg.content, params.max_chars);
    let vector = embed_text(provider, text).await?;
    store.patch_embedding(&msg.id, &vector).await?;
    debug!(id = %msg.id, dims = vector.len(), "message embedded");
    Ok(true)
}

/// Embed up to `limit` messages that have no embedding yet.
///
/// Messages are embedded one at a time. An oracle or store failure aborts
/// the run and propagates; messages embedded before the failure keep their
/// vectors.
///
/// Returns the number of messages embedded.
pub async fn embed_batch<S, P>(
    store: &S,
    provider: &P,
    params: PipelineParams,
    limit: usize,
) -> Result<usize>
where
    S: MessageStore + ?Sized,
    P: EmbeddingProvider + ?Sized,
{
    let pending: Vec<_> = store
        .scan(limit.saturating_mul(SCAN_FACTOR))
        .await?
        .into_iter()
        .filter(|m| !m.has_embedding())
        .take(limit)
        .collect();

    let mut embedded = 0usize;
    for msg in &pending {
        let text = truncate_chars(&msg.content, params.max_chars);
        let vector = match embed_text(provider, text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(id = %msg.id, embedded, error = %e, "embedding batch aborted");
                return Err(e);
            }
        };
        store.patch_embedding(&msg.id, &vector).await?;
        embedded += 1;
    }

    debug!(candidates = pending.len(), embedded, "embedding batch finished");
    Ok(embedded)
}
