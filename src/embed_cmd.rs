//! Embedding CLI commands: `pending` and `one`.

use anyhow::{bail, Result};

use chat_archive_core::pipeline;

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Embed up to `limit` messages that have no embedding yet.
pub async fn run_embed_pending(config: &Config, limit: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::open(config).await?;
    let limit = limit.unwrap_or(config.retrieval.embed_batch_limit);

    let result = pipeline::embed_batch(
        &store,
        provider.as_ref(),
        config.embedding.pipeline_params(),
        limit,
    )
    .await;
    store.close().await;
    let embedded = result?;

    println!("embed pending");
    println!("  model: {}", provider.model_name());
    println!("  embedded: {}", embedded);
    Ok(())
}

/// Embed a single message by storage id.
pub async fn run_embed_one(config: &Config, id: &str) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::open(config).await?;

    let result = pipeline::embed_one(
        &store,
        provider.as_ref(),
        config.embedding.pipeline_params(),
        id,
    )
    .await;
    store.close().await;

    if result? {
        println!("embedded {}", id);
    } else {
        println!("{}: not found or already embedded", id);
    }
    Ok(())
}
