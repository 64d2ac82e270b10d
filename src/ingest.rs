//! Bulk import of message files (`chatarc import`).
//!
//! Accepts three layouts, detected from the first non-whitespace byte:
//!
//! - a JSON array of messages: `[{...}, {...}]`
//! - a batch body: `{"messages": [{...}, {...}]}`
//! - JSON Lines: one message object per line, blank lines ignored
//!
//! Every message is validated before anything is written, then the whole
//! file goes through [`save_batch`], so re-importing a file is idempotent.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use chat_archive_core::ingest::{parse_batch, parse_batch_body, save_batch, BatchReport};
use chat_archive_core::models::NewMessage;
use chat_archive_core::store::MessageStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Parse an import file's contents into validated messages.
pub fn parse_import(content: &str) -> Result<Vec<NewMessage>> {
    let trimmed = content.trim_start();

    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).context("Failed to parse JSON array")?;
        return Ok(parse_batch(&values)?);
    }

    if trimmed.starts_with('{') {
        // A whole-document object is either a batch body or a single message;
        // several objects fail here and fall through to JSON Lines.
        if let Ok(body) = serde_json::from_str::<Value>(trimmed) {
            if body.get("messages").is_some() {
                return Ok(parse_batch_body(&body)?);
            }
            return Ok(parse_batch(&[body])?);
        }
    }

    let values = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| {
            serde_json::from_str::<Value>(l).with_context(|| format!("line {}: invalid JSON", n + 1))
        })
        .collect::<Result<Vec<Value>>>()?;
    Ok(parse_batch(&values)?)
}

/// Import messages from `path` into any store.
pub async fn import_file<S: MessageStore + ?Sized>(store: &S, path: &Path) -> Result<BatchReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let messages = parse_import(&content)?;
    let report = save_batch(store, &messages).await?;
    info!(
        file = %path.display(),
        inserted = report.inserted(),
        updated = report.updated(),
        unchanged = report.unchanged(),
        "import finished"
    );
    Ok(report)
}

/// CLI entry point: import into the configured database and print counts.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let report = import_file(&store, path).await?;

    println!("import {}", path.display());
    println!("  messages:  {}", report.outcomes.len());
    println!("  inserted:  {}", report.inserted());
    println!("  updated:   {}", report.updated());
    println!("  unchanged: {}", report.unchanged());

    store.close().await;
    Ok(())
}
