//! CLI retrieval commands: `chatarc list` and `chatarc search`.
//!
//! Thin wrappers over `chat_archive_core::search` that open the SQLite
//! store and print results to stdout.

use anyhow::{bail, Result};

use chat_archive_core::models::{Message, MessageFilter};
use chat_archive_core::search;

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// `chatarc list`: newest messages of a group, optionally one thread.
pub async fn run_list(
    config: &Config,
    platform: &str,
    group_id: &str,
    thread_id: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let params = config.retrieval.params();

    let messages =
        search::get_by_group(&store, &params, platform, group_id, thread_id, limit).await?;

    if messages.is_empty() {
        println!("No messages.");
    }
    for msg in &messages {
        print_message(msg, None);
    }

    store.close().await;
    Ok(())
}

/// `chatarc search`: keyword or semantic search.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    filter: MessageFilter,
    limit: Option<usize>,
) -> Result<()> {
    match mode {
        "keyword" | "semantic" => {}
        _ => bail!("Unknown search mode: {}. Use keyword or semantic.", mode),
    }

    if mode == "semantic" && !config.embedding.is_enabled() {
        bail!("Mode 'semantic' requires embeddings. Set [embedding] provider in config.");
    }

    let store = SqliteStore::open(config).await?;
    let params = config.retrieval.params();

    let results: Vec<(Message, Option<f64>)> = if mode == "semantic" {
        let provider = embedding::create_provider(&config.embedding)?;
        search::semantic_search(
            &store,
            &store,
            provider.as_ref(),
            &params,
            query,
            &filter,
            limit,
        )
        .await?
        .into_iter()
        .map(|hit| (hit.message, Some(hit.score)))
        .collect()
    } else {
        search::keyword_search(&store, &params, query, &filter, limit)
            .await?
            .into_iter()
            .map(|m| (m, None))
            .collect()
    };

    if results.is_empty() {
        println!("No results.");
    }
    for (i, (msg, score)) in results.iter().enumerate() {
        print!("{}. ", i + 1);
        print_message(msg, *score);
    }

    store.close().await;
    Ok(())
}

/// Print one message as a short block.
pub(crate) fn print_message(msg: &Message, score: Option<f64>) {
    let when = format_ts(msg.timestamp);
    match score {
        Some(s) => println!(
            "[{:.2}] {} {} ({}/{})",
            s, when, msg.author_name, msg.platform, msg.group_id
        ),
        None => println!(
            "{} {} ({}/{})",
            when, msg.author_name, msg.platform, msg.group_id
        ),
    }
    if let Some(thread) = &msg.thread_id {
        println!("    thread: {}", thread);
    }
    println!("    {}", msg.content.replace('\n', " ").trim());
    println!("    id: {}", msg.id);
    println!();
}

/// Format a millisecond timestamp as `YYYY-MM-DD HH:MM`.
pub(crate) fn format_ts(ts_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_millis.to_string())
}
