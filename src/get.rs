//! Message retrieval by storage id (`chatarc get`).

use anyhow::{anyhow, Result};

use chat_archive_core::models::Message;
use chat_archive_core::store::MessageStore;

use crate::config::Config;
use crate::search::format_ts;
use crate::sqlite_store::SqliteStore;

/// Fetch a message, failing if the id is unknown.
pub async fn get_message<S: MessageStore + ?Sized>(store: &S, id: &str) -> Result<Message> {
    store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("message not found: {}", id))
}

/// CLI entry point: print every field of one message.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let result = get_message(&store, id).await;
    store.close().await;
    let msg = result?;

    println!("--- Message ---");
    println!("id:           {}", msg.id);
    println!("platform:     {}", msg.platform);
    println!(
        "group:        {}{}",
        msg.group_id,
        msg.group_name
            .as_deref()
            .map(|n| format!(" ({})", n))
            .unwrap_or_default()
    );
    if let Some(ref thread) = msg.thread_id {
        println!("thread:       {}", thread);
    }
    println!("message_id:   {}", msg.message_id);
    println!(
        "author:       {} [{}] ({})",
        msg.author_name, msg.author_id, msg.author_role
    );
    println!("timestamp:    {}", format_ts(msg.timestamp));
    if let Some(ref reply) = msg.reply_to_id {
        println!("reply_to:     {}", reply);
    }
    if let Some(ref text) = msg.reply_to_text {
        println!("reply_text:   {}", text);
    }
    if let Some(ref meta) = msg.metadata {
        println!("metadata:     {}", meta);
    }
    println!(
        "embedding:    {}",
        msg.embedding
            .as_ref()
            .map(|e| format!("{} dims", e.len()))
            .unwrap_or_else(|| "none".to_string())
    );
    println!();

    println!("--- Content ---");
    println!("{}", msg.content);

    Ok(())
}
