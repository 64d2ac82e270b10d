//! Archive statistics (`chatarc stats`).
//!
//! Prints message totals, the per-platform and per-group breakdowns, and
//! the covered time range.

use anyhow::Result;

use chat_archive_core::store::MessageStore;

use crate::config::Config;
use crate::search::format_ts;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let stats = store.stats().await;
    store.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Chat Archive: Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Messages:    {}", stats.total);
    println!(
        "  Oldest:      {}",
        stats.oldest.map(format_ts).unwrap_or_else(|| "-".into())
    );
    println!(
        "  Newest:      {}",
        stats.newest.map(format_ts).unwrap_or_else(|| "-".into())
    );

    if !stats.by_platform.is_empty() {
        println!();
        println!("  {:<40} {:>8}", "PLATFORM", "MESSAGES");
        println!("  {}", "-".repeat(49));
        for (platform, count) in &stats.by_platform {
            println!("  {:<40} {:>8}", platform, count);
        }

        println!();
        println!("  {:<40} {:>8}", "GROUP", "MESSAGES");
        println!("  {}", "-".repeat(49));
        for (group, count) in &stats.by_group {
            println!("  {:<40} {:>8}", group, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
