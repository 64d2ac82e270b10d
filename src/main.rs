//! # Chat Archive CLI (`chatarc`)
//!
//! ## Usage
//!
//! ```bash
//! chatarc --config ./config/chatarc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatarc init` | Create the SQLite database and schema |
//! | `chatarc serve` | Start the HTTP server |
//! | `chatarc import <file>` | Ingest a JSON or JSON Lines message file |
//! | `chatarc list --platform P --group G` | Newest messages of a group |
//! | `chatarc search "<query>"` | Keyword or semantic search |
//! | `chatarc get <id>` | Print one message |
//! | `chatarc embed pending` | Embed messages that have no vector yet |
//! | `chatarc embed one <id>` | Embed one message |
//! | `chatarc stats` | Totals per platform and group |
//! | `chatarc completions <shell>` | Print shell completions |

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_archive::config::{self, Config, LogFormat};
use chat_archive::models::MessageFilter;
use chat_archive::{embed_cmd, get, ingest, migrate, search, server, stats};

/// Chat Archive CLI: store, embed, and search chat messages.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "chatarc",
    about = "Chat Archive: deduplicated message storage with keyword and semantic search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chatarc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it against an existing database is safe.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Import messages from a file.
    ///
    /// Accepts a JSON array, a `{"messages": [...]}` body, or JSON Lines.
    /// Messages already stored (same platform and messageId) are updated
    /// only if their content changed.
    Import {
        /// Path to the message file.
        file: PathBuf,
    },

    /// List the newest messages of a group.
    List {
        #[arg(long)]
        platform: String,

        /// Group (chat, channel, server) id. Telegram ids may be negative.
        #[arg(long, allow_hyphen_values = true)]
        group: String,

        /// Only show messages from this thread.
        #[arg(long)]
        thread: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search messages.
    Search {
        query: String,

        /// `keyword` (substring over recent messages) or `semantic` (vector).
        #[arg(long, default_value = "keyword")]
        mode: String,

        #[arg(long)]
        platform: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        group: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one message by storage id.
    Get { id: String },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show message counts per platform and group.
    Stats,

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed messages that have no embedding yet.
    Pending {
        /// Maximum number of messages to embed in this run.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Embed a single message by storage id.
    One { id: String },
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format {
        LogFormat::Json => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogFormat::Pretty => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "chatarc", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Import { file } => {
            ingest::run_import(&cfg, &file).await?;
        }
        Commands::List {
            platform,
            group,
            thread,
            limit,
        } => {
            search::run_list(&cfg, &platform, &group, thread.as_deref(), limit).await?;
        }
        Commands::Search {
            query,
            mode,
            platform,
            group,
            author,
            limit,
        } => {
            let filter = MessageFilter {
                platform,
                group_id: group,
                author_id: author,
            };
            search::run_search(&cfg, &query, &mode, filter, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit } => {
                embed_cmd::run_embed_pending(&cfg, limit).await?;
            }
            EmbedAction::One { id } => {
                embed_cmd::run_embed_one(&cfg, &id).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
