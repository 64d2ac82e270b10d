//! # Chat Archive
//!
//! **A message archive for chat bots: deduplicated ingest, lazy embeddings,
//! and exact, keyword, and semantic retrieval.**
//!
//! Bots and sync jobs push messages from any platform (Telegram, Discord,
//! Slack, ...) over HTTP or from files. Each message is keyed by
//! `(platform, messageId)`, so replays are idempotent and edits update the
//! stored content in place. Embeddings are computed later, on demand or in
//! batches, and power nearest-neighbour search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ HTTP / CLI   │──▶│   Ingest    │──▶│   SQLite     │
//! │ POST/import  │   │ dedup+patch │   │ messages+vec │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!                    ┌──────────────┬─────────┤
//!                    ▼              ▼         ▼
//!              ┌──────────┐  ┌──────────┐ ┌──────────┐
//!              │ Listing  │  │ Keyword  │ │ Semantic │◀── embedding pipeline
//!              └──────────┘  └──────────┘ └──────────┘
//! ```
//!
//! The storage-agnostic logic (models, store traits, ingest, pipeline,
//! retrieval) lives in `chat-archive-core`. This crate adds the SQLite
//! backend, the OpenAI embedding provider, the HTTP server, and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! chatarc init                          # create database
//! chatarc import ./export.jsonl         # ingest a message dump
//! chatarc embed pending                 # generate embeddings
//! chatarc search "deploy" --mode semantic
//! chatarc serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema creation (idempotent) |
//! | [`sqlite_store`] | SQLite `MessageStore` and `VectorIndex` |
//! | [`embedding`] | Disabled and OpenAI embedding providers |
//! | [`server`] | JSON HTTP server (Axum) with CORS |
//! | [`ingest`] | File import: JSON array, batch body, or JSON Lines |
//! | [`search`] | `list` and `search` commands |
//! | [`get`] | Message retrieval by id |
//! | [`embed_cmd`] | `embed pending` and `embed one` commands |
//! | [`stats`] | Archive statistics |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;

pub use chat_archive_core::{models, pipeline, store};
