//! # Chat Archive Core
//!
//! Storage-agnostic logic for Chat Archive: message models, the store and
//! vector-index traits, ingest validation and deduplication, the embedding
//! pipeline, and retrieval.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The `chat-archive` application crate supplies the SQLite store, the
//! OpenAI embedding provider, the HTTP server, and the CLI.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `NewMessage`, `Message`, `SyncState`, `Stats` |
//! | [`store`] | `MessageStore` / `VectorIndex` traits and the in-memory backend |
//! | [`ingest`] | Payload validation, `save_one`, `save_batch` |
//! | [`embedding`] | `EmbeddingProvider` trait and vector helpers |
//! | [`pipeline`] | `embed_one`, `embed_batch` |
//! | [`search`] | Group/author listing, keyword and semantic search |

pub mod embedding;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
