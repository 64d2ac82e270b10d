//! JSON HTTP server.
//!
//! Exposes ingest, retrieval, and the embedding pipeline over HTTP so chat
//! bots and sync jobs can write to and query the archive.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/messages` | Save one message (dedup by platform + messageId) |
//! | `POST` | `/messages/batch` | Save `{messages: [...]}`; returns new-record count |
//! | `GET`  | `/messages` | Newest messages of a group (`platform`, `groupId`, `threadId?`, `limit?`) |
//! | `GET`  | `/messages/by-author` | Newest messages of an author |
//! | `GET`  | `/messages/{id}` | Fetch one message by storage id |
//! | `POST` | `/messages/{id}/embed` | Embed one message |
//! | `POST` | `/embed` | Embed up to `limit` pending messages |
//! | `GET`  | `/search` | Keyword search over recent messages |
//! | `POST` | `/search/semantic` | Nearest-neighbour search by meaning; a blank query returns `[]` |
//! | `GET`  | `/stats` | Totals per platform and group |
//! | `GET`/`POST` | `/sync-state` | Read or upsert a sync checkpoint |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response is `{"error": "<message>"}`. Validation failures and
//! malformed requests are 400, unknown ids are 404, everything else is 500.
//!
//! Request bodies are decoded as JSON whatever their `Content-Type`. Empty
//! query parameters (`?threadId=`) count as absent.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{
        rejection::QueryRejection,
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use chat_archive_core::embedding::EmbeddingProvider;
use chat_archive_core::ingest::{self, IngestError};
use chat_archive_core::models::{Message, MessageFilter, Stats, SyncState};
use chat_archive_core::pipeline::{self, PipelineParams, DEFAULT_BATCH_LIMIT};
use chat_archive_core::search::{self, RetrievalParams, ScoredMessage};
use chat_archive_core::store::{MessageStore, VectorIndex};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub index: Arc<dyn VectorIndex>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub retrieval: Arc<RetrievalParams>,
    pub pipeline: PipelineParams,
    pub embed_batch_limit: usize,
}

impl AppState {
    /// State with default retrieval and pipeline settings.
    pub fn new(
        store: Arc<dyn MessageStore>,
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            retrieval: Arc::new(RetrievalParams::default()),
            pipeline: PipelineParams::default(),
            embed_batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Apply the `[retrieval]` and `[embedding]` settings from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.retrieval = Arc::new(config.retrieval.params());
        self.pipeline = config.embedding.pipeline_params();
        self.embed_batch_limit = config.retrieval.embed_batch_limit;
        self
    }
}

/// Build the router with every route and the CORS and trace layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/messages", post(handle_save).get(handle_list))
        .route("/messages/batch", post(handle_save_batch))
        .route("/messages/by-author", get(handle_list_by_author))
        .route("/messages/{id}", get(handle_get))
        .route("/messages/{id}/embed", post(handle_embed_one))
        .route("/embed", post(handle_embed_batch))
        .route("/search", get(handle_keyword_search))
        .route("/search/semantic", post(handle_semantic_search))
        .route("/stats", get(handle_stats))
        .route(
            "/sync-state",
            get(handle_get_sync_state).post(handle_put_sync_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`, backed by the SQLite store.
///
/// Creates the schema if needed and resolves the embedding provider before
/// binding, so a missing API key fails startup rather than the first
/// request. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = create_provider(&config.embedding)?;

    let store = Arc::new(SqliteStore::open(config).await?);

    let state = AppState::new(store.clone(), store, provider).with_config(config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "chat archive listening");
    println!("Chat archive listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

/// Validation errors surface as 400; anything else is logged and becomes 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(ingest_err) = err.downcast_ref::<IngestError>() {
            return AppError::bad_request(ingest_err.to_string());
        }
        error!(error = %err, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("Invalid JSON body: {}", e)))
}

/// Empty query parameters are treated as missing.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn filter_from(
    platform: Option<String>,
    group_id: Option<String>,
    author_id: Option<String>,
) -> MessageFilter {
    MessageFilter {
        platform: non_empty(platform),
        group_id: non_empty(group_id),
        author_id: non_empty(author_id),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Ingest ============

async fn handle_save(State(state): State<AppState>, body: Bytes) -> ApiResult<Value> {
    let body: Value = parse_body(&body)?;
    let msg = ingest::parse_message(&body)?;
    ingest::save_one(state.store.as_ref(), &msg).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn handle_save_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<Value> {
    let body: Value = parse_body(&body)?;
    let messages = ingest::parse_batch_body(&body)?;
    let report = ingest::save_batch(state.store.as_ref(), &messages).await?;
    Ok(Json(json!({ "ok": true, "saved": report.inserted() })))
}

// ============ Listing ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    platform: Option<String>,
    group_id: Option<String>,
    thread_id: Option<String>,
    limit: Option<usize>,
}

async fn handle_list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    let Query(q) = query?;
    let (Some(platform), Some(group_id)) = (non_empty(q.platform), non_empty(q.group_id)) else {
        return Err(AppError::bad_request("platform and groupId required"));
    };
    let thread_id = non_empty(q.thread_id);
    let messages = search::get_by_group(
        state.store.as_ref(),
        &state.retrieval,
        &platform,
        &group_id,
        thread_id.as_deref(),
        q.limit,
    )
    .await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorQuery {
    platform: Option<String>,
    author_id: Option<String>,
    limit: Option<usize>,
}

async fn handle_list_by_author(
    State(state): State<AppState>,
    query: Result<Query<AuthorQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    let Query(q) = query?;
    let (Some(platform), Some(author_id)) = (non_empty(q.platform), non_empty(q.author_id)) else {
        return Err(AppError::bad_request("platform and authorId required"));
    };
    let messages = search::get_by_author(
        state.store.as_ref(),
        &state.retrieval,
        &platform,
        &author_id,
        q.limit,
    )
    .await?;
    Ok(Json(messages))
}

async fn handle_get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Message> {
    match state.store.get(&id).await? {
        Some(msg) => Ok(Json(msg)),
        None => Err(AppError::not_found(format!("message not found: {}", id))),
    }
}

// ============ Search ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordQuery {
    query: Option<String>,
    platform: Option<String>,
    group_id: Option<String>,
    author_id: Option<String>,
    limit: Option<usize>,
}

async fn handle_keyword_search(
    State(state): State<AppState>,
    query: Result<Query<KeywordQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    let Query(q) = query?;
    let text = q
        .query
        .ok_or_else(|| AppError::bad_request("query required"))?;
    let filter = filter_from(q.platform, q.group_id, q.author_id);
    let messages = search::keyword_search(
        state.store.as_ref(),
        &state.retrieval,
        &text,
        &filter,
        q.limit,
    )
    .await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemanticRequest {
    query: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `POST /search/semantic`. A blank `query` returns `[]` without calling
/// the embedding provider.
async fn handle_semantic_search(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Vec<ScoredMessage>> {
    let req: SemanticRequest = parse_body(&body)?;
    let filter = filter_from(req.platform, req.group_id, req.author_id);
    let hits = search::semantic_search(
        state.store.as_ref(),
        state.index.as_ref(),
        state.provider.as_ref(),
        &state.retrieval,
        &req.query,
        &filter,
        req.limit,
    )
    .await?;
    Ok(Json(hits))
}

// ============ Embedding ============

#[derive(Debug, Default, Deserialize)]
struct EmbedRequest {
    #[serde(default)]
    limit: Option<usize>,
}

/// `POST /embed`. The body is optional; an empty body uses the configured
/// batch limit.
async fn handle_embed_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<Value> {
    let req: EmbedRequest = if body.is_empty() {
        EmbedRequest::default()
    } else {
        parse_body(&body)?
    };
    let limit = req.limit.unwrap_or(state.embed_batch_limit);
    let embedded = pipeline::embed_batch(
        state.store.as_ref(),
        state.provider.as_ref(),
        state.pipeline,
        limit,
    )
    .await?;
    Ok(Json(json!({ "embedded": embedded })))
}

async fn handle_embed_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let embedded = pipeline::embed_one(
        state.store.as_ref(),
        state.provider.as_ref(),
        state.pipeline,
        &id,
    )
    .await?;
    Ok(Json(json!({ "embedded": embedded })))
}

// ============ Stats & sync state ============

async fn handle_stats(State(state): State<AppState>) -> ApiResult<Stats> {
    Ok(Json(state.store.stats().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncQuery {
    platform: Option<String>,
    group_id: Option<String>,
}

async fn handle_get_sync_state(
    State(state): State<AppState>,
    query: Result<Query<SyncQuery>, QueryRejection>,
) -> ApiResult<Option<SyncState>> {
    let Query(q) = query?;
    let (Some(platform), Some(group_id)) = (non_empty(q.platform), non_empty(q.group_id)) else {
        return Err(AppError::bad_request("platform and groupId required"));
    };
    Ok(Json(state.store.get_sync_state(&platform, &group_id).await?))
}

async fn handle_put_sync_state(State(state): State<AppState>, body: Bytes) -> ApiResult<Value> {
    let sync: SyncState = parse_body(&body)?;
    state.store.put_sync_state(&sync).await?;
    Ok(Json(json!({ "ok": true })))
}
