//! Embedding provider implementations.
//!
//! The [`EmbeddingProvider`] trait lives in `chat-archive-core`; this module
//! supplies the concrete backends:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/embeddings` endpoint.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use chat_archive::config::EmbeddingConfig;
//! # use chat_archive::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Credentials
//!
//! The API key is read once, when the provider is created, from the
//! environment variable named by `embedding.api_key_env`. A missing key is a
//! startup error, not a per-request one.
//!
//! # Retry Strategy
//!
//! With `embedding.max_retries > 0` the OpenAI provider backs off
//! exponentially on transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use chat_archive_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;

// ============ Disabled Provider ============

/// An embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"`. Semantic search and the
/// embedding pipeline then fail at request time.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {base_url}/embeddings` with the configured model. One HTTP
/// client is built per provider and reused for every call.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if the
    /// environment variable named by `api_key_env` is unset or empty.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "{} environment variable not set (required by embedding.provider = \"openai\")",
                    config.api_key_env
                )
            })?;
        Self::with_api_key(config, api_key)
    }

    /// Create a provider with an already-resolved API key.
    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = anyhow!("OpenAI API error {}: {}", status, body_text);

                    // Client error (not 429): don't retry
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(err);
                    }
                    warn!(%status, attempt, "embedding request failed");
                    last_err = Some(err);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request failed");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and returns them in input order,
/// using each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow!("Invalid OpenAI response: non-numeric embedding value"))
            })
            .collect::<Result<Vec<f32>>>()?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        embeddings.push((index, vec));
    }

    embeddings.sort_by_key(|(index, _)| *index);
    Ok(embeddings.into_iter().map(|(_, v)| v).collect())
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if the OpenAI provider
/// cannot be initialized (missing config or API key).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn openai_config(base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".into(),
            model: Some("text-embedding-3-small".into()),
            dims: Some(3),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Serve a fake `/embeddings` endpoint that fails the first
    /// `failures` calls with 503.
    async fn spawn_fake_openai(failures: usize) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v1/embeddings",
                post(
                    |State((calls, failures)): State<(Arc<AtomicUsize>, usize)>,
                     Json(body): Json<Value>| async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < failures {
                            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                        }
                        let inputs = body["input"].as_array().cloned().unwrap_or_default();
                        // Reverse order to exercise index sorting.
                        let data: Vec<Value> = inputs
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(i, _)| json!({"index": i, "embedding": [i as f64, 0.5, 1.0]}))
                            .collect();
                        (StatusCode::OK, Json(json!({ "data": data })))
                    },
                ),
            )
            .with_state((calls.clone(), failures));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1", addr), calls)
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let err = DisabledProvider.embed(&["x".into()]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_create_provider_requires_api_key() {
        let mut config = openai_config("http://unused");
        config.api_key_env = "CHATARC_TEST_KEY_THAT_IS_NEVER_SET".into();
        let err = create_provider(&config).err().unwrap();
        assert!(err
            .to_string()
            .contains("CHATARC_TEST_KEY_THAT_IS_NEVER_SET environment variable not set"));

        let disabled = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(disabled.model_name(), "disabled");
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [2.0, 2.0]},
                {"index": 0, "embedding": [1.0, 1.0]}
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);

        assert!(parse_openai_response(&json!({})).is_err());
        assert!(parse_openai_response(&json!({"data": [{"index": 0}]})).is_err());
        assert!(parse_openai_response(&json!({"data": [{"embedding": ["a"]}]})).is_err());
    }

    #[tokio::test]
    async fn test_openai_provider_against_fake_server() {
        let (base, calls) = spawn_fake_openai(0).await;
        let provider = OpenAIProvider::with_api_key(&openai_config(&base), "sk-test".into()).unwrap();

        let out = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![0.0, 0.5, 1.0], vec![1.0, 0.5, 1.0]]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_openai_provider_no_retry_by_default() {
        let (base, calls) = spawn_fake_openai(1).await;
        let provider = OpenAIProvider::with_api_key(&openai_config(&base), "sk-test".into()).unwrap();

        let err = provider.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_openai_provider_retries_server_errors() {
        let (base, calls) = spawn_fake_openai(1).await;
        let mut config = openai_config(&base);
        config.max_retries = 1;
        let provider = OpenAIProvider::with_api_key(&config, "sk-test".into()).unwrap();

        let out = provider.embed(&["a".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
