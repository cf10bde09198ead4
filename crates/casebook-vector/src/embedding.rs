//! Embedding service trait and implementations.
//!
//! Document and query embeddings are distinct operations even when served
//! by the same model - retrieval quality depends on intent-specific
//! embedding, so the trait exposes both and implementations must not
//! collapse one into the other.
//!
//! - `GeminiEmbedding` calls the hosted embedding API with the proper task
//!   type and retries transient failures with exponential backoff.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use casebook_core::config::EmbeddingConfig;
use casebook_core::error::{CasebookError, Result};

/// Intent of an embedding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedIntent {
    Document,
    Query,
}

impl EmbedIntent {
    fn task_type(self) -> &'static str {
        match self {
            EmbedIntent::Document => "RETRIEVAL_DOCUMENT",
            EmbedIntent::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Indexing
/// uses `embed_document`; searching uses `embed_query`.
pub trait EmbeddingService: Send + Sync {
    /// Embed text for storage in the index.
    fn embed_document(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;

    /// Embed text as a search query.
    fn embed_query(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because the trait methods return `impl Future` they are not
/// object-safe. This trait uses boxed futures instead, allowing
/// `Box<dyn DynEmbeddingService>` to be stored in structs without
/// generics. A blanket implementation covers every `EmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_document_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn embed_query_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>>;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_document_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed_document(text))
    }

    fn embed_query_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed_query(text))
    }
}

// ---------------------------------------------------------------------------
// GeminiEmbedding - hosted embedding API with retry/backoff
// ---------------------------------------------------------------------------

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

/// Embedding client for the hosted `embedContent` API.
///
/// Transient failures (HTTP 429, 5xx, network errors) are retried with
/// exponential backoff up to the configured attempt count; anything else
/// fails immediately.
pub struct GeminiEmbedding {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
    retry_base: Duration,
}

impl GeminiEmbedding {
    /// Build a client from configuration, resolving the API key from the
    /// configured environment variables.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CasebookError::Embedding(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/models/{}:embedContent", API_BASE, config.model),
            model: format!("models/{}", config.model),
            api_key,
            max_retries: config.max_retries.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
        })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn embed_with_intent(&self, text: &str, intent: EmbedIntent) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(CasebookError::Embedding("cannot embed empty text".to_string()));
        }

        let request = EmbedRequest {
            model: self.model.clone(),
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
            task_type: intent.task_type(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(&self.endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbedResponse = resp.json().await.map_err(|e| {
                            CasebookError::Embedding(format!("invalid response: {}", e))
                        })?;
                        debug!(
                            task_type = intent.task_type(),
                            dimensions = parsed.embedding.values.len(),
                            "Embedding generated"
                        );
                        return Ok(parsed.embedding.values);
                    }

                    let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
                    if Self::should_retry(status) && attempt < self.max_retries {
                        let delay = self.backoff(attempt);
                        warn!(%status, attempt, delay_ms = delay.as_millis() as u64,
                              "Embedding request failed; retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(CasebookError::Embedding(format!(
                        "embedding request failed ({}): {}",
                        status, body
                    )));
                }
                Err(err) => {
                    if attempt < self.max_retries {
                        let delay = self.backoff(attempt);
                        warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64,
                              "Embedding request errored; retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(CasebookError::Embedding(format!("request failed: {}", err)));
                }
            }
        }
    }
}

impl EmbeddingService for GeminiEmbedding {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_intent(text, EmbedIntent::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_intent(text, EmbedIntent::Query).await
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service returning deterministic 384-dimensional unit
/// vectors derived from a hash of the input text.
///
/// Identical inputs always produce identical outputs, and the mock uses
/// the same vector for both intents, so a query for text equal to an
/// indexed document lands on that document at distance zero.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(384);
        for i in 0..384usize {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize so cosine distances stay within [0, 2].
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(CasebookError::Embedding("cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_document(text).await
    }
}
