//! Embedding provider implementations.
//!
//! The [`EmbeddingProvider`] trait and the offline [`HashingEmbedder`] live
//! in `trailscout-core`; this module adds the network and local-model
//! backends and [`create_provider`] to pick one from configuration:
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"hash"` | [`HashingEmbedder`] (default, deterministic, no network) |
//! | `"openai"` | [`OpenAIProvider`] |
//! | `"ollama"` | [`OllamaProvider`] |
//! | `"local"` | `LocalProvider` (requires `--features local-embeddings-fastembed`) |
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

pub use trailscout_core::embedding::{embed_one, EmbeddingProvider, HashingEmbedder};

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the provider selected by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(HashingEmbedder::DEFAULT_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires building with --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// POST `body` to `url`, retrying 429/5xx/network errors with backoff.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn parse_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", label))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn check_dims(vectors: &[Vec<f32>], dims: usize, label: &str) -> Result<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "{} returned a {}-dimensional vector, expected {}",
            label,
            bad.len(),
            dims
        );
    }
    Ok(())
}

// ============ OpenAI Provider ============

/// Calls the OpenAI embeddings API, batching by `embedding.batch_size`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            api_key,
            client: http_client(config)?,
        })
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
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
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_with_retry(
                &self.client,
                OPENAI_URL,
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            if vectors.len() != batch.len() {
                bail!(
                    "OpenAI returned {} embeddings for {} inputs",
                    vectors.len(),
                    batch.len()
                );
            }
            check_dims(&vectors, self.dims, "OpenAI")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

// ============ Ollama Provider ============

/// Calls `POST /api/embed` on a local Ollama instance.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config)?,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|v| parse_vector(v, "Ollama"))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_with_retry(
                &self.client,
                &endpoint,
                None,
                &body,
                self.max_retries,
                "Ollama",
            )
            .await?;
            let vectors = parse_ollama_response(&json)?;
            check_dims(&vectors, self.dims, "Ollama")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

// ============ Local Provider (fastembed) ============

/// Runs an ONNX sentence-embedding model in-process via fastembed.
///
/// The model is loaded lazily on first use and kept for the life of the
/// provider; inference runs on the blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, native_dims) = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims.unwrap_or(native_dims),
            batch_size: config.batch_size.max(1),
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let loaded = Arc::clone(&self.loaded);

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let engine = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(engine);
            }
            let engine = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local embedding model not loaded"))?;
            engine
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        check_dims(&vectors, self.dims, "local model")?;
        Ok(vectors)
    }
}
