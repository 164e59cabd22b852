//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and the config-dispatched
//! [`embed_texts`] entry point. Backends:
//! - **gemini** — Google `batchEmbedContents` (default, `text-embedding-004`).
//! - **openai** — OpenAI-compatible `POST /embeddings`.
//! - **ollama** — local Ollama `POST /api/embed`.
//! - **disabled** — always errors.
//!
//! Also provides the vector helpers the index uses for storage and ranking:
//! [`vec_to_blob`], [`blob_to_vec`] and [`cosine_similarity`].
//!
//! Transient failures are retried per [`crate::provider`]'s policy.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::config::EmbeddingConfig;
use crate::provider::{
    base_url, http_client, post_json_with_retry, require_key, GEMINI_BASE_URL, OLLAMA_BASE_URL,
    OPENAI_BASE_URL,
};

const GEMINI_DEFAULT_MODEL: &str = "text-embedding-004";
const GEMINI_DEFAULT_DIMS: usize = 768;

/// Metadata about the configured embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded next to each stored vector.
    fn model_name(&self) -> &str;
    /// Expected vector dimensionality (0 when unknown or disabled).
    fn dims(&self) -> usize;
}

/// Returned when `provider = "disabled"`; every embed call fails.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

/// Any remote backend: a model name plus its dimensionality.
pub struct RemoteProvider {
    model: String,
    dims: usize,
}

impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Instantiate provider metadata for the configured backend.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "gemini" => Ok(Box::new(RemoteProvider {
            model: gemini_model(config).to_string(),
            dims: config.dims.unwrap_or(GEMINI_DEFAULT_DIMS),
        })),
        "openai" | "ollama" => {
            let model = config.model.clone().ok_or_else(|| {
                anyhow::anyhow!("embedding.model required for {} provider", config.provider)
            })?;
            Ok(Box::new(RemoteProvider {
                model,
                dims: config.dims.unwrap_or(0),
            }))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a batch of texts with the configured backend, in input order.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = match config.provider.as_str() {
        "gemini" => embed_gemini(config, texts).await?,
        "openai" => embed_openai(config, texts).await?,
        "ollama" => embed_ollama(config, texts).await?,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    if vectors.len() != texts.len() {
        bail!(
            "Embedding response had {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        );
    }
    Ok(vectors)
}

/// Embed a single query string.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    embed_texts(config, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

fn gemini_model(config: &EmbeddingConfig) -> &str {
    config
        .model
        .as_deref()
        .unwrap_or(GEMINI_DEFAULT_MODEL)
        .trim_start_matches("models/")
}

// ============ Gemini ============

async fn embed_gemini(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = require_key(config.api_key.as_ref(), "GOOGLE_API_KEY")?;
    let model = gemini_model(config);
    let url = format!(
        "{}/models/{}:batchEmbedContents",
        base_url(config.url.as_deref(), GEMINI_BASE_URL),
        model
    );

    let requests: Vec<Value> = texts
        .iter()
        .map(|text| {
            json!({
                "model": format!("models/{}", model),
                "content": { "parts": [{ "text": text }] },
            })
        })
        .collect();
    let body = json!({ "requests": requests });

    let client = http_client(config.timeout_secs)?;
    let json = post_json_with_retry(
        &client,
        "Gemini",
        &url,
        &[("x-goog-api-key", api_key)],
        &body,
        config.max_retries,
    )
    .await?;

    parse_gemini_response(&json)
}

fn parse_gemini_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|item| {
            item.get("values")
                .and_then(|v| v.as_array())
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing values"))
        })
        .collect()
}

// ============ OpenAI ============

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = require_key(config.api_key.as_ref(), "OPENAI_API_KEY")?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let url = format!(
        "{}/embeddings",
        base_url(config.url.as_deref(), OPENAI_BASE_URL)
    );

    let body = json!({ "model": model, "input": texts });
    let client = http_client(config.timeout_secs)?;
    let json = post_json_with_retry(
        &client,
        "OpenAI",
        &url,
        &[("Authorization", format!("Bearer {}", api_key))],
        &body,
        config.max_retries,
    )
    .await?;

    parse_openai_response(&json)
}

fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let url = format!(
        "{}/api/embed",
        base_url(config.url.as_deref(), OLLAMA_BASE_URL)
    );

    let body = json!({ "model": model, "input": texts });
    let client = http_client(config.timeout_secs)?;
    let json =
        post_json_with_retry(&client, "Ollama", &url, &[], &body, config.max_retries).await?;

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Encode a float vector as little-endian `f32` bytes for a SQLite BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
