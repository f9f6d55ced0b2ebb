//! Embedding client
//!
//! Maps text to fixed-width dense vectors through an OpenAI-compatible
//! `/embeddings` endpoint. Requests are batched, results cached per run
//! keyed by (model, text), and every returned vector is validated against
//! the width registered at startup.

use lexmt_common::config::RuntimeConfig;
use lexmt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Maximum texts per embeddings request
pub const EMBED_BATCH_SIZE: usize = 64;

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

/// Embedding API client with per-run cache
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl EmbeddingClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.embed_model.clone(),
            dimension: config.embedding_dim,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Registered output width; TM inserts are validated against this.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Internal("embeddings response was empty".to_string()))
    }

    /// Embed a sequence of texts, preserving order. Cached texts are not
    /// re-requested; misses go out in batches of [`EMBED_BATCH_SIZE`].
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(usize, String)> = Vec::new();

        {
            let cache = self.cache.lock().await;
            for (idx, text) in texts.iter().enumerate() {
                match cache.get(text) {
                    Some(vector) => results[idx] = Some(vector.clone()),
                    None => misses.push((idx, text.clone())),
                }
            }
        }

        for chunk in misses.chunks(EMBED_BATCH_SIZE) {
            let inputs: Vec<String> = chunk.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.request_batch(&inputs).await?;

            let mut cache = self.cache.lock().await;
            for ((idx, text), vector) in chunk.iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(Error::Internal(format!(
                        "embedding width {} does not match registered dimension {}",
                        vector.len(),
                        self.dimension
                    )));
                }
                cache.insert(text.clone(), vector.clone());
                results[*idx] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    async fn request_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = WireRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("embeddings request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Error::UpstreamUnavailable(format!(
                "embeddings endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "embeddings endpoint returned {status}: {text}"
            )));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedModelOutput(format!("embeddings parse: {e}")))?;

        if parsed.data.len() != inputs.len() {
            return Err(Error::Internal(format!(
                "embeddings count mismatch: sent {}, received {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

