//! Vector collection client
//!
//! Thin client for a Qdrant-style vector database. The core only needs
//! three operations per named collection: create-if-absent, upsert, and
//! top-k cosine search. Two collections exist per language pair, one for
//! terms and one for translation memory.

use lexmt_common::types::LanguagePair;
use lexmt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Which of the two per-pair collections to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Terms,
    TranslationMemory,
}

/// Collection name for a language pair, e.g. `terms_zh_en`
pub fn collection_name(kind: CollectionKind, pair: LanguagePair) -> String {
    let prefix = match kind {
        CollectionKind::Terms => "terms",
        CollectionKind::TranslationMemory => "tm",
    };
    format!("{}_{}", prefix, pair.collection_suffix())
}

/// One stored point
#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// One search hit
#[derive(Debug, Clone, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<VectorMatch>,
}

/// REST client for the vector collection server
pub struct VectorDbClient {
    http: reqwest::Client,
    base_url: String,
}

impl VectorDbClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create the collection if it does not exist. An "already exists"
    /// response is success.
    pub async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });

        let response = self
            .http
            .put(format!("{}/collections/{}", self.base_url, name))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("vector-db request failed: {e}")))?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            return Ok(());
        }
        // Some servers report an existing collection as a 4xx with a message
        let text = response.text().await.unwrap_or_default();
        if text.contains("already exists") {
            return Ok(());
        }
        Err(Error::UpstreamUnavailable(format!(
            "create collection {name} returned {status}: {text}"
        )))
    }

    /// Upsert points into a collection.
    pub async fn upsert(&self, name: &str, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({ "points": points });
        let response = self
            .http
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.base_url, name
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("vector-db request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "upsert into {name} returned {status}: {text}"
            )));
        }
        Ok(())
    }

    /// Top-k cosine search with payloads.
    pub async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .http
            .post(format!(
                "{}/collections/{}/points/search",
                self.base_url, name
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("vector-db request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "search in {name} returned {status}: {text}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("vector-db search parse: {e}")))?;
        Ok(parsed.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_per_pair_and_kind() {
        let pair = LanguagePair::zh_en();
        assert_eq!(collection_name(CollectionKind::Terms, pair), "terms_zh_en");
        assert_eq!(
            collection_name(CollectionKind::TranslationMemory, pair),
            "tm_zh_en"
        );
    }
}
