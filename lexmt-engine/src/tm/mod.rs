//! Translation-memory index
//!
//! Hybrid retrieval over aligned source/target pairs: an in-memory BM25
//! lexical index persisted as JSON, fused linearly with dense cosine
//! similarity from the per-pair vector collection when one is configured.
//! Read-only during experiments; writes happen only during corpus import.

pub mod bm25;

use crate::clients::{
    collection_name, CollectionKind, EmbeddingClient, VectorDbClient, VectorPoint,
};
use bm25::Bm25Index;
use lexmt_common::types::{LanguagePair, TmEntry, TmHit};
use lexmt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default dense/lexical interpolation weight
pub const DEFAULT_ALPHA: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TmRecord {
    id: String,
    entry: TmEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LexicalCorpus {
    records: Vec<TmRecord>,
}

struct LexicalState {
    records: Vec<TmRecord>,
    index: Bm25Index,
}

impl LexicalState {
    fn rebuild(records: Vec<TmRecord>) -> Self {
        let sources: Vec<String> = records
            .iter()
            .map(|r| r.entry.source_text.clone())
            .collect();
        Self {
            index: Bm25Index::build(&sources),
            records,
        }
    }
}

/// Deterministic point id for an aligned pair
fn entry_id(entry: &TmEntry) -> String {
    let content = format!(
        "{}:{}:{}",
        entry.pair, entry.source_text, entry.target_text
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string()
}

/// Hybrid TM index for one language pair
pub struct TmIndex {
    pair: LanguagePair,
    lexical: RwLock<LexicalState>,
    index_path: Option<PathBuf>,
    embeddings: Option<Arc<EmbeddingClient>>,
    vector_db: Option<Arc<VectorDbClient>>,
}

impl TmIndex {
    /// Open a lexical-only index, loading the persisted corpus when present.
    pub fn open(pair: LanguagePair, index_path: Option<PathBuf>) -> Result<Self> {
        let records = match &index_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                let corpus: LexicalCorpus = serde_json::from_str(&content)?;
                tracing::info!(
                    pair = %pair,
                    entries = corpus.records.len(),
                    "Loaded TM lexical corpus"
                );
                corpus
                    .records
                    .into_iter()
                    .filter(|r| r.entry.pair == pair)
                    .collect()
            }
            _ => Vec::new(),
        };

        Ok(Self {
            pair,
            lexical: RwLock::new(LexicalState::rebuild(records)),
            index_path,
            embeddings: None,
            vector_db: None,
        })
    }

    /// Attach embedding + vector-collection clients, enabling the dense
    /// component of hybrid search.
    pub async fn with_dense(
        mut self,
        embeddings: Arc<EmbeddingClient>,
        vector_db: Arc<VectorDbClient>,
    ) -> Result<Self> {
        let name = collection_name(CollectionKind::TranslationMemory, self.pair);
        vector_db
            .ensure_collection(&name, embeddings.dimension())
            .await?;
        self.embeddings = Some(embeddings);
        self.vector_db = Some(vector_db);
        Ok(self)
    }

    pub fn pair(&self) -> LanguagePair {
        self.pair
    }

    /// Number of entries in the lexical corpus.
    pub async fn size(&self) -> usize {
        self.lexical.read().await.records.len()
    }

    /// Insert one aligned pair. Duplicate (source, target) pairs are
    /// ignored; an empty source is invalid input.
    pub async fn insert(&self, source: &str, target: &str) -> Result<bool> {
        if source.trim().is_empty() {
            return Err(Error::InputInvalid(
                "TM source text must be non-empty".to_string(),
            ));
        }

        let entry = TmEntry {
            source_text: source.to_string(),
            target_text: target.to_string(),
            pair: self.pair,
        };
        let id = entry_id(&entry);

        {
            let lexical = self.lexical.read().await;
            if lexical.records.iter().any(|r| r.id == id) {
                return Ok(false);
            }
        }

        if let (Some(embeddings), Some(vector_db)) = (&self.embeddings, &self.vector_db) {
            let vector = embeddings.embed_one(source).await?;
            let point = VectorPoint {
                id: id.clone(),
                vector,
                payload: serde_json::json!({
                    "source_text": entry.source_text,
                    "target_text": entry.target_text,
                }),
            };
            let name = collection_name(CollectionKind::TranslationMemory, self.pair);
            vector_db.upsert(&name, &[point]).await?;
        }

        let mut lexical = self.lexical.write().await;
        let mut records = std::mem::take(&mut lexical.records);
        records.push(TmRecord { id, entry });
        *lexical = LexicalState::rebuild(records);
        Ok(true)
    }

    /// Batch corpus import with progress logging. Returns inserted count.
    pub async fn insert_batch(&self, entries: &[(String, String)]) -> Result<usize> {
        let mut inserted = 0;
        for (idx, (source, target)) in entries.iter().enumerate() {
            match self.insert(source, target).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(Error::InputInvalid(reason)) => {
                    tracing::warn!(index = idx, %reason, "Skipping invalid TM entry");
                }
                Err(e) => return Err(e),
            }
            if (idx + 1) % 100 == 0 {
                tracing::info!(
                    pair = %self.pair,
                    progress = idx + 1,
                    total = entries.len(),
                    "TM import progress"
                );
            }
        }
        self.save().await?;
        Ok(inserted)
    }

    /// Persist the lexical corpus when a path is configured.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };
        let lexical = self.lexical.read().await;
        let corpus = LexicalCorpus {
            records: lexical.records.clone(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(&corpus)?)?;
        tracing::debug!(
            path = %path.display(),
            entries = corpus.records.len(),
            "Saved TM lexical corpus"
        );
        Ok(())
    }

    /// Hybrid top-k search.
    ///
    /// score = alpha * dense_cosine + (1 - alpha) * max-normalized BM25.
    /// When only one component is available it is used unweighted, so the
    /// similarity floor keeps its meaning in degraded (lexical-only) mode.
    /// Results are deduplicated by (source, target), sorted descending, and
    /// filtered by `floor` when one is given; an empty result is legitimate.
    pub async fn search(
        &self,
        source: &str,
        k: usize,
        alpha: f64,
        floor: Option<f64>,
    ) -> Result<Vec<TmHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let alpha = alpha.clamp(0.0, 1.0);

        // Lexical component, normalized by the best score in this query
        let mut fused: HashMap<String, (TmEntry, f64, f64)> = HashMap::new();
        {
            let lexical = self.lexical.read().await;
            let scores = lexical.index.scores(source);
            let max_score = scores.iter().cloned().fold(0.0f64, f64::max);
            if max_score > 0.0 {
                for (record, raw) in lexical.records.iter().zip(scores) {
                    let normalized = raw / max_score;
                    if normalized > 0.0 {
                        fused.insert(
                            record.id.clone(),
                            (record.entry.clone(), 0.0, normalized),
                        );
                    }
                }
            }
        }

        // Dense component
        let mut dense_available = false;
        if let (Some(embeddings), Some(vector_db)) = (&self.embeddings, &self.vector_db) {
            dense_available = true;
            let query = embeddings.embed_one(source).await?;
            let name = collection_name(CollectionKind::TranslationMemory, self.pair);
            let matches = vector_db.search(&name, &query, k * 2).await?;
            for m in matches {
                let source_text = m.payload["source_text"].as_str().unwrap_or_default();
                let target_text = m.payload["target_text"].as_str().unwrap_or_default();
                if source_text.is_empty() {
                    continue;
                }
                let entry = TmEntry {
                    source_text: source_text.to_string(),
                    target_text: target_text.to_string(),
                    pair: self.pair,
                };
                let cosine = m.score.clamp(0.0, 1.0);
                fused
                    .entry(m.id)
                    .and_modify(|(_, dense, _)| *dense = cosine)
                    .or_insert((entry, cosine, 0.0));
            }
        }

        let lexical_available = { !self.lexical.read().await.index.is_empty() };

        let mut hits: Vec<TmHit> = fused
            .into_values()
            .map(|(entry, dense, lex)| {
                let score = match (dense_available, lexical_available) {
                    (true, true) => alpha * dense + (1.0 - alpha) * lex,
                    (true, false) => dense,
                    (false, true) => lex,
                    (false, false) => 0.0,
                };
                TmHit { entry, score }
            })
            .collect();

        // Deduplicate by aligned pair, keeping the best score
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut seen: Vec<(String, String)> = Vec::new();
        hits.retain(|hit| {
            let key = (
                hit.entry.source_text.clone(),
                hit.entry.target_text.clone(),
            );
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });

        if let Some(floor) = floor {
            hits.retain(|hit| hit.score >= floor);
        }
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded_index() -> TmIndex {
        let index = TmIndex::open(LanguagePair::zh_en(), None).unwrap();
        index
            .insert("劳动者享有平等就业的权利", "Workers shall enjoy the right to equal employment")
            .await
            .unwrap();
        index
            .insert("公司应当依法纳税", "The company shall pay taxes according to law")
            .await
            .unwrap();
        index
            .insert("合同自成立时生效", "A contract takes effect upon formation")
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn search_returns_sorted_results_within_k() {
        let index = seeded_index().await;
        let hits = index
            .search("劳动者享有平等就业的权利", 2, DEFAULT_ALPHA, None)
            .await
            .unwrap();

        assert!(hits.len() <= 2);
        assert!(!hits.is_empty());
        for window in hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        assert_eq!(
            hits[0].entry.target_text,
            "Workers shall enjoy the right to equal employment"
        );
    }

    #[tokio::test]
    async fn identical_query_scores_one_in_lexical_mode() {
        let index = seeded_index().await;
        let hits = index
            .search("合同自成立时生效", 3, DEFAULT_ALPHA, None)
            .await
            .unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn floor_filters_low_relevance_hits() {
        let index = seeded_index().await;
        // Overlaps the employment entry strongly and the contract entry weakly
        let all = index
            .search("劳动者的合同权利", 10, DEFAULT_ALPHA, None)
            .await
            .unwrap();
        assert!(all.len() > 1);

        let floored = index
            .search("劳动者的合同权利", 10, DEFAULT_ALPHA, Some(0.95))
            .await
            .unwrap();
        assert!(floored.len() < all.len());
        for hit in &floored {
            assert!(hit.score >= 0.95);
        }
    }

    #[tokio::test]
    async fn floor_may_leave_zero_results() {
        let index = seeded_index().await;
        // No token overlap with the corpus at all
        let hits = index
            .search("entirely unrelated text", 5, DEFAULT_ALPHA, Some(0.99))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn duplicate_pairs_are_inserted_once() {
        let index = seeded_index().await;
        let before = index.size().await;
        let inserted = index
            .insert("合同自成立时生效", "A contract takes effect upon formation")
            .await
            .unwrap();
        assert!(!inserted);
        assert_eq!(index.size().await, before);
    }

    #[tokio::test]
    async fn empty_source_is_invalid_input() {
        let index = TmIndex::open(LanguagePair::zh_en(), None).unwrap();
        let err = index.insert("  ", "target").await.unwrap_err();
        assert_eq!(err.kind(), "input_invalid");
    }

    #[tokio::test]
    async fn corpus_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tm_index.json");

        {
            let index = TmIndex::open(LanguagePair::zh_en(), Some(path.clone())).unwrap();
            index.insert("合同自成立时生效", "A contract takes effect").await.unwrap();
            index.save().await.unwrap();
        }

        let reloaded = TmIndex::open(LanguagePair::zh_en(), Some(path)).unwrap();
        assert_eq!(reloaded.size().await, 1);
        let hits = reloaded
            .search("合同自成立时生效", 1, DEFAULT_ALPHA, None)
            .await
            .unwrap();
        assert_eq!(hits[0].entry.target_text, "A contract takes effect");
    }
}
