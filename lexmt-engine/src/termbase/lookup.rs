//! Layered termbase lookup
//!
//! Three passes fused with rank-preserving deduplication: exact match on
//! the normalized source form, fuzzy character-similarity match, then dense
//! vector search when a vector collection is configured. Exact beats fuzzy
//! beats vector on ties; remaining ties break on confidence, then
//! occurrence count.

use super::TermStore;
use crate::clients::{collection_name, CollectionKind, EmbeddingClient, VectorDbClient};
use lexmt_common::types::{LanguagePair, MatchOrigin, TermEntry, TermHit};
use lexmt_common::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// Fuzzy-pass character similarity threshold
pub const TAU_FUZZY: f64 = 0.6;
/// Vector-pass cosine threshold
pub const TAU_VECTOR: f64 = 0.75;

/// Case-fold, trim, and strip punctuation/whitespace for matching
pub fn normalize_term(term: &str) -> String {
    term.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Normalized character-level similarity in [0,1] (1 - Levenshtein / max len)
pub fn char_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let max_len = a.len().max(b.len());
    let distance = levenshtein(&a, &b);
    1.0 - distance as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Optional dense backend for the third lookup pass
pub struct VectorLookup {
    pub embeddings: Arc<EmbeddingClient>,
    pub vector_db: Arc<VectorDbClient>,
}

impl TermStore {
    /// Ranked lookup of candidate target forms for `source_form`.
    pub async fn lookup(
        &self,
        source_form: &str,
        pair: LanguagePair,
        k: usize,
        vector: Option<&VectorLookup>,
    ) -> Result<Vec<TermHit>> {
        if k == 0 || source_form.trim().is_empty() {
            return Ok(Vec::new());
        }
        let norm = normalize_term(source_form);

        let mut hits: Vec<TermHit> = Vec::new();

        // Pass 1: exact
        for entry in self.exact_matches(&norm, pair, k).await? {
            hits.push(TermHit {
                entry,
                similarity: 1.0,
                origin: MatchOrigin::DbExact,
            });
        }

        // Pass 2: fuzzy
        for (candidate_norm, entry) in self.fuzzy_candidates(&norm, pair).await? {
            let similarity = char_similarity(&norm, &candidate_norm);
            if similarity >= TAU_FUZZY {
                hits.push(TermHit {
                    entry,
                    similarity,
                    origin: MatchOrigin::DbFuzzy,
                });
            }
        }

        // Pass 3: vector
        if let Some(vector) = vector {
            let query = vector.embeddings.embed_one(source_form).await?;
            let name = collection_name(CollectionKind::Terms, pair);
            let matches = vector.vector_db.search(&name, &query, k).await?;
            for m in matches {
                let similarity = m.score.clamp(0.0, 1.0);
                if similarity < TAU_VECTOR {
                    continue;
                }
                let source = m.payload["source_form"].as_str().unwrap_or_default();
                let target = m.payload["target_form"].as_str().unwrap_or_default();
                if source.is_empty() || target.is_empty() {
                    continue;
                }
                hits.push(TermHit {
                    entry: TermEntry {
                        source_form: source.to_string(),
                        target_form: target.to_string(),
                        pair,
                        definition: None,
                        domain: m.payload["domain"].as_str().unwrap_or_default().to_string(),
                        confidence: m.payload["confidence"].as_f64().unwrap_or(0.5),
                        occurrence_count: m.payload["occurrence_count"].as_i64().unwrap_or(1),
                        contexts: Vec::new(),
                    },
                    similarity,
                    origin: MatchOrigin::DbVector,
                });
            }
        }

        // Rank-preserving dedup: earlier passes win for the same pair
        let mut deduped: Vec<TermHit> = Vec::new();
        for hit in hits {
            let key = (hit.entry.source_form.clone(), hit.entry.target_form.clone());
            match deduped
                .iter()
                .position(|h| (h.entry.source_form.clone(), h.entry.target_form.clone()) == key)
            {
                Some(pos) => {
                    if hit.origin.pass_rank() < deduped[pos].origin.pass_rank() {
                        deduped[pos] = hit;
                    }
                }
                None => deduped.push(hit),
            }
        }

        deduped.sort_by(|a, b| rank_order(a, b));
        deduped.truncate(k);
        Ok(deduped)
    }
}

fn rank_order(a: &TermHit, b: &TermHit) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then(a.origin.pass_rank().cmp(&b.origin.pass_rank()))
        .then(
            b.entry
                .confidence
                .partial_cmp(&a.entry.confidence)
                .unwrap_or(Ordering::Equal),
        )
        .then(b.entry.occurrence_count.cmp(&a.entry.occurrence_count))
}
