//! Offline term preprocessing
//!
//! Amortizes per-segment term translation across a whole dataset:
//! extract -> deduplicate -> database lookup -> batch translate -> ingest.
//! Extraction fans out under the run's concurrency cap; batch translation
//! runs under a separate, lower cap to avoid context-window pressure.

use crate::agents::batch::{BatchTerm, BatchTermTranslateAgent, BATCH_SIZE};
use crate::agents::terminology::{ExtractedTerm, TermExtractAgent};
use crate::clients::LlmClient;
use crate::termbase::{normalize_term, TermStore};
use lexmt_common::types::{LanguagePair, Segment, TermEntry, MAX_TERM_CONTEXTS};
use lexmt_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Concurrency cap for batch-translate calls
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;
/// A database hit at or above this confidence resolves a term without an
/// LLM call
pub const HIGH_CONFIDENCE: f64 = 0.8;
/// Confidence assigned to freshly LLM-translated terms
const LLM_CONFIDENCE: f64 = 0.8;

/// Preprocessing summary
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PreprocessReport {
    pub total_segments: usize,
    pub unique_terms: usize,
    pub db_hits: usize,
    pub new_translations: usize,
    pub ingest_errors: usize,
    /// Terms whose batch translation failed after the retry
    pub translation_failed: Vec<String>,
}

/// One deduplicated term group
#[derive(Debug, Clone, PartialEq)]
pub struct DedupTerm {
    pub term: String,
    pub count: i64,
    pub importance: f64,
    pub category: String,
    pub contexts: Vec<String>,
}

/// Merge extracted terms by normalized form: counts sum, importance takes
/// the maximum, and up to two contexts are kept, preferring the longest
/// source texts as an informativeness proxy. Output order is by count then
/// importance, descending.
pub fn dedup_terms(per_segment: &[(Vec<ExtractedTerm>, String)]) -> Vec<DedupTerm> {
    struct Group {
        surface: String,
        count: i64,
        importance: f64,
        category: String,
        contexts: Vec<String>,
    }

    let mut groups: HashMap<String, Group> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (terms, context) in per_segment {
        for term in terms {
            let norm = normalize_term(&term.term);
            if norm.is_empty() {
                continue;
            }
            let group = groups.entry(norm.clone()).or_insert_with(|| {
                order.push(norm.clone());
                Group {
                    surface: term.term.trim().to_string(),
                    count: 0,
                    importance: 0.0,
                    category: term.category.clone(),
                    contexts: Vec::new(),
                }
            });
            group.count += 1;
            group.importance = group.importance.max(term.importance);
            if group.category.is_empty() && !term.category.is_empty() {
                group.category = term.category.clone();
            }
            if !context.is_empty() && !group.contexts.contains(context) {
                group.contexts.push(context.clone());
            }
        }
    }

    let mut deduped: Vec<DedupTerm> = order
        .into_iter()
        .map(|norm| {
            let mut group = groups.remove(&norm).unwrap();
            // Longest contexts carry the most signal for disambiguation
            group
                .contexts
                .sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
            group.contexts.truncate(MAX_TERM_CONTEXTS);
            DedupTerm {
                term: group.surface,
                count: group.count,
                importance: group.importance,
                category: group.category,
                contexts: group.contexts,
            }
        })
        .collect();

    deduped.sort_by(|a, b| {
        b.count.cmp(&a.count).then(
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    deduped
}

/// Dataset-wide term preprocessor
pub struct TermPreprocessor {
    llm: Arc<LlmClient>,
    termbase: Arc<TermStore>,
    extract_concurrency: usize,
    batch_concurrency: usize,
}

impl TermPreprocessor {
    pub fn new(llm: Arc<LlmClient>, termbase: Arc<TermStore>, extract_concurrency: usize) -> Self {
        Self {
            llm,
            termbase,
            extract_concurrency: extract_concurrency.max(1),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Run the full preprocessing pipeline over a dataset.
    pub async fn run(&self, segments: &[Segment], pair: LanguagePair) -> Result<PreprocessReport> {
        let mut report = PreprocessReport {
            total_segments: segments.len(),
            ..PreprocessReport::default()
        };

        // Stage 1: concurrent extraction; per-segment failure logs and continues
        let extracted = self.extract_all(segments, pair).await;

        // Stage 2: deduplicate
        let deduped = dedup_terms(&extracted);
        report.unique_terms = deduped.len();
        tracing::info!(
            segments = segments.len(),
            extracted = extracted.iter().map(|(t, _)| t.len()).sum::<usize>(),
            unique = deduped.len(),
            "Term extraction and deduplication complete"
        );

        // Stage 3: database lookup splits resolved from needs-translation
        let mut resolved: Vec<TermEntry> = Vec::new();
        let mut flagged: Vec<DedupTerm> = Vec::new();
        for term in deduped {
            let hits = self
                .termbase
                .lookup(&term.term, pair, 5, None)
                .await?;
            let best_exact = hits.iter().find(|h| {
                h.origin == lexmt_common::types::MatchOrigin::DbExact
                    && h.entry.confidence >= HIGH_CONFIDENCE
            });
            let high_confidence = best_exact.is_some()
                || hits.iter().any(|h| h.entry.confidence >= HIGH_CONFIDENCE);

            if let Some(hit) = best_exact {
                // Re-ingest the stored form so occurrence counts aggregate
                // across runs without creating new rows
                resolved.push(TermEntry {
                    source_form: hit.entry.source_form.clone(),
                    target_form: hit.entry.target_form.clone(),
                    pair,
                    definition: hit.entry.definition.clone(),
                    domain: hit.entry.domain.clone(),
                    confidence: hit.entry.confidence,
                    occurrence_count: term.count,
                    contexts: term.contexts.clone(),
                });
                report.db_hits += 1;
            } else if high_confidence {
                report.db_hits += 1;
            } else {
                flagged.push(term);
            }
        }

        // Stage 4: batch translation under the lower cap
        let (translations, failed) = self.batch_translate(&flagged, pair).await;
        report.translation_failed = failed;
        report.new_translations = translations.len();

        for (term, target) in &translations {
            resolved.push(TermEntry {
                source_form: term.term.clone(),
                target_form: target.clone(),
                pair,
                definition: None,
                domain: "legal".to_string(),
                confidence: LLM_CONFIDENCE,
                occurrence_count: term.count,
                contexts: term.contexts.clone(),
            });
        }

        // Stage 5: ingest
        if !resolved.is_empty() {
            match self.termbase.ingest(&resolved).await {
                Ok(ingest) => {
                    tracing::info!(
                        inserted = ingest.inserted,
                        merged = ingest.merged,
                        "Preprocessing ingest complete"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Preprocessing ingest failed");
                    report.ingest_errors += resolved.len();
                }
            }
        }

        tracing::info!(
            total_segments = report.total_segments,
            unique_terms = report.unique_terms,
            db_hits = report.db_hits,
            new_translations = report.new_translations,
            failed = report.translation_failed.len(),
            "Preprocessing complete"
        );
        Ok(report)
    }

    /// Extract terms from every segment under the concurrency cap.
    async fn extract_all(
        &self,
        segments: &[Segment],
        pair: LanguagePair,
    ) -> Vec<(Vec<ExtractedTerm>, String)> {
        let semaphore = Arc::new(Semaphore::new(self.extract_concurrency));
        let mut join_set: JoinSet<(usize, Vec<ExtractedTerm>, String)> = JoinSet::new();

        for (idx, segment) in segments.iter().enumerate() {
            let llm = self.llm.clone();
            let semaphore = semaphore.clone();
            let source = segment.source.clone();
            let segment_id = segment.id.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                match TermExtractAgent.run(&llm, &source, pair).await {
                    Ok(terms) => (idx, terms, source),
                    Err(e) => {
                        tracing::warn!(
                            segment_id = %segment_id,
                            error = %e,
                            "Term extraction failed for segment, continuing"
                        );
                        (idx, Vec::new(), source)
                    }
                }
            });
        }

        let mut results: Vec<(usize, Vec<ExtractedTerm>, String)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(item) => results.push(item),
                Err(e) => tracing::error!(error = %e, "Extraction task panicked"),
            }
        }
        results.sort_by_key(|(idx, _, _)| *idx);
        results
            .into_iter()
            .map(|(_, terms, context)| (terms, context))
            .collect()
    }

    /// Translate flagged terms in batches; each batch retries once, then
    /// its terms are recorded as failed without raising.
    async fn batch_translate(
        &self,
        flagged: &[DedupTerm],
        pair: LanguagePair,
    ) -> (Vec<(DedupTerm, String)>, Vec<String>) {
        let semaphore = Arc::new(Semaphore::new(self.batch_concurrency));
        let mut join_set: JoinSet<(Vec<(DedupTerm, String)>, Vec<String>)> = JoinSet::new();

        for chunk in flagged.chunks(BATCH_SIZE) {
            let llm = self.llm.clone();
            let semaphore = semaphore.clone();
            let chunk: Vec<DedupTerm> = chunk.to_vec();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                let batch: Vec<BatchTerm> = chunk
                    .iter()
                    .map(|t| BatchTerm {
                        term: t.term.clone(),
                        contexts: t.contexts.clone(),
                    })
                    .collect();

                let mut attempt = BatchTermTranslateAgent.run(&llm, &batch, pair).await;
                if attempt.is_err() {
                    tracing::warn!("Batch translation failed, retrying once");
                    attempt = BatchTermTranslateAgent.run(&llm, &batch, pair).await;
                }

                match attempt {
                    Ok(map) => {
                        let mut translated = Vec::new();
                        let mut failed = Vec::new();
                        for term in chunk {
                            match map.get(&term.term) {
                                Some(target) => translated.push((term, target.clone())),
                                None => failed.push(term.term),
                            }
                        }
                        (translated, failed)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Batch translation failed after retry");
                        (
                            Vec::new(),
                            chunk.into_iter().map(|t| t.term).collect(),
                        )
                    }
                }
            });
        }

        let mut translated = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((ok, bad)) => {
                    translated.extend(ok);
                    failed.extend(bad);
                }
                Err(e) => tracing::error!(error = %e, "Batch translation task panicked"),
            }
        }
        (translated, failed)
    }
}
