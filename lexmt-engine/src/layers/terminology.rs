//! Terminology layer
//!
//! Extract salient terms, look them up in the termbase, evaluate the
//! resulting term table, and produce the first-round translation under its
//! constraints. When gating is enabled and the evaluator scores the table
//! above the threshold, the layer carries the direct-LLM baseline forward
//! instead of re-translating.

use super::{layer_failure, run_with_selection, should_gate, GeneratedDraft};
use crate::agents::baseline::BaselineTranslateAgent;
use crate::agents::terminology::{TermEvaluateAgent, TermExtractAgent, TermTranslateAgent};
use crate::clients::LlmClient;
use crate::termbase::lookup::VectorLookup;
use crate::termbase::TermStore;
use lexmt_common::types::{
    ControlConfig, LanguagePair, LayerArtifacts, LayerKind, LayerOutput, TermCandidate,
    TermEvaluation, TermTable, TermTableRow,
};
use lexmt_common::Result;

/// Lookup depth per extracted term
const LOOKUP_K: usize = 10;

pub struct TerminologyLayer<'a> {
    pub llm: &'a LlmClient,
    pub termbase: Option<&'a TermStore>,
    pub vector: Option<&'a VectorLookup>,
}

impl TerminologyLayer<'_> {
    pub async fn run(
        &self,
        source: &str,
        pair: LanguagePair,
        config: &ControlConfig,
    ) -> Result<LayerOutput> {
        let layer = LayerKind::Terminology;

        // Extraction failure degrades to an empty term table
        let extracted = match TermExtractAgent.run(self.llm, source, pair).await {
            Ok(terms) => terms,
            Err(e) => {
                tracing::warn!(error = %e, "Term extraction failed, continuing with empty term table");
                Vec::new()
            }
        };

        let term_table = self.build_term_table(&extracted, pair, config).await?;

        // Evaluation failure forces re-translation with score 0
        let evaluation: Option<TermEvaluation> = if term_table.is_empty() {
            None
        } else {
            match TermEvaluateAgent
                .run(self.llm, source, &term_table, pair)
                .await
            {
                Ok(evaluation) => Some(evaluation),
                Err(e) => {
                    tracing::warn!(error = %e, "Term evaluation failed, forcing re-translation");
                    None
                }
            }
        };
        let overall = evaluation.as_ref().map(|e| e.overall).unwrap_or(0.0);

        if should_gate(config, layer, overall) {
            // No prior translation exists at the first layer; the carried
            // value is the direct-LLM baseline.
            let baseline = BaselineTranslateAgent
                .run(self.llm, source, pair)
                .await
                .map_err(|e| layer_failure(layer, e))?;

            tracing::info!(score = overall, "Terminology layer gated onto baseline");
            return Ok(LayerOutput {
                layer,
                translation: baseline.translation,
                confidence: overall,
                gated: true,
                gated_reason: Some("evaluated_above_threshold".to_string()),
                candidates: None,
                chosen_index: None,
                artifacts: LayerArtifacts::Terminology {
                    term_table,
                    evaluation,
                },
            });
        }

        let issues: Vec<String> = evaluation
            .as_ref()
            .map(|e| e.issues.clone())
            .unwrap_or_default();

        let outcome = run_with_selection(self.llm, config, layer, pair, source, |temperature| {
            let table = term_table.clone();
            let issues = issues.clone();
            async move {
                let draft = TermTranslateAgent
                    .run(self.llm, source, &table, &issues, pair, temperature)
                    .await?;
                Ok(GeneratedDraft {
                    translation: draft.translation,
                    confidence: draft.confidence,
                    overrides: Vec::new(),
                })
            }
        })
        .await
        .map_err(|e| layer_failure(layer, e))?;

        Ok(LayerOutput {
            layer,
            translation: outcome.draft.translation,
            confidence: outcome.draft.confidence,
            gated: false,
            gated_reason: None,
            candidates: outcome.candidates,
            chosen_index: outcome.chosen_index,
            artifacts: LayerArtifacts::Terminology {
                term_table,
                evaluation,
            },
        })
    }

    /// Build the term table from the extracted terms via layered lookup.
    /// Terms with zero database hits are marked needs-translation.
    async fn build_term_table(
        &self,
        extracted: &[crate::agents::terminology::ExtractedTerm],
        pair: LanguagePair,
        config: &ControlConfig,
    ) -> Result<TermTable> {
        let mut rows = Vec::new();

        for term in extracted {
            let hits = match (config.use_termbase, self.termbase) {
                (true, Some(store)) => {
                    store.lookup(&term.term, pair, LOOKUP_K, self.vector).await?
                }
                _ => Vec::new(),
            };

            let mut candidates: Vec<TermCandidate> = Vec::new();
            for hit in &hits {
                if candidates.iter().any(|c| c.target == hit.entry.target_form) {
                    continue;
                }
                candidates.push(TermCandidate {
                    target: hit.entry.target_form.clone(),
                    confidence: hit.entry.confidence,
                    origin: hit.origin,
                });
            }

            rows.push(TermTableRow {
                source_term: term.term.clone(),
                importance: term.importance,
                needs_translation: candidates.is_empty(),
                candidates,
            });
        }

        tracing::debug!(
            extracted = extracted.len(),
            with_candidates = rows.iter().filter(|r| !r.needs_translation).count(),
            "Term table built"
        );
        Ok(TermTable { rows })
    }
}
