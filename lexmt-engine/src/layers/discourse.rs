//! Discourse layer
//!
//! Retrieve TM references for the source, analyze divergences between the
//! prior translation and the references, and produce a conservative final
//! revision. References below the similarity floor are discarded even when
//! that leaves zero; with no references the stage is a no-op.

use super::{layer_failure, run_with_selection, should_gate, GeneratedDraft};
use crate::agents::discourse::{DiscourseEvaluateAgent, DiscourseReviseAgent};
use crate::clients::LlmClient;
use crate::tm::{TmIndex, DEFAULT_ALPHA};
use lexmt_common::types::{
    ControlConfig, DivergenceReport, LanguagePair, LayerArtifacts, LayerKind, LayerOutput,
    TmReference,
};
use lexmt_common::Result;

/// TM hits retrieved per query
const QUERY_K: usize = 5;
/// References kept after the floor filter
const MAX_REFERENCES: usize = 3;

pub struct DiscourseLayer<'a> {
    pub llm: &'a LlmClient,
    pub tm: Option<&'a TmIndex>,
}

impl DiscourseLayer<'_> {
    pub async fn run(
        &self,
        source: &str,
        prior: &str,
        pair: LanguagePair,
        config: &ControlConfig,
    ) -> Result<LayerOutput> {
        let layer = LayerKind::Discourse;

        let references = self.query_references(source, config).await?;

        if references.is_empty() {
            tracing::info!("No TM references above the floor, discourse layer is a no-op");
            return Ok(LayerOutput {
                layer,
                translation: prior.to_string(),
                confidence: 1.0,
                gated: true,
                gated_reason: Some("no_references".to_string()),
                candidates: None,
                chosen_index: None,
                artifacts: LayerArtifacts::Discourse {
                    references,
                    report: None,
                },
            });
        }

        let report: Option<DivergenceReport> = match DiscourseEvaluateAgent
            .run(self.llm, source, prior, &references, pair)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "Divergence analysis failed, forcing revision");
                None
            }
        };
        let overall = report.as_ref().map(|r| r.overall).unwrap_or(0.0);

        if should_gate(config, layer, overall) {
            tracing::info!(score = overall, "Discourse layer gated");
            return Ok(LayerOutput {
                layer,
                translation: prior.to_string(),
                confidence: overall,
                gated: true,
                gated_reason: Some("evaluated_above_threshold".to_string()),
                candidates: None,
                chosen_index: None,
                artifacts: LayerArtifacts::Discourse {
                    references,
                    report,
                },
            });
        }

        let effective_report = report.clone().unwrap_or(DivergenceReport {
            term_consistency: 0.0,
            syntactic_alignment: 0.0,
            style_alignment: 0.0,
            overall: 0.0,
            divergences: Vec::new(),
        });

        let outcome = run_with_selection(self.llm, config, layer, pair, source, |temperature| {
            let references = references.clone();
            let report = effective_report.clone();
            async move {
                let draft = DiscourseReviseAgent
                    .run(
                        self.llm,
                        source,
                        prior,
                        &references,
                        &report,
                        pair,
                        temperature,
                    )
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
            artifacts: LayerArtifacts::Discourse {
                references,
                report,
            },
        })
    }

    /// Hybrid TM retrieval with the similarity floor applied. Hits below the
    /// floor are discarded even if that leaves zero references.
    async fn query_references(
        &self,
        source: &str,
        config: &ControlConfig,
    ) -> Result<Vec<TmReference>> {
        let Some(tm) = self.tm.filter(|_| config.use_tm) else {
            return Ok(Vec::new());
        };

        let hits = tm
            .search(source, QUERY_K, DEFAULT_ALPHA, Some(config.tm_floor))
            .await?;

        Ok(hits
            .into_iter()
            .take(MAX_REFERENCES)
            .map(|hit| TmReference {
                source_text: hit.entry.source_text,
                target_text: hit.entry.target_text,
                similarity: hit.score,
            })
            .collect())
    }
}
