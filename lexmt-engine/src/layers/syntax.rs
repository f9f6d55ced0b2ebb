//! Syntax layer
//!
//! Extract bilingual syntactic patterns, evaluate fidelity along the four
//! axes, and revise the prior translation targeting the listed issues.
//! Gating carries the prior translation forward byte-for-byte.

use super::{layer_failure, run_with_selection, should_gate, GeneratedDraft};
use crate::agents::syntax::{PatternExtractAgent, SyntaxEvaluateAgent, SyntaxReviseAgent};
use crate::clients::LlmClient;
use lexmt_common::types::{
    ControlConfig, LanguagePair, LayerArtifacts, LayerKind, LayerOutput, SyntaxEvaluation,
    TermTable,
};
use lexmt_common::Result;

pub struct SyntaxLayer<'a> {
    pub llm: &'a LlmClient,
}

impl SyntaxLayer<'_> {
    pub async fn run(
        &self,
        source: &str,
        prior: &str,
        term_table: &TermTable,
        pair: LanguagePair,
        config: &ControlConfig,
    ) -> Result<LayerOutput> {
        let layer = LayerKind::Syntax;

        let patterns = match PatternExtractAgent
            .run(self.llm, source, prior, pair)
            .await
        {
            Ok(patterns) => patterns,
            Err(e) => {
                tracing::warn!(error = %e, "Pattern extraction failed, continuing without patterns");
                Vec::new()
            }
        };

        let evaluation: Option<SyntaxEvaluation> = match SyntaxEvaluateAgent
            .run(self.llm, source, prior, &patterns, pair)
            .await
        {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                tracing::warn!(error = %e, "Syntax evaluation failed, forcing revision");
                None
            }
        };
        let overall = evaluation.as_ref().map(|e| e.overall).unwrap_or(0.0);

        if should_gate(config, layer, overall) {
            tracing::info!(score = overall, "Syntax layer gated");
            return Ok(LayerOutput {
                layer,
                translation: prior.to_string(),
                confidence: overall,
                gated: true,
                gated_reason: Some("evaluated_above_threshold".to_string()),
                candidates: None,
                chosen_index: None,
                artifacts: LayerArtifacts::Syntax {
                    patterns,
                    evaluation,
                    overrides: Vec::new(),
                },
            });
        }

        let effective_evaluation = evaluation.clone().unwrap_or(SyntaxEvaluation {
            modal_fidelity: 0.0,
            connective_consistency: 0.0,
            conditional_logic: 0.0,
            voice_appropriateness: 0.0,
            overall: 0.0,
            issues: Vec::new(),
        });

        let outcome = run_with_selection(self.llm, config, layer, pair, source, |temperature| {
            let evaluation = effective_evaluation.clone();
            async move {
                let revision = SyntaxReviseAgent
                    .run(
                        self.llm,
                        source,
                        prior,
                        &evaluation,
                        term_table,
                        pair,
                        temperature,
                    )
                    .await?;
                Ok(GeneratedDraft {
                    translation: revision.translation,
                    confidence: revision.confidence,
                    overrides: revision.overrides,
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
            artifacts: LayerArtifacts::Syntax {
                patterns,
                evaluation,
                overrides: outcome.draft.overrides,
            },
        })
    }
}
