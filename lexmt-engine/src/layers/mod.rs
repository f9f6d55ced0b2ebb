//! Refinement layers
//!
//! Each layer runs an extract -> evaluate -> re-translate loop and emits a
//! [`LayerOutput`]. Gating and candidate selection are shared policy,
//! implemented here once.

pub mod discourse;
pub mod syntax;
pub mod terminology;

use crate::agents::selector::SelectorAgent;
use crate::clients::llm::CANDIDATE_TEMPERATURE;
use crate::clients::LlmClient;
use futures::future::try_join_all;
use lexmt_common::types::{Candidate, ControlConfig, LanguagePair, LayerKind};
use lexmt_common::{Error, Result};
use std::future::Future;

/// One generated draft, selection-agnostic
#[derive(Debug, Clone)]
pub(crate) struct GeneratedDraft {
    pub translation: String,
    pub confidence: f64,
    /// Term-choice overrides (syntax layer only)
    pub overrides: Vec<String>,
}

/// Result of the generate-and-maybe-select step
#[derive(Debug, Clone)]
pub(crate) struct SelectionOutcome {
    pub draft: GeneratedDraft,
    pub candidates: Option<Vec<Candidate>>,
    pub chosen_index: Option<usize>,
}

/// True when this layer should skip its re-translation step
pub(crate) fn should_gate(config: &ControlConfig, layer: LayerKind, overall: f64) -> bool {
    config.gating_enabled(layer) && overall >= config.gating_thresholds.for_layer(layer)
}

/// Map an agent error into this layer's failure
pub(crate) fn layer_failure(layer: LayerKind, err: Error) -> Error {
    match err {
        Error::UpstreamUnavailable(_) => err,
        other => Error::LayerFailure {
            layer: layer.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Run the layer's translate step, generating `num_candidates` drafts and
/// selecting one when selection is enabled for the layer.
///
/// `generate` receives the temperature override: `None` for the single-shot
/// path, a raised temperature when producing candidates for selection.
pub(crate) async fn run_with_selection<F, Fut>(
    llm: &LlmClient,
    config: &ControlConfig,
    layer: LayerKind,
    pair: LanguagePair,
    source: &str,
    generate: F,
) -> Result<SelectionOutcome>
where
    F: Fn(Option<f64>) -> Fut,
    Fut: Future<Output = Result<GeneratedDraft>>,
{
    if !config.selection_enabled(layer) {
        let draft = generate(None).await?;
        return Ok(SelectionOutcome {
            draft,
            candidates: None,
            chosen_index: None,
        });
    }

    let n = config.num_candidates.max(1);
    if n == 1 {
        let draft = generate(None).await?;
        let candidates = vec![Candidate {
            text: draft.translation.clone(),
            rank: 0,
            rationale: Some("single_candidate".to_string()),
        }];
        return Ok(SelectionOutcome {
            draft,
            candidates: Some(candidates),
            chosen_index: Some(0),
        });
    }

    // Candidates generate concurrently at raised temperature
    let drafts: Vec<GeneratedDraft> =
        try_join_all((0..n).map(|_| generate(Some(CANDIDATE_TEMPERATURE)))).await?;

    let texts: Vec<String> = drafts.iter().map(|d| d.translation.clone()).collect();
    let verdict = SelectorAgent.run(llm, source, &texts, layer, pair).await?;

    // Rank candidates by selector score, chosen first on ties
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| {
        let score_a = verdict.scores.get(*a).copied().unwrap_or(0.0);
        let score_b = verdict.scores.get(*b).copied().unwrap_or(0.0);
        (*a != verdict.chosen_index)
            .cmp(&(*b != verdict.chosen_index))
            .then(score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal))
    });
    let ranks: Vec<usize> = {
        let mut ranks = vec![0usize; n];
        for (rank, idx) in order.iter().enumerate() {
            ranks[*idx] = rank;
        }
        ranks
    };

    let candidates: Vec<Candidate> = drafts
        .iter()
        .enumerate()
        .map(|(idx, draft)| Candidate {
            text: draft.translation.clone(),
            rank: ranks[idx],
            rationale: (idx == verdict.chosen_index).then(|| verdict.rationale.clone()),
        })
        .collect();

    let chosen = drafts
        .into_iter()
        .nth(verdict.chosen_index)
        .expect("selector index validated against candidate count");

    tracing::debug!(
        layer = %layer,
        chosen_index = verdict.chosen_index,
        candidates = n,
        "Candidate selected"
    );

    Ok(SelectionOutcome {
        draft: chosen,
        candidates: Some(candidates),
        chosen_index: Some(verdict.chosen_index),
    })
}
