//! Pipeline orchestrator
//!
//! Carries one segment through the enabled refinement layers in fixed
//! order as a small state machine: INIT -> LAYER_TERM -> LAYER_SYNTAX ->
//! LAYER_DISCOURSE -> DONE. A segment's layers run strictly sequentially
//! (each prompt depends on the previous translation); parallelism lives
//! across segments and across candidates inside a layer. No retries cross
//! layer boundaries: a layer failure fails the segment, carrying the last
//! successful translation into the result.

use crate::agents::baseline::BaselineTranslateAgent;
use crate::clients::LlmClient;
use crate::layers::discourse::DiscourseLayer;
use crate::layers::syntax::SyntaxLayer;
use crate::layers::terminology::TerminologyLayer;
use crate::termbase::lookup::VectorLookup;
use crate::termbase::TermStore;
use crate::tm::TmIndex;
use lexmt_common::types::{
    ControlConfig, LayerArtifacts, LayerKind, PipelineTrace, Segment, TermTable, LAYER_ORDER,
};
use lexmt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Terminal status of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Success,
    Failed,
    Skipped,
    Cancelled,
}

/// Result of one orchestrator invocation. Always carries the best-available
/// prediction; `status` says whether it is trustworthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentOutcome {
    pub segment_id: String,
    pub source: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub prediction: String,
    pub status: SegmentStatus,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub trace: PipelineTrace,
}

impl SegmentOutcome {
    pub fn success(&self) -> bool {
        self.status == SegmentStatus::Success
    }

    /// Cancelled segments carry no partial trace.
    pub fn cancelled(segment: &Segment) -> Self {
        Self {
            segment_id: segment.id.clone(),
            source: segment.source.clone(),
            reference: segment.reference.clone(),
            prediction: String::new(),
            status: SegmentStatus::Cancelled,
            error_kind: None,
            error: None,
            trace: PipelineTrace {
                baseline: None,
                layers: Vec::new(),
                final_translation: String::new(),
            },
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Layer(LayerKind),
    Done,
}

/// First enabled layer after `current`, in fixed pipeline order
fn next_state(current: State, enabled: &[LayerKind]) -> State {
    let from = match current {
        State::Init => 0,
        State::Layer(kind) => LAYER_ORDER.iter().position(|l| *l == kind).unwrap() + 1,
        State::Done => return State::Done,
    };
    LAYER_ORDER[from..]
        .iter()
        .find(|l| enabled.contains(l))
        .map(|l| State::Layer(*l))
        .unwrap_or(State::Done)
}

/// One configured translation pipeline. Read-only handles on the shared
/// retrieval stores; the control record is fixed at construction.
pub struct Translator {
    llm: Arc<LlmClient>,
    termbase: Option<Arc<TermStore>>,
    term_vector: Option<VectorLookup>,
    tm: Option<Arc<TmIndex>>,
    config: ControlConfig,
}

impl Translator {
    pub fn new(llm: Arc<LlmClient>, config: ControlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            llm,
            termbase: None,
            term_vector: None,
            tm: None,
            config,
        })
    }

    pub fn with_termbase(mut self, termbase: Arc<TermStore>) -> Self {
        self.termbase = Some(termbase);
        self
    }

    pub fn with_term_vector(mut self, vector: VectorLookup) -> Self {
        self.term_vector = Some(vector);
        self
    }

    pub fn with_tm(mut self, tm: Arc<TmIndex>) -> Self {
        self.tm = Some(tm);
        self
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Translate one segment. Infallible by design: every failure mode maps
    /// to a terminal status on the outcome.
    pub async fn translate(&self, segment: &Segment) -> SegmentOutcome {
        // Input validation happens before any model call
        if segment.source.trim().is_empty() {
            tracing::warn!(segment_id = %segment.id, "Skipping segment with empty source");
            return SegmentOutcome {
                segment_id: segment.id.clone(),
                source: segment.source.clone(),
                reference: segment.reference.clone(),
                prediction: String::new(),
                status: SegmentStatus::Skipped,
                error_kind: Some("input_invalid".to_string()),
                error: Some("empty source".to_string()),
                trace: PipelineTrace {
                    baseline: None,
                    layers: Vec::new(),
                    final_translation: String::new(),
                },
            };
        }

        match self.run_pipeline(segment).await {
            Ok((trace, prediction)) => SegmentOutcome {
                segment_id: segment.id.clone(),
                source: segment.source.clone(),
                reference: segment.reference.clone(),
                prediction,
                status: SegmentStatus::Success,
                error_kind: None,
                error: None,
                trace,
            },
            Err((err, trace, last_good)) => {
                tracing::warn!(
                    segment_id = %segment.id,
                    error = %err,
                    "Segment failed, carrying last successful translation"
                );
                SegmentOutcome {
                    segment_id: segment.id.clone(),
                    source: segment.source.clone(),
                    reference: segment.reference.clone(),
                    prediction: last_good,
                    status: SegmentStatus::Failed,
                    error_kind: Some(err.kind().to_string()),
                    error: Some(err.to_string()),
                    trace,
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        segment: &Segment,
    ) -> std::result::Result<(PipelineTrace, String), (Error, PipelineTrace, String)> {
        let pair = segment.pair;
        let source = segment.source.as_str();
        let enabled = self.config.enabled_layers.clone();

        let mut trace = PipelineTrace {
            baseline: None,
            layers: Vec::new(),
            final_translation: String::new(),
        };

        // Baseline-only path: no layers enabled
        if enabled.is_empty() {
            tracing::debug!(segment_id = %segment.id, "No layers enabled, direct translation");
            let draft = BaselineTranslateAgent
                .run(&self.llm, source, pair)
                .await
                .map_err(|e| (e, trace.clone(), source.to_string()))?;
            trace.baseline = Some(draft.translation.clone());
            trace.final_translation = draft.translation.clone();
            return Ok((trace, draft.translation));
        }

        let mut state = next_state(State::Init, &enabled);
        let mut current: Option<String> = None;
        let mut term_table = TermTable::default();

        while let State::Layer(kind) = state {
            tracing::debug!(segment_id = %segment.id, layer = %kind, "Entering layer");

            let result = match kind {
                LayerKind::Terminology => {
                    let layer = TerminologyLayer {
                        llm: self.llm.as_ref(),
                        termbase: self.termbase.as_deref(),
                        vector: self.term_vector.as_ref(),
                    };
                    layer.run(source, pair, &self.config).await
                }
                LayerKind::Syntax => {
                    let prior = current.as_deref().unwrap_or(source);
                    let layer = SyntaxLayer {
                        llm: self.llm.as_ref(),
                    };
                    layer
                        .run(source, prior, &term_table, pair, &self.config)
                        .await
                }
                LayerKind::Discourse => {
                    let prior = current.as_deref().unwrap_or(source);
                    let layer = DiscourseLayer {
                        llm: self.llm.as_ref(),
                        tm: self.tm.as_deref(),
                    };
                    layer.run(source, prior, pair, &self.config).await
                }
            };

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    let last_good = current.clone().unwrap_or_else(|| source.to_string());
                    return Err((e, trace, last_good));
                }
            };

            if let LayerArtifacts::Terminology {
                term_table: ref table,
                ..
            } = output.artifacts
            {
                term_table = table.clone();
            }
            if kind == LayerKind::Terminology && output.gated {
                trace.baseline = Some(output.translation.clone());
            }

            current = Some(output.translation.clone());
            trace.layers.push(output);
            state = next_state(state, &enabled);
        }

        let final_translation = current.unwrap_or_else(|| source.to_string());
        trace.final_translation = final_translation.clone();
        Ok((trace, final_translation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_state_walks_enabled_layers_in_order() {
        let enabled = vec![LayerKind::Terminology, LayerKind::Discourse];
        let s1 = next_state(State::Init, &enabled);
        assert_eq!(s1, State::Layer(LayerKind::Terminology));
        let s2 = next_state(s1, &enabled);
        assert_eq!(s2, State::Layer(LayerKind::Discourse));
        assert_eq!(next_state(s2, &enabled), State::Done);
    }

    #[test]
    fn next_state_skips_disabled_layers() {
        let enabled = vec![LayerKind::Syntax];
        assert_eq!(
            next_state(State::Init, &enabled),
            State::Layer(LayerKind::Syntax)
        );
    }

    #[test]
    fn next_state_with_nothing_enabled_is_done() {
        assert_eq!(next_state(State::Init, &[]), State::Done);
        assert_eq!(next_state(State::Done, &[]), State::Done);
    }
}
