//! Candidate selector
//!
//! One LLM call judges N candidate translations against the stage's goal
//! and returns the chosen index with per-candidate scores and a rationale.
//! Selector failure falls back to candidate 0; a single candidate skips the
//! call entirely.

use super::{clamp_score, run_agent_json, AgentSpec};
use crate::clients::llm::EVAL_TEMPERATURE;
use crate::clients::LlmClient;
use lexmt_common::types::{LanguagePair, LayerKind};
use lexmt_common::{Error, Result};
use serde::Deserialize;

const SELECTOR_SPEC: AgentSpec = AgentSpec {
    name: "selector",
    role: "legal translation judge",
    domain: "legal",
    specialty: "candidate translation selection",
};

/// Selector outcome
#[derive(Debug, Clone)]
pub struct SelectorVerdict {
    pub chosen_index: usize,
    pub scores: Vec<f64>,
    pub rationale: String,
}

#[derive(Deserialize)]
struct SelectorReply {
    chosen_index: usize,
    #[serde(default)]
    scores: Vec<f64>,
    #[serde(default)]
    rationale: String,
}

fn layer_goal(layer: LayerKind) -> &'static str {
    match layer {
        LayerKind::Terminology => {
            "terminology control: the constrained target forms must appear exactly"
        }
        LayerKind::Syntax => {
            "syntactic fidelity: modals, conditionals, voice, and connectives must match the source"
        }
        LayerKind::Discourse => {
            "style alignment with minimal change: prefer the least-modified faithful option"
        }
    }
}

#[derive(Default)]
pub struct SelectorAgent;

impl SelectorAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        candidates: &[String],
        layer: LayerKind,
        pair: LanguagePair,
    ) -> Result<SelectorVerdict> {
        if candidates.is_empty() {
            return Err(Error::InputInvalid(
                "selector needs at least one candidate".to_string(),
            ));
        }
        if candidates.len() == 1 {
            return Ok(SelectorVerdict {
                chosen_index: 0,
                scores: vec![1.0],
                rationale: "single_candidate".to_string(),
            });
        }

        let schema =
            r#"{"chosen_index": 0, "scores": [0.9, 0.7], "rationale": "..."}"#;
        let system = SELECTOR_SPEC.system_prompt(Some(pair), schema);

        let mut user = format!(
            "Stage goal: {}.\n\nSource:\n{source}\n\nCandidates:\n",
            layer_goal(layer)
        );
        for (idx, candidate) in candidates.iter().enumerate() {
            user.push_str(&format!("[{idx}] {candidate}\n"));
        }
        user.push_str(
            "\nPick the best candidate for the stage goal. chosen_index is \
             zero-based; score every candidate in [0,1].",
        );

        match run_agent_json::<SelectorReply>(llm, &SELECTOR_SPEC, system, user, EVAL_TEMPERATURE)
            .await
        {
            Ok(reply) => {
                let chosen_index = if reply.chosen_index < candidates.len() {
                    reply.chosen_index
                } else {
                    tracing::warn!(
                        chosen = reply.chosen_index,
                        candidates = candidates.len(),
                        "Selector returned out-of-range index, using candidate 0"
                    );
                    0
                };
                let mut scores: Vec<f64> =
                    reply.scores.into_iter().map(clamp_score).collect();
                scores.resize(candidates.len(), 0.0);
                Ok(SelectorVerdict {
                    chosen_index,
                    scores,
                    rationale: reply.rationale,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Selector failed, falling back to candidate 0");
                Ok(SelectorVerdict {
                    chosen_index: 0,
                    scores: vec![0.0; candidates.len()],
                    rationale: format!("selector_failed: {e}"),
                })
            }
        }
    }
}
