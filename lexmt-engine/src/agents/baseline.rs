//! Direct-LLM baseline translation
//!
//! Used when no refinement layers are enabled, and as the carried-forward
//! value when the terminology layer gates.

use super::{clamp_score, run_agent_json, AgentSpec};
use crate::agents::terminology::Draft;
use crate::clients::llm::TRANSLATE_TEMPERATURE;
use crate::clients::LlmClient;
use lexmt_common::types::LanguagePair;
use lexmt_common::{Error, Result};

const BASELINE_SPEC: AgentSpec = AgentSpec {
    name: "baseline:translate",
    role: "professional legal translator",
    domain: "legal",
    specialty: "direct translation",
};

#[derive(Default)]
pub struct BaselineTranslateAgent;

impl BaselineTranslateAgent {
    pub async fn run(&self, llm: &LlmClient, source: &str, pair: LanguagePair) -> Result<Draft> {
        if source.trim().is_empty() {
            return Err(Error::InputInvalid("source text is empty".to_string()));
        }

        let schema = r#"{"translation": "...", "confidence": 0.9}"#;
        let system = BASELINE_SPEC.system_prompt(Some(pair), schema);
        let user = format!(
            "Translate this legal text from {} to {}. Preserve legal terminology, \
             modality, and register.\n\n{source}",
            pair.src, pair.tgt
        );

        let draft: Draft =
            run_agent_json(llm, &BASELINE_SPEC, system, user, TRANSLATE_TEMPERATURE).await?;
        if draft.translation.trim().is_empty() {
            return Err(Error::EmptyResult(BASELINE_SPEC.name.to_string()));
        }
        Ok(Draft {
            confidence: clamp_score(draft.confidence),
            ..draft
        })
    }
}
