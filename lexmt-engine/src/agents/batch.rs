//! Batch term translation for preprocessing
//!
//! One LLM call translates a whole batch of terms (with their example
//! contexts) and returns a JSON map. Batching amortizes per-term cost
//! across the dataset.

use super::{run_agent_json, AgentSpec};
use crate::clients::llm::TRANSLATE_TEMPERATURE;
use crate::clients::LlmClient;
use lexmt_common::types::LanguagePair;
use lexmt_common::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Maximum terms per batch-translate call
pub const BATCH_SIZE: usize = 20;

const BATCH_SPEC: AgentSpec = AgentSpec {
    name: "terminology:batch-translate",
    role: "professional legal translator",
    domain: "legal",
    specialty: "glossary translation",
};

/// A term to translate plus its example contexts
#[derive(Debug, Clone)]
pub struct BatchTerm {
    pub term: String,
    pub contexts: Vec<String>,
}

#[derive(Deserialize)]
struct BatchReply {
    translations: HashMap<String, String>,
}

#[derive(Default)]
pub struct BatchTermTranslateAgent;

impl BatchTermTranslateAgent {
    /// Translate one batch of up to [`BATCH_SIZE`] terms.
    pub async fn run(
        &self,
        llm: &LlmClient,
        terms: &[BatchTerm],
        pair: LanguagePair,
    ) -> Result<HashMap<String, String>> {
        if terms.is_empty() {
            return Ok(HashMap::new());
        }
        if terms.len() > BATCH_SIZE {
            return Err(Error::InputInvalid(format!(
                "batch of {} exceeds limit {BATCH_SIZE}",
                terms.len()
            )));
        }

        let schema = r#"{"translations": {"<source term>": "<target term>"}}"#;
        let system = BATCH_SPEC.system_prompt(Some(pair), schema);

        let mut user = format!(
            "Translate each legal term from {} to {}. Use the contexts to \
             disambiguate. Return one target form per term, keyed by the exact \
             source term.\n\nTerms:\n",
            pair.src, pair.tgt
        );
        for item in terms {
            user.push_str(&format!("- {}\n", item.term));
            for context in item.contexts.iter().take(2) {
                user.push_str(&format!("  context: {context}\n"));
            }
        }

        let reply: BatchReply =
            run_agent_json(llm, &BATCH_SPEC, system, user, TRANSLATE_TEMPERATURE).await?;

        let translations: HashMap<String, String> = reply
            .translations
            .into_iter()
            .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .collect();

        if translations.is_empty() {
            return Err(Error::EmptyResult(BATCH_SPEC.name.to_string()));
        }
        Ok(translations)
    }
}
