//! Agent kernel
//!
//! An agent is a structured prompt, not an object hierarchy: a
//! role/domain/specialty triple that formats the system prompt, plus a
//! typed serde output schema. The kernel renders the messages, calls the
//! LLM client in JSON mode, and hands back the validated result. Schema
//! failures surface from the client as `MalformedModelOutput`; a
//! well-formed but empty payload becomes `EmptyResult` at the agent that
//! noticed it.

pub mod baseline;
pub mod batch;
pub mod discourse;
pub mod selector;
pub mod syntax;
pub mod terminology;

use crate::clients::{ChatMessage, LlmClient};
use lexmt_common::types::LanguagePair;
use lexmt_common::Result;
use serde::de::DeserializeOwned;

/// Identity of one agent, used to format its system prompt
#[derive(Debug, Clone, Copy)]
pub struct AgentSpec {
    pub name: &'static str,
    pub role: &'static str,
    pub domain: &'static str,
    pub specialty: &'static str,
}

impl AgentSpec {
    /// Render the shared system-prompt preamble. `schema` describes the
    /// exact JSON object the agent must return.
    pub fn system_prompt(&self, pair: Option<LanguagePair>, schema: &str) -> String {
        let mut prompt = format!(
            "You are a {role} working in the {domain} domain. Your specialty is {specialty}.",
            role = self.role,
            domain = self.domain,
            specialty = self.specialty,
        );
        if let Some(pair) = pair {
            prompt.push_str(&format!(
                " You work on {src} to {tgt} translation.",
                src = pair.src,
                tgt = pair.tgt
            ));
        }
        prompt.push_str(
            "\nReply with a single JSON object and nothing else. Required shape:\n",
        );
        prompt.push_str(schema);
        prompt
    }
}

/// Render messages and run the agent through the client in JSON mode.
pub(crate) async fn run_agent_json<T: DeserializeOwned>(
    llm: &LlmClient,
    spec: &AgentSpec,
    system: String,
    user: String,
    temperature: f64,
) -> Result<T> {
    tracing::debug!(agent = spec.name, "Invoking agent");
    let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
    let result = llm.complete_json(messages, temperature, None).await;
    if let Err(ref e) = result {
        tracing::warn!(agent = spec.name, error = %e, "Agent call failed");
    }
    result
}

/// Clamp a model-reported score into [0,1]
pub(crate) fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_carries_identity_and_schema() {
        let spec = AgentSpec {
            name: "probe",
            role: "legal translator",
            domain: "legal",
            specialty: "terminology extraction",
        };
        let prompt = spec.system_prompt(Some(LanguagePair::zh_en()), r#"{"x": 1}"#);
        assert!(prompt.contains("legal translator"));
        assert!(prompt.contains("terminology extraction"));
        assert!(prompt.contains("zh to en"));
        assert!(prompt.contains(r#"{"x": 1}"#));
    }

    #[test]
    fn clamp_score_handles_out_of_range_and_nan() {
        assert_eq!(clamp_score(1.7), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
    }
}
