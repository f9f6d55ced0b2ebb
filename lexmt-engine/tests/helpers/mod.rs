//! Shared test infrastructure: scripted chat backends and canned agent
//! replies keyed off each agent's system prompt.
#![allow(dead_code)]

use async_trait::async_trait;
use lexmt_common::Result;
use lexmt_engine::{ChatBackend, ChatRequest, LlmClient};
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

/// Backend driven by a closure over (system prompt, user prompt)
pub struct ScriptedAgents {
    responder: Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ChatBackend for ScriptedAgents {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let system = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let user = request
            .messages
            .get(1)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        (self.responder)(system, user)
    }
}

/// Build a scripted backend plus a client with a small concurrency cap
pub fn scripted_client(
    responder: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
) -> (LlmClient, Arc<ScriptedAgents>) {
    let backend = Arc::new(ScriptedAgents {
        responder: Box::new(responder),
        calls: AtomicUsize::new(0),
    });
    let client = LlmClient::with_backend(
        backend.clone(),
        "test-model",
        4,
        1,
        Duration::from_secs(5),
    );
    (client, backend)
}

// ---- Canned agent replies ---------------------------------------------------
// Dispatch keys match each agent's specialty string in its system prompt.

pub const EXTRACT: &str = "salient term extraction";
pub const TERM_EVAL: &str = "term-table quality assessment";
pub const TERM_TRANSLATE: &str = "terminology-constrained translation";
pub const BASELINE: &str = "direct translation";
pub const PATTERN_EXTRACT: &str = "bilingual syntactic pattern analysis";
pub const SYNTAX_EVAL: &str = "syntactic fidelity assessment";
pub const SYNTAX_REVISE: &str = "syntax-targeted revision";
pub const DISCOURSE_EVAL: &str = "divergence analysis";
pub const DISCOURSE_REVISE: &str = "style-aligned conservative revision";
pub const SELECTOR: &str = "candidate translation selection";
pub const BATCH_TRANSLATE: &str = "glossary translation";

pub fn extract_reply(terms: &[(&str, f64)]) -> String {
    let terms: Vec<_> = terms
        .iter()
        .map(|(term, importance)| json!({"term": term, "importance": importance, "category": "nominal"}))
        .collect();
    json!({ "terms": terms }).to_string()
}

pub fn term_eval_reply(overall: f64) -> String {
    json!({
        "accuracy": overall, "consistency": overall, "completeness": overall,
        "overall": overall, "issues": []
    })
    .to_string()
}

pub fn draft_reply(translation: &str, confidence: f64) -> String {
    json!({ "translation": translation, "confidence": confidence }).to_string()
}

pub fn patterns_reply() -> String {
    json!({
        "patterns": [{
            "source_pattern": "享有...权利",
            "target_pattern": "shall have the right to",
            "category": "modal",
            "confidence": 0.9
        }]
    })
    .to_string()
}

pub fn syntax_eval_reply(overall: f64) -> String {
    json!({
        "modal_fidelity": overall, "connective_consistency": overall,
        "conditional_logic": overall, "voice_appropriateness": overall,
        "overall": overall, "issues": ["modal strength"]
    })
    .to_string()
}

pub fn divergence_reply(overall: f64) -> String {
    json!({
        "term_consistency": overall, "syntactic_alignment": overall,
        "style_alignment": overall, "overall": overall,
        "divergences": ["reference uses 'shall have'"]
    })
    .to_string()
}

pub fn selector_reply(chosen: usize, scores: &[f64]) -> String {
    json!({
        "chosen_index": chosen,
        "scores": scores,
        "rationale": "closest to reference style"
    })
    .to_string()
}
