//! GEMBA metrics: LLM-as-judge quality estimation
//!
//! GEMBA-DA asks for a single direct-assessment score; GEMBA-MQM asks for
//! an MQM error inventory and converts the weighted penalty to a score.
//! Both are one call per sample through the shared LLM client.

use lexmt_common::types::LanguagePair;
use lexmt_common::Result;
use lexmt_engine::clients::llm::EVAL_TEMPERATURE;
use lexmt_engine::{ChatMessage, LlmClient};
use serde::Deserialize;

#[derive(Deserialize)]
struct DaReply {
    score: f64,
}

#[derive(Deserialize, Default)]
struct MqmReply {
    #[serde(default)]
    critical: u32,
    #[serde(default)]
    major: u32,
    #[serde(default)]
    minor: u32,
}

fn judge_preamble(pair: LanguagePair) -> String {
    format!(
        "You are an expert translation quality assessor for {} to {} legal text. \
         Reply with a single JSON object and nothing else.",
        pair.src, pair.tgt
    )
}

/// GEMBA-DA: direct assessment 0-100, normalized to [0,1]
pub async fn gemba_da(
    llm: &LlmClient,
    source: &str,
    prediction: &str,
    reference: Option<&str>,
    pair: LanguagePair,
) -> Result<f64> {
    let mut user = format!(
        "Score the translation quality from 0 (nonsense) to 100 (perfect).\n\n\
         Source:\n{source}\n\nTranslation:\n{prediction}\n"
    );
    if let Some(reference) = reference {
        user.push_str(&format!("\nReference:\n{reference}\n"));
    }
    user.push_str("\nRequired shape: {\"score\": 87}");

    let messages = vec![
        ChatMessage::system(judge_preamble(pair)),
        ChatMessage::user(user),
    ];
    let reply: DaReply = llm.complete_json(messages, EVAL_TEMPERATURE, None).await?;
    Ok((reply.score / 100.0).clamp(0.0, 1.0))
}

/// GEMBA-MQM: error counts weighted 25/5/1, penalty capped at 25, mapped
/// to [0,1]
pub async fn gemba_mqm(
    llm: &LlmClient,
    source: &str,
    prediction: &str,
    pair: LanguagePair,
) -> Result<f64> {
    let user = format!(
        "Count the MQM errors in this translation by severity.\n\n\
         Source:\n{source}\n\nTranslation:\n{prediction}\n\n\
         Required shape: {{\"critical\": 0, \"major\": 1, \"minor\": 2}}"
    );

    let messages = vec![
        ChatMessage::system(judge_preamble(pair)),
        ChatMessage::user(user),
    ];
    let reply: MqmReply = llm.complete_json(messages, EVAL_TEMPERATURE, None).await?;
    Ok(mqm_score(reply.critical, reply.major, reply.minor))
}

/// Weighted penalty mapped to a score: 25 per critical, 5 per major, 1 per
/// minor, capped at 25.
pub fn mqm_score(critical: u32, major: u32, minor: u32) -> f64 {
    let penalty = (25 * critical + 5 * major + minor).min(25) as f64;
    1.0 - penalty / 25.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mqm_score_weights_and_caps() {
        assert_eq!(mqm_score(0, 0, 0), 1.0);
        assert!((mqm_score(0, 1, 0) - 0.8).abs() < 1e-9);
        assert!((mqm_score(0, 0, 5) - 0.8).abs() < 1e-9);
        assert_eq!(mqm_score(1, 0, 0), 0.0);
        assert_eq!(mqm_score(3, 10, 99), 0.0);
    }
}
