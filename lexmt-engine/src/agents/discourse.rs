//! Discourse-layer agents: divergence analysis against TM references and
//! conservative style-aligned revision

use super::{clamp_score, run_agent_json, AgentSpec};
use crate::agents::terminology::Draft;
use crate::clients::llm::{EVAL_TEMPERATURE, TRANSLATE_TEMPERATURE};
use crate::clients::LlmClient;
use lexmt_common::types::{DivergenceReport, LanguagePair, TmReference};
use lexmt_common::{Error, Result};

const EVALUATE_SPEC: AgentSpec = AgentSpec {
    name: "discourse:evaluate",
    role: "legal translation reviewer",
    domain: "legal",
    specialty: "divergence analysis against reference translations",
};

const REVISE_SPEC: AgentSpec = AgentSpec {
    name: "discourse:revise",
    role: "professional legal translator",
    domain: "legal",
    specialty: "style-aligned conservative revision",
};

fn render_references(references: &[TmReference]) -> String {
    let mut out = String::new();
    for (idx, reference) in references.iter().enumerate() {
        out.push_str(&format!(
            "{}. (similarity {:.2})\n   source: {}\n   target: {}\n",
            idx + 1,
            reference.similarity,
            reference.source_text,
            reference.target_text
        ));
    }
    out
}

/// Compares the current translation to TM references along terminology,
/// syntax, and style axes
#[derive(Default)]
pub struct DiscourseEvaluateAgent;

impl DiscourseEvaluateAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        translation: &str,
        references: &[TmReference],
        pair: LanguagePair,
    ) -> Result<DivergenceReport> {
        let schema = r#"{"term_consistency": 0.9, "syntactic_alignment": 0.9, "style_alignment": 0.9, "overall": 0.9, "divergences": ["..."]}"#;
        let system = EVALUATE_SPEC.system_prompt(Some(pair), schema);
        let user = format!(
            "Compare the translation to these reference translations of similar \
             segments.\n\nSource:\n{source}\n\nTranslation:\n{translation}\n\n\
             References:\n{}\nScore term_consistency, syntactic_alignment, and \
             style_alignment in [0,1], plus overall. List each divergence as a \
             concrete token- or clause-level difference.",
            render_references(references)
        );

        let mut report: DivergenceReport =
            run_agent_json(llm, &EVALUATE_SPEC, system, user, EVAL_TEMPERATURE).await?;
        report.term_consistency = clamp_score(report.term_consistency);
        report.syntactic_alignment = clamp_score(report.syntactic_alignment);
        report.style_alignment = clamp_score(report.style_alignment);
        report.overall = clamp_score(report.overall);
        Ok(report)
    }
}

/// Produces the final revision. Conservative by construction: only items in
/// the divergence report may change; free paraphrasing measurably hurts
/// n-gram metrics downstream.
#[derive(Default)]
pub struct DiscourseReviseAgent;

impl DiscourseReviseAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        translation: &str,
        references: &[TmReference],
        report: &DivergenceReport,
        pair: LanguagePair,
        temperature: Option<f64>,
    ) -> Result<Draft> {
        let schema = r#"{"translation": "...", "confidence": 0.9}"#;
        let system = REVISE_SPEC.system_prompt(Some(pair), schema);

        let mut user = format!(
            "Revise this translation to align with the reference style.\n\n\
             Source:\n{source}\n\nCurrent translation:\n{translation}\n\n\
             References:\n{}\n",
            render_references(references)
        );
        user.push_str("Address only these divergences; change nothing else and do not paraphrase:\n");
        if report.divergences.is_empty() {
            user.push_str("- (none; return the current translation unchanged)\n");
        }
        for divergence in &report.divergences {
            user.push_str(&format!("- {divergence}\n"));
        }

        let draft: Draft = run_agent_json(
            llm,
            &REVISE_SPEC,
            system,
            user,
            temperature.unwrap_or(TRANSLATE_TEMPERATURE),
        )
        .await?;

        if draft.translation.trim().is_empty() {
            return Err(Error::EmptyResult(REVISE_SPEC.name.to_string()));
        }
        Ok(Draft {
            confidence: clamp_score(draft.confidence),
            ..draft
        })
    }
}
