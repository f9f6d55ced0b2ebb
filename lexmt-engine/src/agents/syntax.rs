//! Syntax-layer agents: bilingual pattern extraction, fidelity evaluation,
//! targeted revision

use super::{clamp_score, run_agent_json, AgentSpec};
use crate::clients::llm::{EVAL_TEMPERATURE, TRANSLATE_TEMPERATURE};
use crate::clients::LlmClient;
use lexmt_common::types::{LanguagePair, SyntaxEvaluation, SyntaxPattern, TermTable};
use lexmt_common::{Error, Result};
use serde::Deserialize;

use crate::agents::terminology::render_term_table;

#[derive(Deserialize)]
struct PatternReply {
    #[serde(default)]
    patterns: Vec<SyntaxPattern>,
}

/// Revised translation with explicit term-choice overrides
#[derive(Debug, Clone, Deserialize)]
pub struct Revision {
    pub translation: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Term choices changed despite the term table, each with justification
    #[serde(default)]
    pub overrides: Vec<String>,
}

fn default_confidence() -> f64 {
    0.5
}

const EXTRACT_SPEC: AgentSpec = AgentSpec {
    name: "syntax:extract",
    role: "legal linguist",
    domain: "legal",
    specialty: "bilingual syntactic pattern analysis",
};

const EVALUATE_SPEC: AgentSpec = AgentSpec {
    name: "syntax:evaluate",
    role: "legal translation reviewer",
    domain: "legal",
    specialty: "syntactic fidelity assessment",
};

const REVISE_SPEC: AgentSpec = AgentSpec {
    name: "syntax:revise",
    role: "professional legal translator",
    domain: "legal",
    specialty: "syntax-targeted revision",
};

/// Identifies bilingual syntactic patterns present or expected in the pair
#[derive(Default)]
pub struct PatternExtractAgent;

impl PatternExtractAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        translation: &str,
        pair: LanguagePair,
    ) -> Result<Vec<SyntaxPattern>> {
        let schema = r#"{"patterns": [{"source_pattern": "...", "target_pattern": "...", "category": "modal|connective|conditional|voice|nominalization|other", "confidence": 0.9}]}"#;
        let system = EXTRACT_SPEC.system_prompt(Some(pair), schema);
        let user = format!(
            "Identify the bilingual syntactic patterns in this pair: modal and \
             deontic verbs (shall/must/may/should), conditional frames \
             (where/if/when), voice choices, connectives, nominalizations.\n\n\
             Source:\n{source}\n\nTranslation:\n{translation}"
        );

        let reply: PatternReply =
            run_agent_json(llm, &EXTRACT_SPEC, system, user, EVAL_TEMPERATURE).await?;

        Ok(reply
            .patterns
            .into_iter()
            .filter(|p| !p.source_pattern.trim().is_empty())
            .map(|mut p| {
                p.confidence = clamp_score(p.confidence);
                p
            })
            .collect())
    }
}

/// Scores syntactic fidelity of the translation against the patterns
#[derive(Default)]
pub struct SyntaxEvaluateAgent;

impl SyntaxEvaluateAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        translation: &str,
        patterns: &[SyntaxPattern],
        pair: LanguagePair,
    ) -> Result<SyntaxEvaluation> {
        let schema = r#"{"modal_fidelity": 0.9, "connective_consistency": 0.9, "conditional_logic": 0.9, "voice_appropriateness": 0.9, "overall": 0.9, "issues": ["..."]}"#;
        let system = EVALUATE_SPEC.system_prompt(Some(pair), schema);

        let mut rendered = String::new();
        for p in patterns {
            rendered.push_str(&format!(
                "- [{:?}] {} => {} (confidence {:.2})\n",
                p.category, p.source_pattern, p.target_pattern, p.confidence
            ));
        }

        let user = format!(
            "Source:\n{source}\n\nTranslation:\n{translation}\n\nIdentified \
             patterns:\n{rendered}\nScore in [0,1]: modal_fidelity, \
             connective_consistency, conditional_logic preservation, \
             voice_appropriateness, and overall. Key each issue to the specific \
             span it concerns."
        );

        let mut evaluation: SyntaxEvaluation =
            run_agent_json(llm, &EVALUATE_SPEC, system, user, EVAL_TEMPERATURE).await?;
        evaluation.modal_fidelity = clamp_score(evaluation.modal_fidelity);
        evaluation.connective_consistency = clamp_score(evaluation.connective_consistency);
        evaluation.conditional_logic = clamp_score(evaluation.conditional_logic);
        evaluation.voice_appropriateness = clamp_score(evaluation.voice_appropriateness);
        evaluation.overall = clamp_score(evaluation.overall);
        Ok(evaluation)
    }
}

/// Produces a revision targeting the evaluator's issues without disturbing
/// term choices fixed by the terminology layer
#[derive(Default)]
pub struct SyntaxReviseAgent;

impl SyntaxReviseAgent {
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        translation: &str,
        evaluation: &SyntaxEvaluation,
        term_table: &TermTable,
        pair: LanguagePair,
        temperature: Option<f64>,
    ) -> Result<Revision> {
        let schema = r#"{"translation": "...", "confidence": 0.9, "overrides": ["..."]}"#;
        let system = REVISE_SPEC.system_prompt(Some(pair), schema);

        let mut user = format!(
            "Revise this translation to fix the listed syntactic issues. Keep \
             everything else unchanged.\n\nSource:\n{source}\n\nCurrent \
             translation:\n{translation}\n\nIssues:\n"
        );
        if evaluation.issues.is_empty() {
            user.push_str("- (none listed; improve modal, conditional, and voice fidelity)\n");
        }
        for issue in &evaluation.issues {
            user.push_str(&format!("- {issue}\n"));
        }
        if !term_table.is_empty() {
            user.push_str(&format!(
                "\nTerm choices below are fixed. If a syntactic fix forces a change, \
                 list it in \"overrides\" with the reason:\n{}",
                render_term_table(term_table)
            ));
        }

        let revision: Revision = run_agent_json(
            llm,
            &REVISE_SPEC,
            system,
            user,
            temperature.unwrap_or(TRANSLATE_TEMPERATURE),
        )
        .await?;

        if revision.translation.trim().is_empty() {
            return Err(Error::EmptyResult(REVISE_SPEC.name.to_string()));
        }
        Ok(Revision {
            confidence: clamp_score(revision.confidence),
            ..revision
        })
    }
}
