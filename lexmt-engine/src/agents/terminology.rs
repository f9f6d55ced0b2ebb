//! Terminology-layer agents: extract, evaluate, translate

use super::{clamp_score, run_agent_json, AgentSpec};
use crate::clients::LlmClient;
use crate::clients::llm::{EVAL_TEMPERATURE, TRANSLATE_TEMPERATURE};
use lexmt_common::types::{LanguagePair, MatchOrigin, TermEvaluation, TermTable};
use lexmt_common::{Error, Result};
use serde::Deserialize;

/// One candidate source term from extraction
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedTerm {
    pub term: String,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub category: String,
}

#[derive(Deserialize)]
struct ExtractReply {
    #[serde(default)]
    terms: Vec<ExtractedTerm>,
}

/// First-round translation draft
#[derive(Debug, Clone, Deserialize)]
pub struct Draft {
    pub translation: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

const EXTRACT_SPEC: AgentSpec = AgentSpec {
    name: "terminology:extract",
    role: "legal terminology specialist",
    domain: "legal",
    specialty: "salient term extraction",
};

const EVALUATE_SPEC: AgentSpec = AgentSpec {
    name: "terminology:evaluate",
    role: "legal terminology reviewer",
    domain: "legal",
    specialty: "term-table quality assessment",
};

const TRANSLATE_SPEC: AgentSpec = AgentSpec {
    name: "terminology:translate",
    role: "professional legal translator",
    domain: "legal",
    specialty: "terminology-constrained translation",
};

/// Extracts legal-domain salient terms from the source segment
#[derive(Default)]
pub struct TermExtractAgent;

impl TermExtractAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        text: &str,
        pair: LanguagePair,
    ) -> Result<Vec<ExtractedTerm>> {
        if text.trim().is_empty() {
            return Err(Error::InputInvalid("extraction input is empty".to_string()));
        }

        let schema = r#"{"terms": [{"term": "...", "importance": 0.9, "category": "..."}]}"#;
        let system = EXTRACT_SPEC.system_prompt(Some(pair), schema);
        let user = format!(
            "Extract the salient legal terms from this text. Keep only terms that \
             need controlled translation: proper nouns, specialized legal nominals, \
             and modal or deontic anchors. Score importance in [0,1].\n\nText:\n{text}"
        );

        let reply: ExtractReply =
            run_agent_json(llm, &EXTRACT_SPEC, system, user, EVAL_TEMPERATURE).await?;

        Ok(reply
            .terms
            .into_iter()
            .filter(|t| !t.term.trim().is_empty())
            .map(|mut t| {
                t.importance = clamp_score(t.importance);
                t
            })
            .collect())
    }
}

/// Scores a term table for accuracy, consistency, and completeness
#[derive(Default)]
pub struct TermEvaluateAgent;

impl TermEvaluateAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        table: &TermTable,
        pair: LanguagePair,
    ) -> Result<TermEvaluation> {
        let schema = r#"{"accuracy": 0.9, "consistency": 0.9, "completeness": 0.9, "overall": 0.9, "issues": ["..."]}"#;
        let system = EVALUATE_SPEC.system_prompt(Some(pair), schema);
        let user = format!(
            "Source text:\n{source}\n\nTerm table:\n{}\n\nScore the table in [0,1] on \
             accuracy (are the target forms correct), consistency (one target per \
             concept), and completeness (are all salient source terms covered), plus \
             an overall score. List concrete issues.",
            render_term_table(table)
        );

        let mut evaluation: TermEvaluation =
            run_agent_json(llm, &EVALUATE_SPEC, system, user, EVAL_TEMPERATURE).await?;
        evaluation.accuracy = clamp_score(evaluation.accuracy);
        evaluation.consistency = clamp_score(evaluation.consistency);
        evaluation.completeness = clamp_score(evaluation.completeness);
        evaluation.overall = clamp_score(evaluation.overall);
        Ok(evaluation)
    }
}

/// Produces the first-round translation under term-table constraints
#[derive(Default)]
pub struct TermTranslateAgent;

impl TermTranslateAgent {
    pub async fn run(
        &self,
        llm: &LlmClient,
        source: &str,
        table: &TermTable,
        issues: &[String],
        pair: LanguagePair,
        temperature: Option<f64>,
    ) -> Result<Draft> {
        let schema = r#"{"translation": "...", "confidence": 0.9}"#;
        let system = TRANSLATE_SPEC.system_prompt(Some(pair), schema);

        let mut user = format!("Translate this legal text from {} to {}.\n", pair.src, pair.tgt);
        if !table.is_empty() {
            user.push_str(&format!(
                "\nUse exactly these target forms where a term table row constrains one:\n{}\n",
                render_term_table(table)
            ));
        }
        if !issues.is_empty() {
            user.push_str("\nKnown terminology issues to avoid:\n");
            for issue in issues {
                user.push_str(&format!("- {issue}\n"));
            }
        }
        user.push_str(&format!("\nSource:\n{source}"));

        let draft: Draft = run_agent_json(
            llm,
            &TRANSLATE_SPEC,
            system,
            user,
            temperature.unwrap_or(TRANSLATE_TEMPERATURE),
        )
        .await?;

        if draft.translation.trim().is_empty() {
            return Err(Error::EmptyResult(TRANSLATE_SPEC.name.to_string()));
        }
        Ok(Draft {
            confidence: clamp_score(draft.confidence),
            ..draft
        })
    }
}

/// Render a term table for prompt inclusion, with provenance
pub fn render_term_table(table: &TermTable) -> String {
    let mut out = String::new();
    for row in &table.rows {
        if row.candidates.is_empty() {
            out.push_str(&format!("- {} => (needs translation)\n", row.source_term));
            continue;
        }
        for candidate in &row.candidates {
            let origin = match candidate.origin {
                MatchOrigin::DbExact => "db-exact",
                MatchOrigin::DbFuzzy => "db-fuzzy",
                MatchOrigin::DbVector => "db-vector",
                MatchOrigin::Llm => "llm",
            };
            out.push_str(&format!(
                "- {} => {} ({}, confidence {:.2})\n",
                row.source_term, candidate.target, origin, candidate.confidence
            ));
        }
    }
    if out.is_empty() {
        out.push_str("(empty)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_common::types::{TermCandidate, TermTableRow};

    #[test]
    fn extract_reply_parses_and_defaults() {
        let raw = r#"{"terms": [{"term": "劳动者", "importance": 0.95, "category": "nominal"},
                                  {"term": "应当"}]}"#;
        let reply: ExtractReply = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.terms.len(), 2);
        assert_eq!(reply.terms[1].importance, 0.0);
        assert_eq!(reply.terms[1].category, "");
    }

    #[test]
    fn draft_defaults_confidence() {
        let draft: Draft = serde_json::from_str(r#"{"translation": "Workers."}"#).unwrap();
        assert_eq!(draft.confidence, 0.5);
    }

    #[test]
    fn term_table_renders_provenance_and_gaps() {
        let table = TermTable {
            rows: vec![
                TermTableRow {
                    source_term: "劳动者".into(),
                    importance: 0.9,
                    candidates: vec![TermCandidate {
                        target: "worker".into(),
                        confidence: 0.95,
                        origin: MatchOrigin::DbExact,
                    }],
                    needs_translation: false,
                },
                TermTableRow {
                    source_term: "平等就业".into(),
                    importance: 0.8,
                    candidates: vec![],
                    needs_translation: true,
                },
            ],
        };
        let rendered = render_term_table(&table);
        assert!(rendered.contains("劳动者 => worker (db-exact, confidence 0.95)"));
        assert!(rendered.contains("平等就业 => (needs translation)"));
    }

    #[test]
    fn empty_term_table_renders_placeholder() {
        assert_eq!(render_term_table(&TermTable::default()), "(empty)\n");
    }
}
