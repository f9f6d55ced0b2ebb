//! Metric suite
//!
//! Every metric is a total function from (source, prediction, reference,
//! pair) to a scalar; NaN is reserved for "not computable" (missing
//! reference, unsupported pair, unconfigured scorer). Linear metrics are
//! averaged per sample into the aggregate; corpus BLEU and chrF are
//! recomputed on pooled statistics.

pub mod bleu;
pub mod chrf;
pub mod domain;
pub mod gemba;
pub mod remote;

use lexmt_common::types::{LanguagePair, TermTable};
use lexmt_common::{Error, Result};
use lexmt_engine::LlmClient;
use remote::{RemoteMetric, ScoringClient};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// The selectable metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Bleu,
    Chrf,
    BertScore,
    Comet,
    GembaDa,
    GembaMqm,
    TermbaseAccuracy,
    Deontic,
    Conditional,
}

impl MetricKind {
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Bleu => "bleu",
            MetricKind::Chrf => "chrf",
            MetricKind::BertScore => "bertscore",
            MetricKind::Comet => "comet",
            MetricKind::GembaDa => "gemba-da",
            MetricKind::GembaMqm => "gemba-mqm",
            MetricKind::TermbaseAccuracy => "termbase_accuracy",
            MetricKind::Deontic => "deontic",
            MetricKind::Conditional => "conditional",
        }
    }

    /// Default subset: {bleu, chrf, comet}
    pub fn default_set() -> Vec<MetricKind> {
        vec![MetricKind::Bleu, MetricKind::Chrf, MetricKind::Comet]
    }

    pub fn parse_set(raw: &str) -> Result<Vec<MetricKind>> {
        raw.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.trim().parse())
            .collect()
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bleu" => Ok(MetricKind::Bleu),
            "chrf" | "chrf++" => Ok(MetricKind::Chrf),
            "bertscore" => Ok(MetricKind::BertScore),
            "comet" => Ok(MetricKind::Comet),
            "gemba-da" => Ok(MetricKind::GembaDa),
            "gemba-mqm" => Ok(MetricKind::GembaMqm),
            "termbase_accuracy" => Ok(MetricKind::TermbaseAccuracy),
            "deontic" => Ok(MetricKind::Deontic),
            "conditional" => Ok(MetricKind::Conditional),
            other => Err(Error::Config(format!("unknown metric: {other}"))),
        }
    }
}

/// One sample to score
pub struct SampleInputs<'a> {
    pub source: &'a str,
    pub prediction: &'a str,
    pub reference: Option<&'a str>,
    pub pair: LanguagePair,
    pub term_table: Option<&'a TermTable>,
}

/// Configured metric computation
pub struct MetricSuite {
    kinds: Vec<MetricKind>,
    llm: Option<Arc<LlmClient>>,
    scoring: Option<ScoringClient>,
}

impl MetricSuite {
    pub fn new(kinds: Vec<MetricKind>) -> Self {
        Self {
            kinds,
            llm: None,
            scoring: None,
        }
    }

    /// Attach the LLM client used by the GEMBA judges.
    pub fn with_llm(mut self, llm: Arc<LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attach the remote scoring service for COMET / BERTScore.
    pub fn with_scoring(mut self, scoring: ScoringClient) -> Self {
        self.scoring = Some(scoring);
        self
    }

    pub fn kinds(&self) -> &[MetricKind] {
        &self.kinds
    }

    /// Score one sample. Metric failures degrade to NaN with a warning;
    /// scoring never fails a segment.
    pub async fn score_sample(&self, inputs: &SampleInputs<'_>) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        for kind in &self.kinds {
            let value = self.compute(*kind, inputs).await;
            scores.insert(kind.name().to_string(), value);
        }
        scores
    }

    async fn compute(&self, kind: MetricKind, inputs: &SampleInputs<'_>) -> f64 {
        match kind {
            MetricKind::Bleu => match inputs.reference {
                Some(reference) => bleu::sentence_bleu(inputs.prediction, reference),
                None => f64::NAN,
            },
            MetricKind::Chrf => match inputs.reference {
                Some(reference) => chrf::sentence_chrf(inputs.prediction, reference),
                None => f64::NAN,
            },
            MetricKind::TermbaseAccuracy => match inputs.term_table {
                Some(table) => domain::termbase_accuracy(inputs.source, inputs.prediction, table),
                None => f64::NAN,
            },
            MetricKind::Deontic => {
                domain::deontic_preservation(inputs.source, inputs.prediction, inputs.pair)
            }
            MetricKind::Conditional => {
                domain::conditional_logic(inputs.source, inputs.prediction, inputs.pair)
            }
            MetricKind::GembaDa => match &self.llm {
                Some(llm) => gemba::gemba_da(
                    llm,
                    inputs.source,
                    inputs.prediction,
                    inputs.reference,
                    inputs.pair,
                )
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "GEMBA-DA scoring failed");
                    f64::NAN
                }),
                None => f64::NAN,
            },
            MetricKind::GembaMqm => match &self.llm {
                Some(llm) => gemba::gemba_mqm(llm, inputs.source, inputs.prediction, inputs.pair)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "GEMBA-MQM scoring failed");
                        f64::NAN
                    }),
                None => f64::NAN,
            },
            MetricKind::Comet | MetricKind::BertScore => {
                let remote = if kind == MetricKind::Comet {
                    RemoteMetric::Comet
                } else {
                    RemoteMetric::BertScore
                };
                match &self.scoring {
                    Some(scoring) => scoring
                        .score(
                            remote,
                            inputs.source,
                            inputs.prediction,
                            inputs.reference,
                            inputs.pair,
                        )
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, metric = kind.name(), "Remote scoring failed");
                            f64::NAN
                        }),
                    None => f64::NAN,
                }
            }
        }
    }

    /// Aggregate per-sample scores. Linear metrics average over the finite
    /// values; corpus BLEU and chrF come from pooled statistics over the
    /// pairs with references.
    pub fn aggregate(
        &self,
        per_sample: &[BTreeMap<String, f64>],
        pairs: &[(String, Option<String>)],
    ) -> BTreeMap<String, f64> {
        let mut aggregate = BTreeMap::new();

        for kind in &self.kinds {
            let values: Vec<f64> = per_sample
                .iter()
                .filter_map(|scores| scores.get(kind.name()))
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            let mean = if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            aggregate.insert(format!("{}_mean", kind.name()), mean);
        }

        let referenced: Vec<(&str, &str)> = pairs
            .iter()
            .filter_map(|(prediction, reference)| {
                reference
                    .as_deref()
                    .map(|r| (prediction.as_str(), r))
            })
            .collect();
        if self.kinds.contains(&MetricKind::Bleu) {
            aggregate.insert(
                "bleu_corpus".to_string(),
                bleu::corpus_bleu(referenced.iter().copied()),
            );
        }
        if self.kinds.contains(&MetricKind::Chrf) {
            aggregate.insert(
                "chrf_corpus".to_string(),
                chrf::corpus_chrf(referenced.iter().copied()),
            );
        }

        aggregate
    }
}
