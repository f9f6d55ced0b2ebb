//! Experiment runner
//!
//! Drives every segment of a dataset through the pipeline under a bounded
//! concurrency cap, restores input order on output, computes metrics, and
//! collects per-layer modification statistics. The recovery boundary is
//! the segment: one failure never aborts the batch. Cancellation aborts
//! in-flight segments, recording them without a partial trace.

use crate::metrics::{MetricSuite, SampleInputs};
use lexmt_common::types::{
    AblationConfig, ControlConfig, LayerArtifacts, LayerKind, PipelineTrace, Segment, TermTable,
};
use lexmt_common::Result;
use lexmt_engine::termbase::lookup::VectorLookup;
use lexmt_engine::{LlmClient, SegmentStatus, TermStore, TmIndex, Translator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Harness options independent of the ablation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Synthesize terminology-only and terminology+syntax result sets from
    /// the full trace
    pub save_intermediate: bool,
    /// Embed full traces in the artifact
    pub save_trace: bool,
}

/// One scored sample in input order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleResult {
    pub sample_id: String,
    pub source: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub prediction: String,
    pub status: SegmentStatus,
    pub success: bool,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    /// Layer-name -> prediction extracted from the trace
    #[serde(default)]
    pub intermediate: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub trace: Option<PipelineTrace>,
}

/// Per-layer modification and gating statistics for one ablation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModificationStats {
    pub traced: usize,
    pub r1_with_terms: usize,
    pub r1_to_r2_changed: usize,
    pub r2_to_r3_changed: usize,
    pub r1_to_r3_changed: usize,
    pub gated_per_layer: BTreeMap<String, usize>,
}

/// Everything the harness learned about one ablation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AblationResult {
    pub name: String,
    pub control: ControlConfig,
    pub results: Vec<SampleResult>,
    pub aggregate: BTreeMap<String, f64>,
    pub stats: ModificationStats,
    pub warnings: Vec<String>,
}

/// Shared-resource holder that builds a translator per ablation
pub struct ExperimentRunner {
    llm: Arc<LlmClient>,
    termbase: Option<Arc<TermStore>>,
    term_vector: Option<VectorLookup>,
    tm: Option<Arc<TmIndex>>,
    cancel: CancellationToken,
}

impl ExperimentRunner {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            termbase: None,
            term_vector: None,
            tm: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_termbase(mut self, termbase: Arc<TermStore>) -> Self {
        self.termbase = Some(termbase);
        self
    }

    pub fn with_term_vector(mut self, vector: VectorLookup) -> Self {
        self.term_vector = Some(vector);
        self
    }

    pub fn with_tm(mut self, tm: Arc<TmIndex>) -> Self {
        self.tm = Some(tm);
        self
    }

    /// Token that aborts in-flight segments when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn build_translator(&self, control: &ControlConfig) -> Result<Arc<Translator>> {
        let mut translator = Translator::new(self.llm.clone(), control.clone())?;
        if let Some(termbase) = &self.termbase {
            translator = translator.with_termbase(termbase.clone());
        }
        if let Some(vector) = &self.term_vector {
            translator = translator.with_term_vector(VectorLookup {
                embeddings: vector.embeddings.clone(),
                vector_db: vector.vector_db.clone(),
            });
        }
        if let Some(tm) = &self.tm {
            translator = translator.with_tm(tm.clone());
        }
        Ok(Arc::new(translator))
    }

    /// Run one ablation over the dataset. Results preserve dataset order
    /// regardless of completion order.
    pub async fn run_ablation(
        &self,
        segments: &[Segment],
        ablation: &AblationConfig,
        suite: &MetricSuite,
        options: &RunOptions,
    ) -> Result<AblationResult> {
        let translator = self.build_translator(&ablation.control)?;
        let semaphore = Arc::new(Semaphore::new(ablation.control.max_concurrent));

        tracing::info!(
            ablation = %ablation.name,
            samples = segments.len(),
            max_concurrent = ablation.control.max_concurrent,
            "Starting ablation"
        );

        let mut warnings = Vec::new();
        if options.save_intermediate {
            for layer in [LayerKind::Terminology, LayerKind::Syntax] {
                if ablation.control.gating_enabled(layer) {
                    let warning = format!(
                        "intermediate extraction with gating enabled on {layer} may \
                         duplicate upstream outputs"
                    );
                    tracing::warn!(ablation = %ablation.name, "{warning}");
                    warnings.push(warning);
                }
            }
        }

        // Fan out; completion order is unordered
        let mut join_set: JoinSet<(usize, lexmt_engine::SegmentOutcome)> = JoinSet::new();
        for (idx, segment) in segments.iter().enumerate() {
            let translator = translator.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let segment = segment.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => lexmt_engine::SegmentOutcome::cancelled(&segment),
                    outcome = translator.translate(&segment) => outcome,
                };
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<(usize, lexmt_engine::SegmentOutcome)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(item) => outcomes.push(item),
                Err(e) => tracing::error!(error = %e, "Segment task panicked"),
            }
        }
        // Reassemble input order by index
        outcomes.sort_by_key(|(idx, _)| *idx);

        // Score and package
        let mut results = Vec::with_capacity(outcomes.len());
        for (_, outcome) in outcomes {
            let term_table = outcome
                .trace
                .layers
                .iter()
                .find_map(|layer| match &layer.artifacts {
                    LayerArtifacts::Terminology { term_table, .. } => Some(term_table.clone()),
                    _ => None,
                });

            let metrics = if outcome.success() {
                suite
                    .score_sample(&SampleInputs {
                        source: &outcome.source,
                        prediction: &outcome.prediction,
                        reference: outcome.reference.as_deref(),
                        pair: segments
                            .iter()
                            .find(|s| s.id == outcome.segment_id)
                            .map(|s| s.pair)
                            .unwrap_or_else(lexmt_common::types::LanguagePair::zh_en),
                        term_table: term_table.as_ref(),
                    })
                    .await
            } else {
                BTreeMap::new()
            };

            let intermediate = options
                .save_intermediate
                .then(|| extract_intermediates(&outcome.trace))
                .flatten();

            results.push(SampleResult {
                sample_id: outcome.segment_id.clone(),
                source: outcome.source.clone(),
                reference: outcome.reference.clone(),
                prediction: outcome.prediction.clone(),
                status: outcome.status,
                success: outcome.success(),
                error_kind: outcome.error_kind.clone(),
                error: outcome.error.clone(),
                metrics,
                intermediate,
                trace: options.save_trace.then(|| outcome.trace.clone()),
            });
        }

        let stats = modification_stats(&results, segments, options);
        let pairs: Vec<(String, Option<String>)> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| (r.prediction.clone(), r.reference.clone()))
            .collect();
        let per_sample: Vec<BTreeMap<String, f64>> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.metrics.clone())
            .collect();
        let aggregate = suite.aggregate(&per_sample, &pairs);

        let successes = results.iter().filter(|r| r.success).count();
        tracing::info!(
            ablation = %ablation.name,
            successes,
            failures = results.len() - successes,
            "Ablation complete"
        );

        Ok(AblationResult {
            name: ablation.name.clone(),
            control: ablation.control.clone(),
            results,
            aggregate,
            stats,
            warnings,
        })
    }
}

/// Read the terminology-only and terminology+syntax predictions out of a
/// full trace without re-running the pipeline.
fn extract_intermediates(trace: &PipelineTrace) -> Option<BTreeMap<String, String>> {
    let mut intermediate = BTreeMap::new();
    if let Some(r1) = trace.output_of(LayerKind::Terminology) {
        intermediate.insert("terminology".to_string(), r1.to_string());
    }
    if let Some(r2) = trace.output_of(LayerKind::Syntax) {
        intermediate.insert("terminology_syntax".to_string(), r2.to_string());
    }
    (!intermediate.is_empty()).then_some(intermediate)
}

fn modification_stats(
    results: &[SampleResult],
    _segments: &[Segment],
    options: &RunOptions,
) -> ModificationStats {
    let mut stats = ModificationStats::default();

    for result in results {
        // Without saved traces we can still use intermediates when present
        let (r1, r2, r3, gated, term_rows) = match (&result.trace, &result.intermediate) {
            (Some(trace), _) => {
                let gated: Vec<String> = trace
                    .layers
                    .iter()
                    .filter(|l| l.gated)
                    .map(|l| l.layer.to_string())
                    .collect();
                let term_rows = trace.layers.iter().find_map(|l| match &l.artifacts {
                    LayerArtifacts::Terminology { term_table, .. } => {
                        Some(non_empty_rows(term_table))
                    }
                    _ => None,
                });
                (
                    trace.output_of(LayerKind::Terminology).map(str::to_string),
                    trace.output_of(LayerKind::Syntax).map(str::to_string),
                    trace.output_of(LayerKind::Discourse).map(str::to_string),
                    gated,
                    term_rows,
                )
            }
            (None, Some(intermediate)) if options.save_intermediate => (
                intermediate.get("terminology").cloned(),
                intermediate.get("terminology_syntax").cloned(),
                result.success.then(|| result.prediction.clone()),
                Vec::new(),
                None,
            ),
            _ => continue,
        };

        stats.traced += 1;
        if term_rows.unwrap_or(0) > 0 {
            stats.r1_with_terms += 1;
        }
        if let (Some(r1), Some(r2)) = (&r1, &r2) {
            if r1 != r2 {
                stats.r1_to_r2_changed += 1;
            }
        }
        if let (Some(r2), Some(r3)) = (&r2, &r3) {
            if r2 != r3 {
                stats.r2_to_r3_changed += 1;
            }
        }
        if let (Some(r1), Some(r3)) = (&r1, &r3) {
            if r1 != r3 {
                stats.r1_to_r3_changed += 1;
            }
        }
        for layer in gated {
            *stats.gated_per_layer.entry(layer).or_insert(0) += 1;
        }
    }

    stats
}

fn non_empty_rows(table: &TermTable) -> usize {
    table.rows.iter().filter(|r| !r.needs_translation).count()
}
