//! Integration tests for the experiment runner: ordering under
//! concurrency, the concurrency cap itself, intermediate extraction, and
//! failure isolation.

use async_trait::async_trait;
use lexmt_common::types::{
    AblationConfig, ControlConfig, LanguagePair, LayerKind, LayerSet, Segment,
};
use lexmt_common::{Error, Result};
use lexmt_engine::{ChatBackend, ChatRequest, LlmClient, TermStore, TmIndex};
use lexmt_eval::{ExperimentRunner, MetricKind, MetricSuite, RunOptions};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---- scripted backend -------------------------------------------------------

struct ScriptedAgents {
    responder: Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ChatBackend for ScriptedAgents {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

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
        let reply = (self.responder)(system, user);
        self.current.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

fn scripted_client(
    max_concurrent: usize,
    responder: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
) -> (Arc<LlmClient>, Arc<ScriptedAgents>) {
    let backend = Arc::new(ScriptedAgents {
        responder: Box::new(responder),
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let client = LlmClient::with_backend(
        backend.clone(),
        "test-model",
        max_concurrent,
        1,
        Duration::from_secs(5),
    );
    (Arc::new(client), backend)
}

fn draft(translation: &str) -> String {
    json!({"translation": translation, "confidence": 0.9}).to_string()
}

/// Echo-style baseline: the translation embeds the source text, which the
/// tests use to verify ordering.
fn baseline_responder(system: &str, user: &str) -> Result<String> {
    if system.contains("direct translation") {
        let source = user.rsplit("\n\n").next().unwrap_or("").trim();
        Ok(draft(&format!("T:{source}")))
    } else {
        Err(Error::Internal(format!("unexpected agent: {system}")))
    }
}

/// Full three-layer pipeline with fixed outputs
fn full_responder(system: &str, _user: &str) -> Result<String> {
    if system.contains("salient term extraction") {
        Ok(json!({"terms": [{"term": "劳动者", "importance": 0.9, "category": "nominal"}]}).to_string())
    } else if system.contains("term-table quality assessment") {
        Ok(json!({"accuracy": 0.8, "consistency": 0.8, "completeness": 0.8, "overall": 0.8, "issues": []}).to_string())
    } else if system.contains("terminology-constrained translation") {
        Ok(draft("R1 translation"))
    } else if system.contains("bilingual syntactic pattern analysis") {
        Ok(json!({"patterns": []}).to_string())
    } else if system.contains("syntactic fidelity assessment") {
        Ok(json!({"modal_fidelity": 0.7, "connective_consistency": 0.7, "conditional_logic": 0.7, "voice_appropriateness": 0.7, "overall": 0.7, "issues": []}).to_string())
    } else if system.contains("syntax-targeted revision") {
        Ok(draft("R2 translation"))
    } else if system.contains("divergence analysis") {
        Ok(json!({"term_consistency": 0.6, "syntactic_alignment": 0.6, "style_alignment": 0.6, "overall": 0.6, "divergences": ["d"]}).to_string())
    } else if system.contains("style-aligned conservative revision") {
        Ok(draft("R3 translation"))
    } else if system.contains("direct translation") {
        Ok(draft("BASELINE"))
    } else {
        Err(Error::Internal(format!("unexpected agent: {system}")))
    }
}

fn segments(n: usize) -> Vec<Segment> {
    (0..n)
        .map(|i| {
            let mut segment = Segment::new(
                format!("s-{i:03}"),
                format!("第{i}条：劳动者享有权利。"),
                LanguagePair::zh_en(),
            );
            segment.reference = Some(format!("Article {i}: workers have rights."));
            segment
        })
        .collect()
}

fn baseline_ablation(max_concurrent: usize) -> AblationConfig {
    AblationConfig::new(
        "baseline",
        ControlConfig {
            enabled_layers: Vec::new(),
            use_termbase: false,
            use_tm: false,
            max_concurrent,
            ..ControlConfig::default()
        },
    )
}

#[tokio::test]
async fn results_preserve_input_order_under_concurrency() {
    let (llm, _backend) = scripted_client(10, baseline_responder);
    let runner = ExperimentRunner::new(llm);
    let suite = MetricSuite::new(vec![MetricKind::Bleu]);

    let dataset = segments(20);
    let result = runner
        .run_ablation(&dataset, &baseline_ablation(10), &suite, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.results.len(), 20);
    for (sample, segment) in result.results.iter().zip(&dataset) {
        assert_eq!(sample.sample_id, segment.id);
        assert_eq!(sample.prediction, format!("T:{}", segment.source));
        assert!(sample.success);
    }
}

#[tokio::test]
async fn in_flight_calls_never_exceed_the_cap() {
    let cap = 5;
    let (llm, backend) = scripted_client(cap, baseline_responder);
    let runner = ExperimentRunner::new(llm);
    let suite = MetricSuite::new(vec![]);

    let dataset = segments(20);
    runner
        .run_ablation(&dataset, &baseline_ablation(cap), &suite, &RunOptions::default())
        .await
        .unwrap();

    assert!(backend.peak.load(Ordering::SeqCst) <= cap);
    assert!(backend.peak.load(Ordering::SeqCst) >= 2, "work actually overlapped");
}

#[tokio::test]
async fn intermediates_match_the_trace_layer_outputs() {
    let (llm, _backend) = scripted_client(10, full_responder);
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let tm = Arc::new(TmIndex::open(LanguagePair::zh_en(), None).unwrap());
    tm.insert("劳动者享有权利", "Workers have rights").await.unwrap();

    let runner = ExperimentRunner::new(llm).with_termbase(termbase).with_tm(tm);
    let suite = MetricSuite::new(vec![]);

    let ablation = AblationConfig::preset("full").unwrap();
    let options = RunOptions {
        save_intermediate: true,
        save_trace: true,
    };

    let result = runner
        .run_ablation(&segments(3), &ablation, &suite, &options)
        .await
        .unwrap();

    assert!(result.warnings.is_empty());
    for sample in &result.results {
        assert!(sample.success);
        let trace = sample.trace.as_ref().expect("trace saved");
        let intermediate = sample.intermediate.as_ref().expect("intermediates saved");

        assert_eq!(
            intermediate["terminology"],
            trace.output_of(LayerKind::Terminology).unwrap()
        );
        assert_eq!(
            intermediate["terminology_syntax"],
            trace.output_of(LayerKind::Syntax).unwrap()
        );
        assert_eq!(sample.prediction, "R3 translation");
    }

    // The full run modified every layer's output
    assert_eq!(result.stats.traced, 3);
    assert_eq!(result.stats.r1_to_r2_changed, 3);
    assert_eq!(result.stats.r2_to_r3_changed, 3);
}

#[tokio::test]
async fn gated_intermediate_extraction_warns() {
    let (llm, _backend) = scripted_client(10, full_responder);
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let tm = Arc::new(TmIndex::open(LanguagePair::zh_en(), None).unwrap());
    tm.insert("劳动者享有权利", "Workers have rights").await.unwrap();

    let runner = ExperimentRunner::new(llm).with_termbase(termbase).with_tm(tm);
    let suite = MetricSuite::new(vec![]);

    let mut ablation = AblationConfig::preset("full").unwrap();
    ablation.control.gating_layers = LayerSet::Layers(vec![LayerKind::Syntax]);

    let result = runner
        .run_ablation(
            &segments(1),
            &ablation,
            &suite,
            &RunOptions {
                save_intermediate: true,
                save_trace: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("syntax"));
}

#[tokio::test]
async fn one_bad_segment_does_not_abort_the_batch() {
    let (llm, _backend) = scripted_client(10, baseline_responder);
    let runner = ExperimentRunner::new(llm);
    let suite = MetricSuite::new(vec![MetricKind::Bleu]);

    let mut dataset = segments(3);
    dataset[1].source = "   ".to_string();

    let result = runner
        .run_ablation(&dataset, &baseline_ablation(10), &suite, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.results.len(), 3);
    assert!(result.results[0].success);
    assert!(!result.results[1].success);
    assert_eq!(
        result.results[1].error_kind.as_deref(),
        Some("input_invalid")
    );
    assert!(result.results[2].success);
}

#[tokio::test]
async fn cancellation_records_segments_without_partial_traces() {
    // Slow backend so cancellation lands while work is in flight
    let (llm, _backend) = scripted_client(1, move |system, user| {
        std::thread::sleep(Duration::from_millis(5));
        baseline_responder(system, user)
    });
    let runner = ExperimentRunner::new(llm);
    let suite = MetricSuite::new(vec![]);

    let token = runner.cancellation_token();
    token.cancel();

    let result = runner
        .run_ablation(&segments(4), &baseline_ablation(1), &suite, &RunOptions::default())
        .await
        .unwrap();

    for sample in &result.results {
        assert_eq!(sample.status, lexmt_engine::SegmentStatus::Cancelled);
        assert!(sample.prediction.is_empty());
    }
}
