//! Integration tests for the pipeline orchestrator: trace shape, gating,
//! candidate selection, and failure isolation.

mod helpers;

use helpers::*;
use lexmt_common::types::{
    ControlConfig, LanguagePair, LayerArtifacts, LayerKind, LayerSet, MatchOrigin, Segment,
    TermEntry,
};
use lexmt_common::{Error, Result};
use lexmt_engine::{SegmentStatus, TermStore, TmIndex, Translator};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const SOURCE: &str = "劳动者享有平等就业的权利。";
const R1: &str = "Workers enjoy the right to equal employment.";
const R2: &str = "Workers shall enjoy the right to equal employment.";
const R3: &str = "Workers shall have the right to equal employment.";

fn segment() -> Segment {
    let mut segment = Segment::new("s-1", SOURCE, LanguagePair::zh_en());
    segment.reference = Some("Workers shall have the right to equal employment.".to_string());
    segment
}

/// Responder covering the whole three-layer pipeline
fn full_pipeline_responder(system: &str, _user: &str) -> Result<String> {
    if system.contains(EXTRACT) {
        Ok(extract_reply(&[("劳动者", 0.95), ("平等就业", 0.8)]))
    } else if system.contains(TERM_EVAL) {
        Ok(term_eval_reply(0.8))
    } else if system.contains(TERM_TRANSLATE) {
        Ok(draft_reply(R1, 0.85))
    } else if system.contains(BASELINE) {
        Ok(draft_reply("BASELINE", 0.8))
    } else if system.contains(PATTERN_EXTRACT) {
        Ok(patterns_reply())
    } else if system.contains(SYNTAX_EVAL) {
        Ok(syntax_eval_reply(0.7))
    } else if system.contains(SYNTAX_REVISE) {
        Ok(draft_reply(R2, 0.9))
    } else if system.contains(DISCOURSE_EVAL) {
        Ok(divergence_reply(0.6))
    } else if system.contains(DISCOURSE_REVISE) {
        Ok(draft_reply(R3, 0.9))
    } else if system.contains(SELECTOR) {
        Ok(selector_reply(0, &[0.9, 0.6, 0.5]))
    } else {
        Err(Error::Internal(format!("unexpected agent: {system}")))
    }
}

async fn seeded_termbase() -> Arc<TermStore> {
    let store = TermStore::in_memory().await.unwrap();
    store
        .ingest(&[TermEntry {
            source_form: "劳动者".to_string(),
            target_form: "worker".to_string(),
            pair: LanguagePair::zh_en(),
            definition: None,
            domain: "legal".to_string(),
            confidence: 0.95,
            occurrence_count: 3,
            contexts: vec![],
        }])
        .await
        .unwrap();
    Arc::new(store)
}

async fn seeded_tm() -> Arc<TmIndex> {
    let tm = TmIndex::open(LanguagePair::zh_en(), None).unwrap();
    tm.insert(
        "劳动者享有平等就业的权利",
        "Workers shall have the right to equal employment",
    )
    .await
    .unwrap();
    Arc::new(tm)
}

#[tokio::test]
async fn full_pipeline_emits_ordered_trace_without_gating() {
    let (llm, _backend) = scripted_client(full_pipeline_responder);
    let translator = Translator::new(Arc::new(llm), ControlConfig::default())
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    let layers: Vec<LayerKind> = outcome.trace.layers.iter().map(|l| l.layer).collect();
    assert_eq!(
        layers,
        vec![LayerKind::Terminology, LayerKind::Syntax, LayerKind::Discourse]
    );
    assert!(outcome.trace.layers.iter().all(|l| !l.gated));
    assert!(outcome
        .trace
        .layers
        .iter()
        .all(|l| !l.translation.is_empty()));
    assert_eq!(outcome.prediction, R3);
    assert_eq!(outcome.trace.final_translation, R3);

    // Termbase lookup produced a constrained term table
    let LayerArtifacts::Terminology { term_table, .. } = &outcome.trace.layers[0].artifacts
    else {
        panic!("terminology artifacts expected");
    };
    let worker_row = term_table
        .rows
        .iter()
        .find(|r| r.source_term == "劳动者")
        .expect("劳动者 row");
    assert!(!worker_row.needs_translation);
    assert_eq!(worker_row.candidates[0].origin, MatchOrigin::DbExact);
    assert_eq!(worker_row.candidates[0].target, "worker");
}

#[tokio::test]
async fn baseline_only_run_has_no_layer_entries() {
    let (llm, _backend) = scripted_client(full_pipeline_responder);
    let config = ControlConfig {
        enabled_layers: Vec::new(),
        use_termbase: false,
        use_tm: false,
        ..ControlConfig::default()
    };
    let translator = Translator::new(Arc::new(llm), config).unwrap();

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    assert!(outcome.trace.layers.is_empty());
    assert_eq!(outcome.trace.baseline.as_deref(), Some("BASELINE"));
    assert_eq!(outcome.prediction, "BASELINE");
}

#[tokio::test]
async fn empty_source_is_skipped_without_model_calls() {
    let (llm, backend) = scripted_client(full_pipeline_responder);
    let translator = Translator::new(Arc::new(llm), ControlConfig::default()).unwrap();

    let segment = Segment::new("s-empty", "   ", LanguagePair::zh_en());
    let outcome = translator.translate(&segment).await;

    assert_eq!(outcome.status, SegmentStatus::Skipped);
    assert_eq!(outcome.error_kind.as_deref(), Some("input_invalid"));
    assert!(outcome.trace.layers.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gated_syntax_layer_carries_prior_byte_for_byte() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(SYNTAX_EVAL) {
            // Above the 0.99 threshold, so the layer must not revise
            Ok(syntax_eval_reply(0.995))
        } else {
            full_pipeline_responder(system, user)
        }
    });
    let config = ControlConfig {
        gating_layers: LayerSet::Layers(vec![LayerKind::Syntax]),
        gating_thresholds: lexmt_common::types::GatingThresholds {
            syntax: 0.99,
            ..Default::default()
        },
        ..ControlConfig::default()
    };
    let translator = Translator::new(Arc::new(llm), config)
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    let r1 = outcome.trace.output_of(LayerKind::Terminology).unwrap();
    let r2_layer = outcome
        .trace
        .layers
        .iter()
        .find(|l| l.layer == LayerKind::Syntax)
        .unwrap();
    assert!(r2_layer.gated);
    assert_eq!(
        r2_layer.gated_reason.as_deref(),
        Some("evaluated_above_threshold")
    );
    assert_eq!(r2_layer.translation, r1);
    // Discourse still runs and produces the final translation
    assert_eq!(outcome.prediction, R3);
}

#[tokio::test]
async fn below_threshold_score_does_not_gate() {
    let (llm, _backend) = scripted_client(full_pipeline_responder);
    let config = ControlConfig {
        gating_layers: LayerSet::Layers(vec![LayerKind::Syntax]),
        ..ControlConfig::default()
    };
    let translator = Translator::new(Arc::new(llm), config)
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    let r2_layer = outcome
        .trace
        .layers
        .iter()
        .find(|l| l.layer == LayerKind::Syntax)
        .unwrap();
    // Score 0.7 < threshold 0.85: revision runs
    assert!(!r2_layer.gated);
    assert_eq!(r2_layer.translation, R2);
}

#[tokio::test]
async fn candidate_selection_at_discourse_records_all_candidates() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(SELECTOR) {
            Ok(selector_reply(1, &[0.5, 0.9, 0.4]))
        } else {
            full_pipeline_responder(system, user)
        }
    });
    let config = ControlConfig {
        selection_layers: LayerSet::Last,
        num_candidates: 3,
        ..ControlConfig::default()
    };
    let translator = Translator::new(Arc::new(llm), config)
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    let r3_layer = outcome
        .trace
        .layers
        .iter()
        .find(|l| l.layer == LayerKind::Discourse)
        .unwrap();

    let candidates = r3_layer.candidates.as_ref().expect("candidates recorded");
    assert_eq!(candidates.len(), 3);
    let chosen = r3_layer.chosen_index.expect("chosen index recorded");
    assert!(chosen < 3);
    assert_eq!(r3_layer.translation, candidates[chosen].text);
    assert_eq!(candidates[chosen].rank, 0);
    assert!(candidates[chosen].rationale.is_some());
    // Earlier layers ran without selection
    assert!(outcome.trace.layers[0].candidates.is_none());
}

#[tokio::test]
async fn single_candidate_with_selector_skips_the_selector() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(SELECTOR) {
            Err(Error::Internal("selector must not be called".to_string()))
        } else {
            full_pipeline_responder(system, user)
        }
    });
    let config = ControlConfig {
        selection_layers: LayerSet::Last,
        num_candidates: 1,
        ..ControlConfig::default()
    };
    let translator = Translator::new(Arc::new(llm), config)
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    let r3_layer = outcome
        .trace
        .layers
        .iter()
        .find(|l| l.layer == LayerKind::Discourse)
        .unwrap();
    let candidates = r3_layer.candidates.as_ref().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(
        candidates[0].rationale.as_deref(),
        Some("single_candidate")
    );
    assert_eq!(r3_layer.chosen_index, Some(0));
}

#[tokio::test]
async fn discourse_without_references_is_a_no_op() {
    // No TM attached at all: zero references above the floor
    let (llm, _backend) = scripted_client(full_pipeline_responder);
    let translator = Translator::new(Arc::new(llm), ControlConfig::default())
        .unwrap()
        .with_termbase(seeded_termbase().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    let r2 = outcome.trace.output_of(LayerKind::Syntax).unwrap().to_string();
    let r3_layer = outcome
        .trace
        .layers
        .iter()
        .find(|l| l.layer == LayerKind::Discourse)
        .unwrap();
    assert!(r3_layer.gated);
    assert_eq!(r3_layer.gated_reason.as_deref(), Some("no_references"));
    assert_eq!(r3_layer.translation, r2);
    assert_eq!(outcome.prediction, r2);
}

#[tokio::test]
async fn layer_failure_fails_the_segment_with_last_good_prediction() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(SYNTAX_REVISE) {
            // Well-formed but empty: EmptyResult -> LayerFailure
            Ok(draft_reply("", 0.0))
        } else {
            full_pipeline_responder(system, user)
        }
    });
    let translator = Translator::new(Arc::new(llm), ControlConfig::default())
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Failed);
    assert_eq!(outcome.error_kind.as_deref(), Some("layer_failure"));
    // Last successful translation carried into the prediction
    assert_eq!(outcome.prediction, R1);
    // The failed layer has no trace entry; terminology does
    assert_eq!(outcome.trace.layers.len(), 1);
    assert_eq!(outcome.trace.layers[0].layer, LayerKind::Terminology);
}

#[tokio::test]
async fn evaluator_failure_forces_revision_instead_of_failing() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(SYNTAX_EVAL) {
            Err(Error::Internal("scripted evaluator failure".to_string()))
        } else {
            full_pipeline_responder(system, user)
        }
    });
    // Gating enabled for syntax: a failed evaluator means score 0, so the
    // layer must revise rather than gate
    let config = ControlConfig {
        gating_layers: LayerSet::All,
        ..ControlConfig::default()
    };
    let translator = Translator::new(Arc::new(llm), config)
        .unwrap()
        .with_termbase(seeded_termbase().await)
        .with_tm(seeded_tm().await);

    let outcome = translator.translate(&segment()).await;

    assert_eq!(outcome.status, SegmentStatus::Success);
    let r2_layer = outcome
        .trace
        .layers
        .iter()
        .find(|l| l.layer == LayerKind::Syntax)
        .unwrap();
    assert!(!r2_layer.gated);
    assert_eq!(r2_layer.translation, R2);
}
