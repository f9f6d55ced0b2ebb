//! Integration tests for the offline term-preprocessing pipeline:
//! population, idempotence, and batch-failure isolation.

mod helpers;

use helpers::*;
use lexmt_common::types::{LanguagePair, Segment};
use lexmt_common::{Error, Result};
use lexmt_engine::{TermPreprocessor, TermStore};
use serde_json::json;
use std::sync::Arc;

fn corpus() -> Vec<Segment> {
    vec![
        Segment::new("s-1", "劳动者享有平等就业的权利。", LanguagePair::zh_en()),
        Segment::new(
            "s-2",
            "用人单位应当与劳动者订立劳动合同。",
            LanguagePair::zh_en(),
        ),
        Segment::new("s-3", "劳动合同依法成立。", LanguagePair::zh_en()),
    ]
}

/// Deterministic extraction per segment plus a full batch-translate map
fn preprocess_responder(system: &str, user: &str) -> Result<String> {
    if system.contains(EXTRACT) {
        if user.contains("平等就业") {
            Ok(extract_reply(&[("劳动者", 0.95), ("平等就业", 0.8)]))
        } else if user.contains("用人单位") {
            Ok(extract_reply(&[
                ("用人单位", 0.9),
                ("劳动者", 0.95),
                ("劳动合同", 0.9),
            ]))
        } else {
            Ok(extract_reply(&[("劳动合同", 0.9)]))
        }
    } else if system.contains(BATCH_TRANSLATE) {
        Ok(json!({
            "translations": {
                "劳动者": "worker",
                "平等就业": "equal employment",
                "用人单位": "employer",
                "劳动合同": "labor contract"
            }
        })
        .to_string())
    } else {
        Err(Error::Internal(format!("unexpected agent: {system}")))
    }
}

#[tokio::test]
async fn first_run_populates_the_termbase() {
    let (llm, _backend) = scripted_client(preprocess_responder);
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let preprocessor = TermPreprocessor::new(Arc::new(llm), termbase.clone(), 4);

    let report = preprocessor
        .run(&corpus(), LanguagePair::zh_en())
        .await
        .unwrap();

    assert_eq!(report.total_segments, 3);
    assert_eq!(report.unique_terms, 4);
    assert_eq!(report.db_hits, 0);
    assert_eq!(report.new_translations, 4);
    assert!(report.translation_failed.is_empty());
    assert_eq!(report.ingest_errors, 0);

    assert_eq!(termbase.count(LanguagePair::zh_en()).await.unwrap(), 4);

    let exported = termbase.export(LanguagePair::zh_en()).await.unwrap();
    let worker = exported
        .iter()
        .find(|e| e.source_form == "劳动者")
        .expect("劳动者 ingested");
    assert_eq!(worker.target_form, "worker");
    // Extracted from two segments
    assert_eq!(worker.occurrence_count, 2);
    assert!(!worker.contexts.is_empty());
}

#[tokio::test]
async fn second_run_adds_no_entries_and_doubles_counts() {
    let (llm, _backend) = scripted_client(preprocess_responder);
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let preprocessor = TermPreprocessor::new(Arc::new(llm), termbase.clone(), 4);

    preprocessor
        .run(&corpus(), LanguagePair::zh_en())
        .await
        .unwrap();
    let counts_after_first: Vec<(String, i64)> = termbase
        .export(LanguagePair::zh_en())
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.source_form, e.occurrence_count))
        .collect();

    let second = preprocessor
        .run(&corpus(), LanguagePair::zh_en())
        .await
        .unwrap();

    // Everything resolves from the database now
    assert_eq!(second.db_hits, 4);
    assert_eq!(second.new_translations, 0);

    // Structure stable, counts aggregated
    assert_eq!(termbase.count(LanguagePair::zh_en()).await.unwrap(), 4);
    for entry in termbase.export(LanguagePair::zh_en()).await.unwrap() {
        let (_, first_count) = counts_after_first
            .iter()
            .find(|(form, _)| *form == entry.source_form)
            .expect("entry existed after first run");
        assert_eq!(entry.occurrence_count, first_count * 2);
    }
}

#[tokio::test]
async fn segment_extraction_failure_logs_and_continues() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(EXTRACT) && user.contains("用人单位") {
            Err(Error::Internal("scripted extraction failure".to_string()))
        } else {
            preprocess_responder(system, user)
        }
    });
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let preprocessor = TermPreprocessor::new(Arc::new(llm), termbase.clone(), 4);

    let report = preprocessor
        .run(&corpus(), LanguagePair::zh_en())
        .await
        .unwrap();

    // s-2's terms are lost, but the run completes
    assert_eq!(report.total_segments, 3);
    assert_eq!(report.unique_terms, 3);
    assert_eq!(report.new_translations, 3);
}

#[tokio::test]
async fn batch_failure_records_terms_without_raising() {
    let (llm, backend) = scripted_client(|system, user| {
        if system.contains(BATCH_TRANSLATE) {
            Err(Error::Internal("scripted batch failure".to_string()))
        } else {
            preprocess_responder(system, user)
        }
    });
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let preprocessor = TermPreprocessor::new(Arc::new(llm), termbase.clone(), 4);

    let report = preprocessor
        .run(&corpus(), LanguagePair::zh_en())
        .await
        .unwrap();

    assert_eq!(report.new_translations, 0);
    assert_eq!(report.translation_failed.len(), 4);
    assert_eq!(termbase.count(LanguagePair::zh_en()).await.unwrap(), 0);

    // 3 extraction calls + 1 batch attempt + 1 retry
    assert_eq!(backend.calls.load(std::sync::atomic::Ordering::SeqCst), 5);
}

#[tokio::test]
async fn partial_batch_reply_flags_missing_terms() {
    let (llm, _backend) = scripted_client(|system, user| {
        if system.contains(BATCH_TRANSLATE) {
            // Map misses 平等就业
            Ok(json!({
                "translations": {
                    "劳动者": "worker",
                    "用人单位": "employer",
                    "劳动合同": "labor contract"
                }
            })
            .to_string())
        } else {
            preprocess_responder(system, user)
        }
    });
    let termbase = Arc::new(TermStore::in_memory().await.unwrap());
    let preprocessor = TermPreprocessor::new(Arc::new(llm), termbase.clone(), 4);

    let report = preprocessor
        .run(&corpus(), LanguagePair::zh_en())
        .await
        .unwrap();

    assert_eq!(report.new_translations, 3);
    assert_eq!(report.translation_failed, vec!["平等就业".to_string()]);
}
