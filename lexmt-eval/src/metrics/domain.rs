//! Legal-domain metrics: term-table accuracy, deontic preservation, and
//! conditional-logic preservation. String-level checks against the
//! modal/conditional marker inventories of the pair.

use lexmt_common::types::{Lang, LanguagePair, TermTable};

/// Source modal markers and their expected target rendering (zh -> en).
/// One rendering per marker; 应当 rendered as "shall" does not count.
/// Longer markers come first so 必须 wins over 须 in the scan.
const ZH_EN_MODALS: &[(&str, &str)] = &[
    ("不得", "shall not"),
    ("必须", "must"),
    ("应当", "should"),
    ("可以", "may"),
    ("禁止", "prohibit"),
    ("须", "must"),
];

/// Source conditional markers with their sole accepted equivalent, where
/// one exists. Only 如果->if and 除非->unless ever count as preserved.
const ZH_CONDITIONALS: &[(&str, Option<&str>)] = &[
    ("倘若", None),
    ("假如", None),
    ("如果", Some("if")),
    ("除非", Some("unless")),
    ("但书", None),
    ("若", None),
];

/// Target-side conditional marker inventory; each marker is counted once
/// when present anywhere in the lowercased prediction.
const EN_CONDITIONALS: &[&str] = &["provided that", "in case", "unless", "when", "where", "if"];

/// Fraction of constrained term-table rows whose target form appears in the
/// prediction, given the source form appears in the source. Zero rows means
/// the metric is not computable.
pub fn termbase_accuracy(source: &str, prediction: &str, table: &TermTable) -> f64 {
    let prediction_lower = prediction.to_lowercase();
    let mut total = 0usize;
    let mut matched = 0usize;

    for (source_term, target_term) in table.constrained() {
        if !source.contains(source_term) {
            continue;
        }
        total += 1;
        if prediction_lower.contains(&target_term.to_lowercase()) {
            matched += 1;
        }
    }

    if total == 0 {
        f64::NAN
    } else {
        matched as f64 / total as f64
    }
}

/// Greedy left-to-right scan for source markers. Non-overlapping: 必须
/// consumes its span so 须 is not double-counted, and 如果 is not also
/// counted as 若.
fn scan_markers<'a, T: Copy>(text: &str, inventory: &[(&'a str, T)]) -> Vec<T> {
    let mut found = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let rest: String = chars[i..].iter().collect();
        let mut advanced = false;
        for (marker, value) in inventory {
            if rest.starts_with(marker) {
                found.push(*value);
                i += marker.chars().count();
                advanced = true;
                break;
            }
        }
        if !advanced {
            i += 1;
        }
    }
    found
}

/// Fraction of source deontic markers whose expected target rendering
/// appears in the prediction. A source with no markers scores 1.0.
pub fn deontic_preservation(source: &str, prediction: &str, pair: LanguagePair) -> f64 {
    if pair.src != Lang::Zh || pair.tgt != Lang::En {
        return f64::NAN;
    }
    let expected = scan_markers(source, ZH_EN_MODALS);
    if expected.is_empty() {
        return 1.0;
    }

    let prediction_lower = prediction.to_lowercase();
    let preserved = expected
        .iter()
        .filter(|rendering| prediction_lower.contains(**rendering))
        .count();
    preserved as f64 / expected.len() as f64
}

/// Conditional-logic preservation. Source and target conditional-marker
/// counts must match exactly; a mismatch scores 0.0. Matching counts score
/// the fraction of source markers paired with their accepted equivalent in
/// the target (如果->if, 除非->unless only; every other marker has none).
pub fn conditional_logic(source: &str, prediction: &str, pair: LanguagePair) -> f64 {
    if pair.src != Lang::Zh || pair.tgt != Lang::En {
        return f64::NAN;
    }
    let source_markers = scan_markers(source, ZH_CONDITIONALS);
    if source_markers.is_empty() {
        return 1.0;
    }

    let prediction_lower = prediction.to_lowercase();
    let mut target_markers: Vec<&str> = EN_CONDITIONALS
        .iter()
        .copied()
        .filter(|marker| prediction_lower.contains(marker))
        .collect();

    if source_markers.len() != target_markers.len() {
        return 0.0;
    }

    let mut matched = 0usize;
    for equivalent in &source_markers {
        let Some(expected) = equivalent else { continue };
        if let Some(pos) = target_markers.iter().position(|t| t == expected) {
            target_markers.remove(pos);
            matched += 1;
        }
    }
    matched as f64 / source_markers.len() as f64
}
