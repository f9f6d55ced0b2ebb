//! chrF++: character n-gram F-score (n = 1..6) plus word n-grams (1..2),
//! beta = 2. Sentence scores and a corpus score from pooled statistics.

use std::collections::HashMap;

const CHAR_ORDER: usize = 6;
const WORD_ORDER: usize = 2;
const BETA: f64 = 2.0;

/// Per-order precision/recall counts
#[derive(Debug, Default, Clone)]
pub struct ChrfStats {
    /// (matches, candidate_total, reference_total) per n-gram order;
    /// char orders first, then word orders
    pub orders: Vec<(u64, u64, u64)>,
}

impl ChrfStats {
    fn empty() -> Self {
        Self {
            orders: vec![(0, 0, 0); CHAR_ORDER + WORD_ORDER],
        }
    }

    pub fn accumulate(&mut self, other: &ChrfStats) {
        if self.orders.is_empty() {
            self.orders = other.orders.clone();
            return;
        }
        for (mine, theirs) in self.orders.iter_mut().zip(&other.orders) {
            mine.0 += theirs.0;
            mine.1 += theirs.1;
            mine.2 += theirs.2;
        }
    }
}

fn char_ngrams(text: &str, n: usize) -> HashMap<Vec<char>, u64> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut counts = HashMap::new();
    if chars.len() >= n {
        for window in chars.windows(n) {
            *counts.entry(window.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

fn word_ngrams(text: &str, n: usize) -> HashMap<Vec<String>, u64> {
    let words: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let mut counts = HashMap::new();
    if words.len() >= n {
        for window in words.windows(n) {
            *counts.entry(window.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

fn overlap<K: std::hash::Hash + Eq>(
    cand: &HashMap<K, u64>,
    reference: &HashMap<K, u64>,
) -> (u64, u64, u64) {
    let cand_total: u64 = cand.values().sum();
    let ref_total: u64 = reference.values().sum();
    let matches: u64 = cand
        .iter()
        .map(|(k, count)| (*count).min(reference.get(k).copied().unwrap_or(0)))
        .sum();
    (matches, cand_total, ref_total)
}

/// Collect chrF++ statistics for one pair
pub fn pair_stats(candidate: &str, reference: &str) -> ChrfStats {
    let mut stats = ChrfStats::empty();
    for n in 1..=CHAR_ORDER {
        stats.orders[n - 1] = overlap(&char_ngrams(candidate, n), &char_ngrams(reference, n));
    }
    for n in 1..=WORD_ORDER {
        stats.orders[CHAR_ORDER + n - 1] =
            overlap(&word_ngrams(candidate, n), &word_ngrams(reference, n));
    }
    stats
}

/// chrF++ from (pooled) statistics, in [0,1]
pub fn chrf_from_stats(stats: &ChrfStats) -> f64 {
    let beta_sq = BETA * BETA;
    let mut f_sum = 0.0;
    let mut used = 0usize;

    for (matches, cand_total, ref_total) in &stats.orders {
        if *cand_total == 0 && *ref_total == 0 {
            continue;
        }
        used += 1;
        let precision = if *cand_total > 0 {
            *matches as f64 / *cand_total as f64
        } else {
            0.0
        };
        let recall = if *ref_total > 0 {
            *matches as f64 / *ref_total as f64
        } else {
            0.0
        };
        if precision + recall > 0.0 {
            f_sum += (1.0 + beta_sq) * precision * recall / (beta_sq * precision + recall);
        }
    }

    if used == 0 {
        0.0
    } else {
        f_sum / used as f64
    }
}

/// Sentence chrF++ in [0,1]
pub fn sentence_chrf(candidate: &str, reference: &str) -> f64 {
    chrf_from_stats(&pair_stats(candidate, reference))
}

/// Corpus chrF++ over aligned pairs, from pooled statistics
pub fn corpus_chrf<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> f64 {
    let mut pooled = ChrfStats::default();
    let mut any = false;
    for (candidate, reference) in pairs {
        any = true;
        pooled.accumulate(&pair_stats(candidate, reference));
    }
    if !any {
        return f64::NAN;
    }
    chrf_from_stats(&pooled)
}
