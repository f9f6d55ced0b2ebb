//! BLEU: smoothed sentence scores plus corpus score from aggregated
//! n-gram statistics. Corpus BLEU is defined on the pooled statistics, not
//! the average of sentence scores.

use lexmt_engine::tm::bm25::tokenize;
use std::collections::HashMap;

const MAX_ORDER: usize = 4;

/// Clipped n-gram match and total counts for one candidate/reference pair
#[derive(Debug, Default, Clone)]
pub struct BleuStats {
    /// matches[n-1] = clipped n-gram matches
    pub matches: [u64; MAX_ORDER],
    /// totals[n-1] = candidate n-gram count
    pub totals: [u64; MAX_ORDER],
    pub candidate_len: u64,
    pub reference_len: u64,
}

impl BleuStats {
    pub fn accumulate(&mut self, other: &BleuStats) {
        for n in 0..MAX_ORDER {
            self.matches[n] += other.matches[n];
            self.totals[n] += other.totals[n];
        }
        self.candidate_len += other.candidate_len;
        self.reference_len += other.reference_len;
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], u64> {
    let mut counts: HashMap<&[String], u64> = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

/// Collect clipped match statistics for one pair
pub fn pair_stats(candidate: &str, reference: &str) -> BleuStats {
    let cand = tokenize(candidate);
    let reference = tokenize(reference);

    let mut stats = BleuStats {
        candidate_len: cand.len() as u64,
        reference_len: reference.len() as u64,
        ..BleuStats::default()
    };

    for n in 1..=MAX_ORDER {
        let cand_counts = ngram_counts(&cand, n);
        let ref_counts = ngram_counts(&reference, n);
        let mut matches = 0u64;
        let mut total = 0u64;
        for (gram, count) in &cand_counts {
            total += count;
            if let Some(ref_count) = ref_counts.get(gram) {
                matches += (*count).min(*ref_count);
            }
        }
        stats.matches[n - 1] = matches;
        stats.totals[n - 1] = total;
    }
    stats
}

/// BLEU from pooled statistics, with add-one smoothing above unigrams
pub fn bleu_from_stats(stats: &BleuStats) -> f64 {
    if stats.candidate_len == 0 || stats.totals[0] == 0 {
        return 0.0;
    }

    let mut log_precision_sum = 0.0;
    for n in 0..MAX_ORDER {
        let (matches, total) = if n == 0 {
            (stats.matches[0] as f64, stats.totals[0] as f64)
        } else {
            // add-one smoothing keeps short sentences scoreable
            (stats.matches[n] as f64 + 1.0, stats.totals[n] as f64 + 1.0)
        };
        if matches == 0.0 || total == 0.0 {
            return 0.0;
        }
        log_precision_sum += (matches / total).ln();
    }
    let geo_mean = (log_precision_sum / MAX_ORDER as f64).exp();

    let brevity_penalty = if stats.candidate_len >= stats.reference_len {
        1.0
    } else {
        (1.0 - stats.reference_len as f64 / stats.candidate_len as f64).exp()
    };

    (brevity_penalty * geo_mean).clamp(0.0, 1.0)
}

/// Smoothed sentence BLEU in [0,1]
pub fn sentence_bleu(candidate: &str, reference: &str) -> f64 {
    bleu_from_stats(&pair_stats(candidate, reference))
}

/// Corpus BLEU over aligned (candidate, reference) pairs
pub fn corpus_bleu<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> f64 {
    let mut pooled = BleuStats::default();
    let mut any = false;
    for (candidate, reference) in pairs {
        any = true;
        pooled.accumulate(&pair_stats(candidate, reference));
    }
    if !any {
        return f64::NAN;
    }
    bleu_from_stats(&pooled)
}
