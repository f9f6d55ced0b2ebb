//! BM25 Okapi lexical scorer over the TM corpus
//!
//! Tokenization is language-aware in the minimal way the corpus needs:
//! CJK text is split per character, everything else lowercased and split on
//! whitespace.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// True when the text contains CJK ideographs
fn has_cjk(text: &str) -> bool {
    text.chars()
        .any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Tokenize for lexical indexing
pub fn tokenize(text: &str) -> Vec<String> {
    if has_cjk(text) {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_string())
            .collect()
    } else {
        text.to_lowercase()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }
}

/// Okapi BM25 index over a fixed corpus. Rebuilt on insert; the TM corpus
/// is small enough that rebuilds are cheap relative to embedding calls.
#[derive(Debug, Default, Clone)]
pub struct Bm25Index {
    docs: Vec<Vec<String>>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn build(corpus: &[String]) -> Self {
        let docs: Vec<Vec<String>> = corpus.iter().map(|text| tokenize(text)).collect();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            let mut seen: Vec<&String> = Vec::new();
            for token in doc {
                if !seen.contains(&token) {
                    seen.push(token);
                    *doc_freq.entry(token.clone()).or_insert(0) += 1;
                }
            }
        }

        let total_len: usize = docs.iter().map(|d| d.len()).sum();
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };

        Self {
            docs,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Raw BM25 score of `query` against every document, in corpus order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let query_tokens = tokenize(query);
        let n = self.docs.len() as f64;

        self.docs
            .iter()
            .map(|doc| {
                if doc.is_empty() {
                    return 0.0;
                }
                let doc_len = doc.len() as f64;
                let mut score = 0.0;
                for token in &query_tokens {
                    let tf = doc.iter().filter(|t| *t == token).count() as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = *self.doc_freq.get(token).unwrap_or(&0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_len.max(1e-9));
                    score += idf * (tf * (K1 + 1.0)) / denom;
                }
                score
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_cjk_per_character() {
        assert_eq!(tokenize("劳动者 权利"), vec!["劳", "动", "者", "权", "利"]);
    }

    #[test]
    fn tokenize_lowercases_and_splits_words() {
        assert_eq!(tokenize("Workers SHALL vote"), vec!["workers", "shall", "vote"]);
    }

    #[test]
    fn identical_document_scores_highest() {
        let corpus = vec![
            "劳动者享有平等就业的权利".to_string(),
            "公司应当依法纳税".to_string(),
            "合同自成立时生效".to_string(),
        ];
        let index = Bm25Index::build(&corpus);
        let scores = index.scores("劳动者享有平等就业的权利");

        assert_eq!(scores.len(), 3);
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
    }

    #[test]
    fn unrelated_query_scores_zero() {
        let corpus = vec!["workers shall vote".to_string()];
        let index = Bm25Index::build(&corpus);
        let scores = index.scores("unrelated phrase entirely");
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn empty_corpus_is_empty() {
        let index = Bm25Index::build(&[]);
        assert!(index.is_empty());
        assert!(index.scores("anything").is_empty());
    }
}
