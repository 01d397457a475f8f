//! Okapi BM25 scoring.
//!
//! For a query Q against an index with N documents:
//!
//! ```text
//! idf(t)     = ln(((N - df(t) + 0.5) / (df(t) + 0.5)) + 1)
//! score(d)   = Σ_{t in Q} idf(t) * tf(t,d) * (k1 + 1)
//!                        / (tf(t,d) + k1 * (1 - b + b * |d| / avgdl))
//! ```
//!
//! Duplicate query terms contribute once per occurrence; the matched-term
//! set is deduplicated. Besides the batch path over posting lists there is
//! a single-document path that scores one token stream against the current
//! index statistics in O(|Q| * |tokens|), which is what keeps live
//! subscription deltas independent of corpus size.

use crate::index::InvertedIndex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length-normalization blend; zero disables length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// One scored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f64,
    /// Distinct query terms present in the document.
    pub matched_terms: Vec<String>,
}

/// BM25 scorer over an [`InvertedIndex`].
#[derive(Debug, Clone, Default)]
pub struct Bm25Scorer {
    params: Bm25Params,
}

impl Bm25Scorer {
    /// Create a scorer with the given parameters.
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    /// The scorer's parameters.
    pub fn params(&self) -> Bm25Params {
        self.params
    }

    fn idf(index: &InvertedIndex, term: &str) -> f64 {
        let n = index.document_count() as f64;
        let df = index.document_frequency(term) as f64;
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln()
    }

    fn term_weight(&self, tf: f64, doc_len: f64, avg_len: f64) -> f64 {
        let Bm25Params { k1, b } = self.params;
        let norm = k1 * (1.0 - b + b * doc_len / avg_len);
        tf * (k1 + 1.0) / (tf + norm)
    }

    /// Score every candidate document for `query_terms`.
    ///
    /// Candidates are the union of the posting lists of the query terms;
    /// results are sorted by descending score, ties broken by ascending
    /// doc id so the ranking is deterministic.
    pub fn score(&self, index: &InvertedIndex, query_terms: &[String]) -> Vec<ScoredDoc> {
        if query_terms.is_empty() || index.document_count() == 0 {
            return Vec::new();
        }

        let avg_len = index.average_doc_length();
        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut matched: HashMap<String, Vec<String>> = HashMap::new();
        let mut matched_seen: HashMap<String, HashSet<String>> = HashMap::new();

        for term in query_terms {
            let Some(postings) = index.get_postings(term) else {
                continue;
            };
            let idf = Self::idf(index, term);
            for (doc_id, tf) in postings {
                let doc_len = f64::from(index.doc_length(doc_id).unwrap_or(0));
                let weight = idf * self.term_weight(f64::from(*tf), doc_len, avg_len);
                *scores.entry(doc_id.clone()).or_insert(0.0) += weight;

                let seen = matched_seen.entry(doc_id.clone()).or_default();
                if seen.insert(term.clone()) {
                    matched.entry(doc_id.clone()).or_default().push(term.clone());
                }
            }
        }

        let mut results: Vec<ScoredDoc> = scores
            .into_iter()
            .map(|(doc_id, score)| {
                let matched_terms = matched.remove(&doc_id).unwrap_or_default();
                ScoredDoc {
                    doc_id,
                    score,
                    matched_terms,
                }
            })
            .collect();
        sort_ranked(&mut results);
        results
    }

    /// Score one document's token stream against the index statistics.
    ///
    /// Returns `None` when no query term occurs in the tokens. The result
    /// is identical to the batch path for the same document (the index is
    /// consulted only for N, df and the average length).
    pub fn score_single(
        &self,
        index: &InvertedIndex,
        query_terms: &[String],
        doc_tokens: &[String],
    ) -> Option<(f64, Vec<String>)> {
        if query_terms.is_empty() || doc_tokens.is_empty() || index.document_count() == 0 {
            return None;
        }

        let mut tf_by_term: HashMap<&str, f64> = HashMap::new();
        for token in doc_tokens {
            *tf_by_term.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let avg_len = index.average_doc_length();
        let doc_len = doc_tokens.len() as f64;
        let mut score = 0.0;
        let mut matched = Vec::new();
        let mut seen = HashSet::new();

        for term in query_terms {
            let Some(tf) = tf_by_term.get(term.as_str()) else {
                continue;
            };
            let idf = Self::idf(index, term);
            score += idf * self.term_weight(*tf, doc_len, avg_len);
            if seen.insert(term.clone()) {
                matched.push(term.clone());
            }
        }

        if matched.is_empty() {
            None
        } else {
            Some((score, matched))
        }
    }
}

/// Sort by descending score, ties by ascending doc id.
pub fn sort_ranked(results: &mut [ScoredDoc]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}
