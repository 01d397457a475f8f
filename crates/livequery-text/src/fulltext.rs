//! Multi-field full-text index facade.
//!
//! One combined index over all configured fields plus one per-field index
//! for boosting. Only string-valued attributes are tokenized; numeric,
//! boolean and binary attributes are invisible to full-text search.

use crate::bm25::{sort_ranked, Bm25Params, Bm25Scorer, ScoredDoc};
use crate::error::{Result, TextError};
use crate::index::InvertedIndex;
use crate::tokenizer::{Tokenizer, TokenizerConfig};
use livequery_core::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Format version of the persisted combined index.
const FORMAT_VERSION: u32 = 1;

/// Configuration for one map's full-text index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullTextConfig {
    /// Attributes to tokenize and index.
    pub fields: Vec<String>,
    /// Tokenizer settings shared by indexing and querying.
    pub tokenizer: TokenizerConfig,
    /// BM25 parameters.
    pub bm25: Bm25Params,
}

impl FullTextConfig {
    /// Configuration with default tokenizer and scoring over `fields`.
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            tokenizer: TokenizerConfig::default(),
            bm25: Bm25Params::default(),
        }
    }
}

/// Options applied to one search execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Keep at most this many results; `None` or zero leaves the ranked
    /// list unsliced.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Drop results scoring below this threshold.
    #[serde(default)]
    pub min_score: Option<f64>,
    /// Per-field score multipliers; fields not listed weigh 1.0.
    #[serde(default)]
    pub boost: Option<HashMap<String, f64>>,
    /// Keyset pagination: only results ranking strictly after this score.
    #[serde(default)]
    pub after_score: Option<f64>,
    /// Keyset pagination: tie-break key for `after_score`.
    #[serde(default)]
    pub after_key: Option<String>,
}

/// The incrementally maintained full-text index of one map.
#[derive(Debug, Clone)]
pub struct FullTextIndex {
    fields: Vec<String>,
    tokenizer: Tokenizer,
    scorer: Bm25Scorer,
    combined: InvertedIndex,
    field_indexes: HashMap<String, InvertedIndex>,
    indexed_docs: HashSet<String>,
    /// doc id -> combined token stream, for single-document scoring
    token_cache: HashMap<String, Vec<String>>,
}

/// Persisted form of the combined index.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    bm25: Bm25Params,
    tokenizer: TokenizerConfig,
    fields: Vec<String>,
    postings: HashMap<String, HashMap<String, u32>>,
    /// ordered: load() rebuilds the doc set in insertion order
    doc_lengths: Vec<(String, u32)>,
    total_length: u64,
}

impl FullTextIndex {
    /// Build an empty index for the configured fields.
    pub fn new(config: FullTextConfig) -> Self {
        let field_indexes = config
            .fields
            .iter()
            .map(|f| (f.clone(), InvertedIndex::new()))
            .collect();
        Self {
            fields: config.fields,
            tokenizer: Tokenizer::new(config.tokenizer),
            scorer: Bm25Scorer::new(config.bm25),
            combined: InvertedIndex::new(),
            field_indexes,
            indexed_docs: HashSet::new(),
            token_cache: HashMap::new(),
        }
    }

    /// Configured field names.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.combined.document_count()
    }

    /// Whether a document is currently indexed.
    pub fn contains(&self, doc_id: &str) -> bool {
        self.indexed_docs.contains(doc_id)
    }

    /// The combined index (read-only, for diagnostics and tests).
    pub fn combined(&self) -> &InvertedIndex {
        &self.combined
    }

    /// Cached combined tokens of a document.
    pub fn cached_tokens(&self, doc_id: &str) -> Option<&[String]> {
        self.token_cache.get(doc_id).map(Vec::as_slice)
    }

    /// Index or re-index a document.
    ///
    /// A document whose configured fields produce no tokens is not
    /// indexed (and any previous version is removed).
    pub fn on_set(&mut self, doc_id: &str, record: &Record) -> Result<()> {
        if self.indexed_docs.contains(doc_id) {
            self.remove_internal(doc_id);
        }

        let mut combined_tokens = Vec::new();
        for field in &self.fields {
            let Some(Value::String(text)) = record.get(field) else {
                continue;
            };
            let tokens = self.tokenizer.tokenize(text);
            if tokens.is_empty() {
                continue;
            }
            if let Some(index) = self.field_indexes.get_mut(field) {
                index.add_document(doc_id, &tokens)?;
            }
            combined_tokens.extend(tokens);
        }

        if combined_tokens.is_empty() {
            self.token_cache.remove(doc_id);
            return Ok(());
        }

        self.combined.add_document(doc_id, &combined_tokens)?;
        self.indexed_docs.insert(doc_id.to_string());
        self.token_cache.insert(doc_id.to_string(), combined_tokens);
        Ok(())
    }

    /// Drop a document from every index. A no-op when not indexed.
    pub fn on_remove(&mut self, doc_id: &str) {
        if self.indexed_docs.contains(doc_id) {
            self.remove_internal(doc_id);
        }
    }

    fn remove_internal(&mut self, doc_id: &str) {
        self.combined.remove_document(doc_id);
        for index in self.field_indexes.values_mut() {
            index.remove_document(doc_id);
        }
        self.indexed_docs.remove(doc_id);
        self.token_cache.remove(doc_id);
    }

    /// Tokenize a query with the index's own tokenizer.
    ///
    /// Subscriptions tokenize exactly once through this, so every node of
    /// a cluster derives the same terms for the same query string.
    pub fn tokenize_query(&self, query: &str) -> Vec<String> {
        self.tokenizer.tokenize(query)
    }

    /// Execute a ranked search.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<ScoredDoc> {
        let terms = self.tokenize_query(query);
        self.search_terms(&terms, options)
    }

    /// Execute a ranked search over pre-tokenized terms.
    pub fn search_terms(&self, terms: &[String], options: &SearchOptions) -> Vec<ScoredDoc> {
        if terms.is_empty() {
            return Vec::new();
        }

        let mut results = match &options.boost {
            Some(boost) if !boost.is_empty() => self.search_boosted(terms, boost),
            _ => self.scorer.score(&self.combined, terms),
        };

        if let Some(min_score) = options.min_score {
            results.retain(|r| r.score >= min_score);
        }
        if let Some(after_score) = options.after_score {
            let after_key = options.after_key.as_deref().unwrap_or("");
            results.retain(|r| {
                r.score < after_score || (r.score == after_score && r.doc_id.as_str() > after_key)
            });
        }
        if let Some(limit) = options.limit {
            if limit > 0 {
                results.truncate(limit);
            }
        }
        results
    }

    /// Per-field scoring with boost weights, summed per document.
    fn search_boosted(&self, terms: &[String], boost: &HashMap<String, f64>) -> Vec<ScoredDoc> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut matched: HashMap<String, Vec<String>> = HashMap::new();
        let mut matched_seen: HashMap<String, HashSet<String>> = HashMap::new();

        for field in &self.fields {
            let Some(index) = self.field_indexes.get(field) else {
                continue;
            };
            let weight = boost.get(field).copied().unwrap_or(1.0);
            for hit in self.scorer.score(index, terms) {
                *scores.entry(hit.doc_id.clone()).or_insert(0.0) += hit.score * weight;
                let seen = matched_seen.entry(hit.doc_id.clone()).or_default();
                let union = matched.entry(hit.doc_id).or_default();
                for term in hit.matched_terms {
                    if seen.insert(term.clone()) {
                        union.push(term);
                    }
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

    /// Score one document against pre-tokenized query terms, without
    /// touching any other document's postings.
    ///
    /// Uses the cached token stream when the document is indexed, falling
    /// back to tokenizing `record`. Returns `None` when no term matches or
    /// the score is not positive.
    pub fn score_single_document(
        &self,
        doc_id: &str,
        query_terms: &[String],
        record: Option<&Record>,
    ) -> Option<ScoredDoc> {
        let owned_tokens;
        let tokens: &[String] = match self.token_cache.get(doc_id) {
            Some(cached) => cached.as_slice(),
            None => {
                owned_tokens = self.tokenize_record(record?);
                owned_tokens.as_slice()
            }
        };

        let (score, matched_terms) = self.scorer.score_single(&self.combined, query_terms, tokens)?;
        if score <= 0.0 {
            return None;
        }
        Some(ScoredDoc {
            doc_id: doc_id.to_string(),
            score,
            matched_terms,
        })
    }

    fn tokenize_record(&self, record: &Record) -> Vec<String> {
        let mut combined = Vec::new();
        for field in &self.fields {
            if let Some(Value::String(text)) = record.get(field) {
                combined.extend(self.tokenizer.tokenize(text));
            }
        }
        combined
    }

    /// Serialize the combined index (per-field indexes are rebuilt from
    /// source data, not persisted).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            bm25: self.scorer.params(),
            tokenizer: self.tokenizer.config().clone(),
            fields: self.fields.clone(),
            postings: self
                .combined
                .postings_iter()
                .map(|(t, p)| (t.to_string(), p.clone()))
                .collect(),
            doc_lengths: self
                .combined
                .doc_lengths()
                .map(|(id, len)| (id.to_string(), len))
                .collect(),
            total_length: self.combined.total_length(),
        };
        serde_json::to_vec(&persisted).map_err(|e| TextError::Serialization(e.to_string()))
    }

    /// Restore a combined index from its persisted form.
    ///
    /// Per-field indexes come back empty (boosting degrades until the
    /// index is rebuilt from source) and the token cache starts cold.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let persisted: PersistedIndex =
            serde_json::from_slice(data).map_err(|e| TextError::Serialization(e.to_string()))?;
        if persisted.version != FORMAT_VERSION {
            return Err(TextError::IncompatibleVersion {
                found: persisted.version,
                expected: FORMAT_VERSION,
            });
        }

        self.tokenizer = Tokenizer::new(persisted.tokenizer);
        self.scorer = Bm25Scorer::new(persisted.bm25);
        self.fields = persisted.fields.clone();
        self.field_indexes = persisted
            .fields
            .iter()
            .map(|f| (f.clone(), InvertedIndex::new()))
            .collect();
        self.token_cache.clear();

        self.combined.clear();
        self.indexed_docs.clear();
        let mut tokens_by_doc: HashMap<&str, Vec<(String, u32)>> = HashMap::new();
        for (term, by_doc) in &persisted.postings {
            for (doc_id, tf) in by_doc {
                tokens_by_doc
                    .entry(doc_id.as_str())
                    .or_default()
                    .push((term.clone(), *tf));
            }
        }
        for (doc_id, length) in &persisted.doc_lengths {
            let mut tokens = Vec::with_capacity(*length as usize);
            if let Some(terms) = tokens_by_doc.remove(doc_id.as_str()) {
                for (term, tf) in terms {
                    for _ in 0..tf {
                        tokens.push(term.clone());
                    }
                }
            }
            self.combined.add_document(doc_id, &tokens)?;
            self.indexed_docs.insert(doc_id.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn article_index() -> FullTextIndex {
        let mut index = FullTextIndex::new(FullTextConfig::new(["title", "body"]));
        index
            .on_set("a", &record(&[("title", "Hello World"), ("body", "Test")]))
            .unwrap();
        index
            .on_set("b", &record(&[("title", "Goodbye"), ("body", "Another document")]))
            .unwrap();
        index
    }

    #[test]
    fn test_basic_ranking() {
        let index = article_index();
        let results = index.search("hello", &SearchOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "a");
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_empty_and_stopword_queries() {
        let index = article_index();
        assert!(index.search("", &SearchOptions::default()).is_empty());
        assert!(index.search("the and of", &SearchOptions::default()).is_empty());
        assert!(index.search("zzzzz", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn test_non_string_fields_ignored() {
        let mut index = FullTextIndex::new(FullTextConfig::new(["title", "count"]));
        let mut rec = record(&[("title", "hello")]);
        rec.insert("count".to_string(), Value::Int(42));
        index.on_set("a", &rec).unwrap();

        assert!(index.search("42", &SearchOptions::default()).is_empty());
        assert_eq!(index.search("hello", &SearchOptions::default()).len(), 1);
    }

    #[test]
    fn test_reindex_replaces() {
        let mut index = article_index();
        index
            .on_set("a", &record(&[("title", "Completely different")]))
            .unwrap();
        assert!(index.search("hello", &SearchOptions::default()).is_empty());
        assert_eq!(index.search("different", &SearchOptions::default()).len(), 1);
        assert_eq!(index.document_count(), 2);
    }

    #[test]
    fn test_empty_document_not_indexed() {
        let mut index = article_index();
        index.on_set("c", &record(&[("title", "the a an")])).unwrap();
        assert!(!index.contains("c"));
        assert!(index.cached_tokens("c").is_none());

        // re-setting "a" to empty drops it
        index.on_set("a", &record(&[("title", "of")])).unwrap();
        assert!(!index.contains("a"));
        assert_eq!(index.document_count(), 1);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let mut index = article_index();
        index.on_remove("missing");
        index.on_remove("a");
        index.on_remove("a");
        assert_eq!(index.document_count(), 1);
    }

    #[test]
    fn test_cache_tracks_indexed_docs() {
        let mut index = article_index();
        for id in ["a", "b"] {
            let cached = index.cached_tokens(id).unwrap();
            assert_eq!(
                cached.len() as u32,
                index.combined().doc_length(id).unwrap()
            );
        }
        index.on_remove("a");
        assert!(index.cached_tokens("a").is_none());
    }

    #[test]
    fn test_field_boost_ordering() {
        let mut index = FullTextIndex::new(FullTextConfig::new(["title", "body"]));
        index
            .on_set("title-hit", &record(&[("title", "keyword x"), ("body", "y")]))
            .unwrap();
        index
            .on_set("body-hit", &record(&[("title", "y"), ("body", "keyword x")]))
            .unwrap();
        // fillers keep the per-field document frequencies symmetric
        index
            .on_set("fill-1", &record(&[("title", "keyword pad"), ("body", "pad")]))
            .unwrap();
        index
            .on_set("fill-2", &record(&[("title", "pad"), ("body", "keyword pad")]))
            .unwrap();

        let options = SearchOptions {
            boost: Some(HashMap::from([("title".to_string(), 2.0)])),
            ..SearchOptions::default()
        };
        let results = index.search("keyword", &options);
        assert_eq!(results[0].doc_id, "title-hit");
    }

    #[test]
    fn test_min_score_and_limit() {
        let index = article_index();
        let all = index.search("hello world test", &SearchOptions::default());
        assert!(!all.is_empty());

        let limited = index.search(
            "hello world test",
            &SearchOptions {
                limit: Some(1),
                ..SearchOptions::default()
            },
        );
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].doc_id, all[0].doc_id);

        let filtered = index.search(
            "hello world test",
            &SearchOptions {
                min_score: Some(f64::MAX),
                ..SearchOptions::default()
            },
        );
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_zero_limit_leaves_results() {
        let index = article_index();
        let results = index.search(
            "hello world test another",
            &SearchOptions {
                limit: Some(0),
                ..SearchOptions::default()
            },
        );
        assert!(results.len() > 1);
    }

    #[test]
    fn test_single_doc_scoring_matches_search() {
        let index = article_index();
        let terms = index.tokenize_query("hello world");
        let batch = index.search("hello world", &SearchOptions::default());
        let single = index.score_single_document("a", &terms, None).unwrap();

        let a = batch.iter().find(|r| r.doc_id == "a").unwrap();
        assert!((a.score - single.score).abs() < 1e-10);
    }

    #[test]
    fn test_single_doc_uncached_record() {
        let index = article_index();
        let terms = index.tokenize_query("fresh words");
        let rec = record(&[("title", "fresh words here")]);
        let scored = index.score_single_document("new-doc", &terms, Some(&rec)).unwrap();
        assert!(scored.score > 0.0);
        assert_eq!(scored.matched_terms.len(), 2);

        assert!(index.score_single_document("new-doc", &terms, None).is_none());
    }

    #[test]
    fn test_serialize_load_round_trip() {
        let index = article_index();
        let bytes = index.serialize().unwrap();

        let mut restored = FullTextIndex::new(FullTextConfig::new(["unused"]));
        restored.load(&bytes).unwrap();

        assert_eq!(restored.document_count(), index.document_count());
        assert_eq!(
            restored.combined().total_length(),
            index.combined().total_length()
        );
        // same ranking after reload
        let before = index.search("hello", &SearchOptions::default());
        let after = restored.search("hello", &SearchOptions::default());
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].doc_id, after[0].doc_id);
        assert!((before[0].score - after[0].score).abs() < 1e-10);

        // insertion order of document lengths survives
        let order_before: Vec<String> = index
            .combined()
            .doc_lengths()
            .map(|(id, _)| id.to_string())
            .collect();
        let order_after: Vec<String> = restored
            .combined()
            .doc_lengths()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(order_before, order_after);
    }

    #[test]
    fn test_load_rejects_wrong_version() {
        let index = article_index();
        let mut json: serde_json::Value =
            serde_json::from_slice(&index.serialize().unwrap()).unwrap();
        json["version"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&json).unwrap();

        let mut restored = FullTextIndex::new(FullTextConfig::new(["title"]));
        let err = restored.load(&bytes).unwrap_err();
        assert!(matches!(err, TextError::IncompatibleVersion { found: 99, .. }));
    }

    #[test]
    fn test_remove_then_set_equals_fresh_set() {
        let mut a = article_index();
        a.on_remove("a");
        a.on_set("a", &record(&[("title", "Hello World"), ("body", "Test")]))
            .unwrap();

        let b = article_index();
        let ra = a.search("hello test world", &SearchOptions::default());
        let rb = b.search("hello test world", &SearchOptions::default());
        assert_eq!(ra.len(), rb.len());
        for (x, y) in ra.iter().zip(rb.iter()) {
            assert_eq!(x.doc_id, y.doc_id);
            assert!((x.score - y.score).abs() < 1e-10);
        }
    }
}
