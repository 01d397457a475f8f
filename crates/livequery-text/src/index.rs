//! Incrementally maintained inverted index.

use crate::error::{Result, TextError};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Postings, document lengths and corpus totals for one token stream.
///
/// Invariants, maintained by every mutation:
/// - a term's posting map never contains zero-frequency entries;
/// - removing the last document of a term removes the term;
/// - the sum of all document lengths equals the tracked total length;
/// - the number of document lengths equals the document count.
///
/// Document lengths iterate in insertion order, which persisted-index
/// loading relies on to rebuild derived state deterministically.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    /// term -> doc id -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    /// doc id -> distinct terms, kept so removal does not scan the vocabulary
    doc_terms: HashMap<String, Vec<String>>,
    /// doc id -> token count, in insertion order
    doc_lengths: IndexMap<String, u32>,
    /// sum of all document lengths
    total_length: u64,
}

impl InvertedIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document's tokens.
    ///
    /// Fails with [`TextError::DuplicateDoc`] when the id is already
    /// present; callers remove first (re-adding is remove + add).
    pub fn add_document(&mut self, id: &str, tokens: &[String]) -> Result<()> {
        if self.doc_lengths.contains_key(id) {
            return Err(TextError::DuplicateDoc(id.to_string()));
        }

        let mut distinct = Vec::new();
        for token in tokens {
            let by_doc = self.postings.entry(token.clone()).or_default();
            let tf = by_doc.entry(id.to_string()).or_insert(0);
            if *tf == 0 {
                distinct.push(token.clone());
            }
            *tf += 1;
        }

        self.doc_terms.insert(id.to_string(), distinct);
        self.doc_lengths.insert(id.to_string(), tokens.len() as u32);
        self.total_length += tokens.len() as u64;
        Ok(())
    }

    /// Remove a document. A no-op when the id is absent.
    pub fn remove_document(&mut self, id: &str) {
        let Some(length) = self.doc_lengths.shift_remove(id) else {
            return;
        };
        self.total_length -= u64::from(length);

        if let Some(terms) = self.doc_terms.remove(id) {
            for term in terms {
                if let Some(by_doc) = self.postings.get_mut(&term) {
                    by_doc.remove(id);
                    if by_doc.is_empty() {
                        self.postings.remove(&term);
                    }
                }
            }
        }
    }

    /// Postings for a term: doc id to term frequency.
    pub fn get_postings(&self, term: &str) -> Option<&HashMap<String, u32>> {
        self.postings.get(term)
    }

    /// Number of documents containing `term`.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, HashMap::len)
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Token count of a document.
    pub fn doc_length(&self, id: &str) -> Option<u32> {
        self.doc_lengths.get(id).copied()
    }

    /// Average document length; zero on an empty index.
    pub fn average_doc_length(&self) -> f64 {
        if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.doc_lengths.len() as f64
        }
    }

    /// Sum of all document lengths.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Whether a document id is indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.doc_lengths.contains_key(id)
    }

    /// Document ids and lengths in insertion order.
    pub fn doc_lengths(&self) -> impl Iterator<Item = (&str, u32)> {
        self.doc_lengths.iter().map(|(id, len)| (id.as_str(), *len))
    }

    /// All indexed terms with their posting maps.
    pub fn postings_iter(&self) -> impl Iterator<Item = (&str, &HashMap<String, u32>)> {
        self.postings.iter().map(|(t, p)| (t.as_str(), p))
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Reset all state.
    pub fn clear(&mut self) {
        self.postings.clear();
        self.doc_terms.clear();
        self.doc_lengths.clear();
        self.total_length = 0;
    }
}
