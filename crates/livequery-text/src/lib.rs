//! # livequery-text
//!
//! The local full-text search engine: a configurable tokenizer with an
//! English Porter stemmer, an incrementally maintained inverted index,
//! a BM25 scorer with batch and single-document paths, and the multi-field
//! [`FullTextIndex`] facade that live subscriptions are computed against.

pub mod bm25;
pub mod error;
pub mod fulltext;
pub mod index;
pub mod porter;
pub mod tokenizer;

pub use bm25::{Bm25Params, Bm25Scorer, ScoredDoc};
pub use error::{Result, TextError};
pub use fulltext::{FullTextConfig, FullTextIndex, SearchOptions};
pub use index::InvertedIndex;
pub use porter::stem;
pub use tokenizer::{english_stopwords, StemmerKind, Tokenizer, TokenizerConfig};
