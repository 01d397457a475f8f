//! Text normalization: segmentation, stopword filtering, stemming.
//!
//! Tokenization is deterministic and stateless: the same input always
//! yields the same term sequence, independent of prior calls. Both the
//! indexing path and the query path run through the same [`Tokenizer`] so
//! that every node of a cluster tokenizes a query identically.

use crate::porter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Standard English stopword list (174 entries).
const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can't", "cannot", "could", "couldn't", "did", "didn't", "do", "does", "doesn't",
    "doing", "don't", "down", "during", "each", "few", "for", "from", "further", "had", "hadn't",
    "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll", "he's", "her", "here",
    "here's", "hers", "herself", "him", "himself", "his", "how", "how's", "i", "i'd", "i'll",
    "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself", "let's",
    "me", "more", "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off", "on",
    "once", "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own",
    "same", "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so", "some",
    "such", "than", "that", "that's", "the", "their", "theirs", "them", "themselves", "then",
    "there", "there's", "these", "they", "they'd", "they'll", "they're", "they've", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was", "wasn't", "we",
    "we'd", "we'll", "we're", "we've", "were", "weren't", "what", "what's", "when", "when's",
    "where", "where's", "which", "while", "who", "who's", "whom", "why", "why's", "with",
    "won't", "would", "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your", "yours",
    "yourself", "yourselves",
];

/// The default English stopword set.
pub fn english_stopwords() -> HashSet<String> {
    ENGLISH_STOPWORDS.iter().map(|s| s.to_string()).collect()
}

/// Which stemming algorithm the tokenizer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemmerKind {
    /// No stemming.
    None,
    /// English Porter stemmer.
    Porter,
}

/// Immutable tokenizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Lowercase input before any other step.
    pub lowercase: bool,
    /// Terms dropped before stemming.
    pub stopwords: HashSet<String>,
    /// Stemmer applied to surviving words.
    pub stemmer: StemmerKind,
    /// Minimum token length (applies before and after stemming).
    pub min_token_len: usize,
    /// Maximum stem length.
    pub max_token_len: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            stopwords: english_stopwords(),
            stemmer: StemmerKind::Porter,
            min_token_len: 2,
            max_token_len: 40,
        }
    }
}

/// Text to normalized term sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tokenizer {
    config: TokenizerConfig,
}

impl Tokenizer {
    /// Build a tokenizer from configuration.
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }

    /// The configuration this tokenizer was built with.
    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Tokenize `text` into an ordered sequence of terms.
    ///
    /// Words are segmented on runs of non-letter, non-digit characters
    /// using Unicode character properties, so hyphens, punctuation,
    /// apostrophes and every kind of whitespace act as separators.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let lowered;
        let text = if self.config.lowercase {
            lowered = text.to_lowercase();
            &lowered
        } else {
            text
        };

        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .filter_map(|word| self.normalize(word))
            .collect()
    }

    fn normalize(&self, word: &str) -> Option<String> {
        if word.chars().count() < self.config.min_token_len {
            return None;
        }
        // Stopwords are matched on the surface form, before stemming.
        if self.config.stopwords.contains(word) {
            return None;
        }
        let stemmed = match self.config.stemmer {
            StemmerKind::None => word.to_string(),
            StemmerKind::Porter => porter::stem(word),
        };
        let len = stemmed.chars().count();
        if len < self.config.min_token_len || len > self.config.max_token_len {
            return None;
        }
        Some(stemmed)
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_whitespace_input() {
        let t = Tokenizer::default();
        assert!(t.tokenize("").is_empty());
        assert!(t.tokenize("   \t\n").is_empty());
    }

    #[test]
    fn test_stopwords_removed_before_stemming() {
        let t = Tokenizer::default();
        let tokens = t.tokenize("the quick brown fox");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
        assert!(tokens.contains(&"brown".to_string()));
        assert!(tokens.contains(&"fox".to_string()));
    }

    #[test]
    fn test_stemming_applied() {
        let t = Tokenizer::default();
        assert_eq!(t.tokenize("running searches"), vec!["run", "search"]);
    }

    #[test]
    fn test_lowercasing_first() {
        let t = Tokenizer::default();
        assert_eq!(t.tokenize("Hello WORLD"), vec!["hello", "world"]);
        // "The" must hit the stopword list after lowercasing
        assert!(t.tokenize("The THE the").is_empty());
    }

    #[test]
    fn test_punctuation_and_hyphens_separate() {
        let t = Tokenizer::default();
        let tokens = t.tokenize("full-text search, engine!");
        assert_eq!(tokens, vec!["full", "text", "search", "engin"]);
    }

    #[test]
    fn test_unicode_separators() {
        let t = Tokenizer::default();
        // no-break space and ideographic space are separators
        let tokens = t.tokenize("alpha\u{00a0}beta\u{3000}gamma");
        assert_eq!(tokens, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_min_length_filter() {
        let t = Tokenizer::default();
        let tokens = t.tokenize("x yz abc");
        // "x" is below min length; "yz" passes at exactly two chars
        assert_eq!(tokens, vec!["yz", "abc"]);
    }

    #[test]
    fn test_max_length_filter() {
        let config = TokenizerConfig {
            max_token_len: 5,
            ..TokenizerConfig::default()
        };
        let t = Tokenizer::new(config);
        assert!(t.tokenize("extraordinarily").is_empty());
    }

    #[test]
    fn test_no_stemming_option() {
        let config = TokenizerConfig {
            stemmer: StemmerKind::None,
            ..TokenizerConfig::default()
        };
        let t = Tokenizer::new(config);
        assert_eq!(t.tokenize("running"), vec!["running"]);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let t = Tokenizer::default();
        let a = t.tokenize("distributed search clusters");
        let b = t.tokenize("distributed search clusters");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stems_are_a_fixed_point() {
        let t = Tokenizer::default();
        let once = t.tokenize("searching distributed clusters ranking documents");
        let joined = once.join(" ");
        assert_eq!(t.tokenize(&joined), once);
    }

    #[test]
    fn test_default_stopword_count() {
        assert_eq!(english_stopwords().len(), 174);
    }
}
