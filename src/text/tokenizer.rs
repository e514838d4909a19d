//! Deterministic tokenization shared by indexing, querying, and snippets.
//!
//! Indexing and querying must agree on the token stream, so this is the only
//! tokenizer in the crate.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Closed English stop-word set filtered from the token stream.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "to", "of", "in", "on", "at",
    "for", "with", "by", "and", "or", "but", "if", "then", "else", "so", "not", "no", "do",
    "does", "did", "have", "has", "had", "i", "you", "he", "she", "it", "we", "they", "me",
    "him", "her", "us", "them", "this", "that", "these", "those",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Tokenize text: lowercase, split on non-alphanumeric characters, drop
/// tokens shorter than 2 characters and stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !stop_words().contains(t))
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("Python is a great language");
        assert_eq!(tokens, vec!["python", "great", "language"]);
    }

    #[test]
    fn test_tokenize_lowercases() {
        assert_eq!(tokenize("RUST Rust rust"), vec!["rust", "rust", "rust"]);
    }

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        let tokens = tokenize("hello,world;foo-bar_baz");
        // '_' is not alphanumeric, so snake_case splits too
        assert_eq!(tokens, vec!["hello", "world", "foo", "bar", "baz"]);
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let tokens = tokenize("a b c word");
        assert_eq!(tokens, vec!["word"]);
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        let tokens = tokenize("the quick fox and the lazy dog");
        assert_eq!(tokens, vec!["quick", "fox", "lazy", "dog"]);
    }

    #[test]
    fn test_tokenize_empty_and_whitespace() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n\t ").is_empty());
    }

    #[test]
    fn test_tokenize_numbers_kept() {
        let tokens = tokenize("error 404 page");
        assert_eq!(tokens, vec!["error", "404", "page"]);
    }

    #[test]
    fn test_tokenize_deterministic() {
        let text = "Determinism matters: index and query must agree.";
        assert_eq!(tokenize(text), tokenize(text));
    }
}
