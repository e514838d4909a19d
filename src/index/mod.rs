//! In-process inverted index over chunk tokens with TF-IDF scoring.
//!
//! The index is rebuilt from the chunk store at startup (tokenization is
//! deterministic, so the rebuilt index always agrees with the store) and
//! updated in lockstep with every store write. Readers share the lock;
//! writers take it exclusively per source batch.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::text::tokenize;

#[derive(Default)]
struct IndexInner {
    /// term -> chunk_id -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    /// chunk_id -> distinct terms (for O(terms) removal)
    chunk_terms: HashMap<String, Vec<String>>,
    /// chunk_id -> total token count
    chunk_lens: HashMap<String, u32>,
}

/// Thread-safe inverted index.
pub struct LexicalIndex {
    inner: RwLock<IndexInner>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
        }
    }

    /// Rebuild from `(chunk_id, text)` pairs, replacing all current state.
    pub fn rebuild(&self, chunks: &[(String, String)]) {
        let mut inner = self.inner.write().unwrap();
        *inner = IndexInner::default();
        for (chunk_id, text) in chunks {
            add_locked(&mut inner, chunk_id, &tokenize(text));
        }
    }

    /// Add a chunk's token stream. Re-adding a chunk id replaces it.
    pub fn add(&self, chunk_id: &str, tokens: &[String]) {
        let mut inner = self.inner.write().unwrap();
        remove_locked(&mut inner, chunk_id);
        add_locked(&mut inner, chunk_id, tokens);
    }

    /// Remove a chunk. Unknown ids are a no-op.
    pub fn remove(&self, chunk_id: &str) {
        let mut inner = self.inner.write().unwrap();
        remove_locked(&mut inner, chunk_id);
    }

    /// Remove several chunks under one exclusive acquisition.
    pub fn remove_many(&self, chunk_ids: &[String]) {
        let mut inner = self.inner.write().unwrap();
        for chunk_id in chunk_ids {
            remove_locked(&mut inner, chunk_id);
        }
    }

    /// Chunk ids containing `term`.
    pub fn postings(&self, term: &str) -> HashSet<String> {
        let inner = self.inner.read().unwrap();
        inner
            .postings
            .get(term)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of chunks containing `term`.
    pub fn doc_freq(&self, term: &str) -> usize {
        let inner = self.inner.read().unwrap();
        inner.postings.get(term).map(|m| m.len()).unwrap_or(0)
    }

    /// Total number of indexed chunks.
    pub fn total_docs(&self) -> usize {
        self.inner.read().unwrap().chunk_lens.len()
    }

    /// Union of postings over the query tokens.
    pub fn candidates(&self, query_tokens: &[String]) -> HashSet<String> {
        let inner = self.inner.read().unwrap();
        let mut out = HashSet::new();
        for token in query_tokens {
            if let Some(m) = inner.postings.get(token) {
                out.extend(m.keys().cloned());
            }
        }
        out
    }

    /// TF-IDF score of one chunk for the query:
    /// sum over tokens of (tf / chunk_len) * ln(N / df).
    pub fn score(&self, query_tokens: &[String], chunk_id: &str) -> f32 {
        let inner = self.inner.read().unwrap();

        let len = match inner.chunk_lens.get(chunk_id) {
            Some(&len) if len > 0 => len as f32,
            _ => return 0.0,
        };
        let total_docs = inner.chunk_lens.len() as f32;

        let mut score = 0.0f32;
        for token in query_tokens {
            if let Some(m) = inner.postings.get(token) {
                if let Some(&tf) = m.get(chunk_id) {
                    let df = m.len() as f32;
                    let idf = (total_docs / df).ln();
                    score += (tf as f32 / len) * idf;
                }
            }
        }
        score
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn add_locked(inner: &mut IndexInner, chunk_id: &str, tokens: &[String]) {
    let mut freqs: HashMap<&String, u32> = HashMap::new();
    for token in tokens {
        *freqs.entry(token).or_insert(0) += 1;
    }

    let mut terms = Vec::with_capacity(freqs.len());
    for (token, tf) in freqs {
        inner
            .postings
            .entry(token.clone())
            .or_default()
            .insert(chunk_id.to_string(), tf);
        terms.push(token.clone());
    }

    inner.chunk_terms.insert(chunk_id.to_string(), terms);
    inner.chunk_lens.insert(chunk_id.to_string(), tokens.len() as u32);
}

fn remove_locked(inner: &mut IndexInner, chunk_id: &str) {
    let Some(terms) = inner.chunk_terms.remove(chunk_id) else {
        return;
    };
    for term in terms {
        if let Some(m) = inner.postings.get_mut(&term) {
            m.remove(chunk_id);
            if m.is_empty() {
                inner.postings.remove(&term);
            }
        }
    }
    inner.chunk_lens.remove(chunk_id);
}
