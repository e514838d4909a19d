//! Search engine: keyword (TF-IDF), semantic (cosine), and hybrid ranking
//! over the shared chunk store, with per-source result assembly and
//! snippet generation.

pub mod snippet;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::embeddings::Embedder;
use crate::error::{FindexError, Result};
use crate::index::LexicalIndex;
use crate::ledger::Ledger;
use crate::store::{ChunkRecord, ChunkStore};
use crate::text::tokenize;

pub use snippet::{highlight, snippet as make_snippet, SNIPPET_WINDOW};

/// Search flavor requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Keyword,
    Semantic,
    Hybrid,
}

/// One search result: the best chunk of one source.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub source_id: String,
    pub display_name: String,
    pub file_type: String,
    pub size_bytes: u64,
    pub score: f32,
    pub snippet: String,
    pub last_modified: Option<i64>,
}

/// A scored chunk, before per-source assembly.
#[derive(Debug, Clone)]
struct ScoredChunk {
    chunk: ChunkRecord,
    score: f32,
}

pub struct SearchEngine {
    store: ChunkStore,
    ledger: Ledger,
    lexical: Arc<LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        store: ChunkStore,
        ledger: Ledger,
        lexical: Arc<LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            lexical,
            embedder,
            config,
        }
    }

    /// Run a search and return one ranked result per source.
    pub async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(FindexError::InvalidInput("query must not be empty".to_string()));
        }
        let limit = if limit == 0 { self.config.default_limit } else { limit };

        let start = std::time::Instant::now();
        let query_tokens = tokenize(query);

        let scored = match search_type {
            SearchType::Keyword => self.keyword_chunks(&query_tokens, None).await?,
            SearchType::Semantic => {
                let fetch_k = limit * self.config.over_fetch;
                self.semantic_chunks(query, fetch_k, threshold).await?
            }
            SearchType::Hybrid => {
                let fetch_k = limit * self.config.over_fetch;
                self.hybrid_chunks(query, &query_tokens, fetch_k, threshold).await?
            }
        };

        let hits = self.assemble(scored, &query_tokens, limit).await?;
        log::debug!(
            "{:?} search for {:?} returned {} results in {:?}",
            search_type,
            query,
            hits.len(),
            start.elapsed()
        );
        Ok(hits)
    }

    /// TF-IDF over the union of postings of the query tokens.
    /// Zero-scoring chunks are dropped.
    async fn keyword_chunks(
        &self,
        query_tokens: &[String],
        fetch_k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.lexical.candidates(query_tokens);
        let mut scored_ids: Vec<(String, f32)> = candidates
            .into_iter()
            .map(|chunk_id| {
                let score = self.lexical.score(query_tokens, &chunk_id);
                (chunk_id, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored_ids.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(k) = fetch_k {
            scored_ids.truncate(k);
        }

        let ids: Vec<String> = scored_ids.iter().map(|(id, _)| id.clone()).collect();
        let records = self.store.get_chunks(&ids).await?;
        let by_id: HashMap<String, ChunkRecord> = records
            .into_iter()
            .map(|r| (r.chunk_id.clone(), r))
            .collect();

        Ok(scored_ids
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(&id).map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect())
    }

    /// Cosine similarity over the chunk store, over-fetched for filtering.
    async fn semantic_chunks(
        &self,
        query: &str,
        fetch_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed(query).await?;
        let hits = self.store.query_semantic(query_vec, fetch_k, threshold).await?;
        Ok(hits
            .into_iter()
            .map(|h| ScoredChunk {
                chunk: h.chunk,
                score: h.score,
            })
            .collect())
    }

    /// Linear blend of min-max-normalized keyword and semantic scores:
    /// combined = alpha * semantic + (1 - alpha) * keyword.
    /// A chunk missing from one side contributes 0 for that side.
    async fn hybrid_chunks(
        &self,
        query: &str,
        query_tokens: &[String],
        fetch_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let (keyword, semantic) = tokio::join!(
            self.keyword_chunks(query_tokens, Some(fetch_k)),
            self.semantic_chunks(query, fetch_k, threshold)
        );
        let keyword = keyword?;
        let semantic = semantic?;

        let alpha = self.config.semantic_weight;
        let keyword_norm = normalize(&keyword);
        let semantic_norm = normalize(&semantic);

        let mut combined: HashMap<String, ScoredChunk> = HashMap::new();
        for (scored, norm) in keyword.iter().zip(keyword_norm.iter()) {
            combined.insert(
                scored.chunk.chunk_id.clone(),
                ScoredChunk {
                    chunk: scored.chunk.clone(),
                    score: (1.0 - alpha) * norm,
                },
            );
        }
        for (scored, norm) in semantic.iter().zip(semantic_norm.iter()) {
            combined
                .entry(scored.chunk.chunk_id.clone())
                .and_modify(|entry| entry.score += alpha * norm)
                .or_insert_with(|| ScoredChunk {
                    chunk: scored.chunk.clone(),
                    score: alpha * norm,
                });
        }

        Ok(combined.into_values().collect())
    }

    /// Keep the best chunk per source, order by (score desc, ordinal asc,
    /// source_id), truncate, and attach snippets and source metadata.
    async fn assemble(
        &self,
        mut scored: Vec<ScoredChunk>,
        query_tokens: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
                .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
        });

        let mut best_per_source: Vec<ScoredChunk> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for scored_chunk in scored {
            if seen.insert(scored_chunk.chunk.source_id.clone()) {
                best_per_source.push(scored_chunk);
            }
            if best_per_source.len() == limit {
                break;
            }
        }

        let mut hits = Vec::with_capacity(best_per_source.len());
        for ScoredChunk { chunk, score } in best_per_source {
            let state = self.ledger.lookup(&chunk.source_id).await?;
            let text_snippet = make_snippet(&chunk.text, query_tokens, SNIPPET_WINDOW);
            hits.push(SearchHit {
                source_id: chunk.source_id,
                display_name: chunk.display_name,
                file_type: chunk.file_type,
                size_bytes: state.as_ref().map(|s| s.size_bytes).unwrap_or(0),
                score,
                snippet: text_snippet,
                last_modified: state.map(|s| s.modified_at),
            });
        }
        Ok(hits)
    }
}

/// Min-max normalize a result set's scores to [0, 1]. A single-element or
/// constant set maps to 1.0.
fn normalize(scored: &[ScoredChunk]) -> Vec<f32> {
    if scored.is_empty() {
        return Vec::new();
    }
    let min = scored.iter().map(|s| s.score).fold(f32::INFINITY, f32::min);
    let max = scored.iter().map(|s| s.score).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    scored
        .iter()
        .map(|s| if range > 0.0 { (s.score - min) / range } else { 1.0 })
        .collect()
}
