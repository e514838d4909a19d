//! Chunk store: persistent vector + metadata store keyed by chunk id.
//!
//! Replacing a source's chunks, and the ledger entry that records them, is a
//! single SQLite transaction, so readers see either the previous complete
//! state or the new one. Deletion of old chunks happens before insertion of
//! the new ones within that transaction.

use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::db::Db;
use crate::error::{FindexError, Result};
use crate::ledger::{upsert_state, FileState};

/// A stored chunk with its metadata (no embedding).
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub source_id: String,
    pub ordinal: usize,
    pub text: String,
    pub display_name: String,
    pub file_type: String,
    pub total_in_source: usize,
}

/// A semantic query hit.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub chunk: ChunkRecord,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Store-level statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub embedded_chunks: usize,
    pub total_sources: usize,
}

/// Deterministic chunk id: SHA-256 over `source_id || ordinal`.
///
/// Stable across re-runs for unchanged sources, which is what makes
/// incremental re-indexing comparable across ledger snapshots.
pub fn chunk_id_for(source_id: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"::");
    hasher.update(ordinal.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Encode an embedding as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a BLOB back into an embedding. None if the length is not a
/// multiple of 4.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

/// Cosine similarity between two vectors. Zero-magnitude vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vectors must have the same length");

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// SQLite-backed chunk store.
#[derive(Clone)]
pub struct ChunkStore {
    db: Db,
}

impl ChunkStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Replace a source's chunks and write its ledger entry, atomically.
    ///
    /// `embeddings`, when present, must be parallel to `chunks`. Returns the
    /// new chunk ids in ordinal order.
    pub async fn replace_source(
        &self,
        state: FileState,
        chunks: Vec<(usize, String)>,
        embeddings: Option<Vec<Vec<f32>>>,
    ) -> Result<Vec<String>> {
        if let Some(ref vectors) = embeddings {
            if vectors.len() != chunks.len() {
                return Err(FindexError::Internal(format!(
                    "embedding count {} does not match chunk count {}",
                    vectors.len(),
                    chunks.len()
                )));
            }
        }

        let chunk_ids: Vec<String> = chunks
            .iter()
            .map(|(ordinal, _)| chunk_id_for(&state.source_id, *ordinal))
            .collect();
        let ids = chunk_ids.clone();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;

                tx.execute("DELETE FROM chunks WHERE source_id = ?1", params![state.source_id])?;

                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO chunks (chunk_id, source_id, ordinal, chunk_text, embedding,
                                             display_name, file_type, total_in_source)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;

                    let total = chunks.len();
                    for (i, (ordinal, text)) in chunks.iter().enumerate() {
                        let blob = embeddings.as_ref().map(|vs| vec_to_blob(&vs[i]));
                        stmt.execute(params![
                            ids[i],
                            state.source_id,
                            *ordinal as i64,
                            text,
                            blob,
                            state.display_name,
                            state.file_type,
                            total as i64,
                        ])?;
                    }
                }

                upsert_state(&tx, &state)?;

                tx.commit()?;
                Ok::<(), FindexError>(())
            })
            .await?;

        Ok(chunk_ids)
    }

    /// Delete a source's chunks and its ledger entry. Idempotent.
    pub async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        let source_id = source_id.to_string();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM chunks WHERE source_id = ?1", params![source_id])?;
                tx.execute("DELETE FROM sources WHERE source_id = ?1", params![source_id])?;
                tx.commit()?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Fetch chunk records by id, in the order given.
    pub async fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = chunk_ids.to_vec();

        let mut by_id = self
            .db
            .with_connection(move |conn| {
                let placeholders = wanted.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let sql = format!(
                    "SELECT chunk_id, source_id, ordinal, chunk_text, display_name, file_type,
                            total_in_source
                     FROM chunks WHERE chunk_id IN ({})",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(wanted.iter()),
                    row_to_chunk,
                )?;
                let mut map = std::collections::HashMap::new();
                for row in rows {
                    let record = row?;
                    map.insert(record.chunk_id.clone(), record);
                }
                Ok::<std::collections::HashMap<String, ChunkRecord>, FindexError>(map)
            })
            .await?;

        Ok(chunk_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Brute-force cosine query over every embedded chunk.
    ///
    /// Results are ordered by similarity descending and filtered by
    /// `threshold`; scores lie in [-1, 1].
    pub async fn query_semantic(
        &self,
        query_vec: Vec<f32>,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SemanticHit>> {
        let rows = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_id, source_id, ordinal, chunk_text, display_name, file_type,
                            total_in_source, embedding
                     FROM chunks WHERE embedding IS NOT NULL",
                )?;
                let mut rows = stmt.query([])?;
                let mut scored: Vec<(f32, ChunkRecord)> = Vec::new();
                while let Some(row) = rows.next()? {
                    let record = row_to_chunk(row)?;
                    let blob: Vec<u8> = row.get(7)?;
                    let embedding = match blob_to_vec(&blob) {
                        Some(e) if e.len() == query_vec.len() => e,
                        _ => continue,
                    };
                    let score = cosine_similarity(&query_vec, &embedding);
                    if score >= threshold {
                        scored.push((score, record));
                    }
                }
                Ok::<Vec<(f32, ChunkRecord)>, FindexError>(scored)
            })
            .await?;

        let mut scored = rows;
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| SemanticHit { chunk, score })
            .collect())
    }

    /// Every chunk's id and text, for rebuilding the lexical index at startup.
    pub async fn all_chunk_texts(&self) -> Result<Vec<(String, String)>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT chunk_id, chunk_text FROM chunks")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<Vec<(String, String)>, FindexError>(out)
            })
            .await
    }

    /// Chunk ids currently stored for a source, ordinal order.
    pub async fn chunk_ids_for_source(&self, source_id: &str) -> Result<Vec<String>> {
        let source_id = source_id.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_id FROM chunks WHERE source_id = ?1 ORDER BY ordinal",
                )?;
                let rows = stmt.query_map(params![source_id], |row| row.get::<_, String>(0))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                Ok::<Vec<String>, FindexError>(ids)
            })
            .await
    }

    /// Store statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.db
            .with_connection(|conn| {
                let total_chunks: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
                let embedded_chunks: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
                    [],
                    |r| r.get(0),
                )?;
                let total_sources: i64 =
                    conn.query_row("SELECT COUNT(*) FROM sources", [], |r| r.get(0))?;
                Ok::<StoreStats, FindexError>(StoreStats {
                    total_chunks: total_chunks as usize,
                    embedded_chunks: embedded_chunks as usize,
                    total_sources: total_sources as usize,
                })
            })
            .await
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        chunk_id: row.get(0)?,
        source_id: row.get(1)?,
        ordinal: row.get::<_, i64>(2)? as usize,
        text: row.get(3)?,
        display_name: row.get(4)?,
        file_type: row.get(5)?,
        total_in_source: row.get::<_, i64>(6)? as usize,
    })
}
