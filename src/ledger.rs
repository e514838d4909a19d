//! File-state ledger: the durable record of the last-seen state of every
//! indexed source, used to classify changes between scans.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::db::Db;
use crate::error::{FindexError, Result};

/// Ledger entry for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct FileState {
    pub source_id: String,
    pub display_name: String,
    pub file_type: String,
    pub size_bytes: u64,
    /// Unix seconds of the source's mtime at index time
    pub modified_at: i64,
    /// SHA-256 (hex) over the extracted text; the authoritative change signal
    pub content_hash: String,
    pub chunk_count: usize,
    /// RFC 3339 timestamp of the last successful index of this source
    pub indexed_at: String,
}

/// Classification of a freshly observed source against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No ledger entry for this source
    New,
    /// Metadata and/or content unchanged; nothing to do
    Unchanged,
    /// Content hash differs; chunks must be replaced
    Modified,
}

/// Cheap pre-check based on metadata only, before extraction.
///
/// When size and mtime both match the ledger entry, the content is assumed
/// unchanged and the file is skipped without re-extracting.
pub fn metadata_unchanged(state: &FileState, size_bytes: u64, modified_at: i64) -> bool {
    state.size_bytes == size_bytes && state.modified_at == modified_at
}

/// Classify a source given its freshly computed content hash.
///
/// Metadata-only touches (new mtime, same hash) classify as `Unchanged`.
pub fn classify(prior: Option<&FileState>, content_hash: &str) -> Change {
    match prior {
        None => Change::New,
        Some(state) if state.content_hash == content_hash => Change::Unchanged,
        Some(_) => Change::Modified,
    }
}

/// SHA-256 (hex) over extracted text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ledger access over the `sources` table.
#[derive(Clone)]
pub struct Ledger {
    db: Db,
}

impl Ledger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Fetch the ledger entry for a source, if any.
    pub async fn lookup(&self, source_id: &str) -> Result<Option<FileState>> {
        let source_id = source_id.to_string();
        self.db
            .with_connection(move |conn| {
                let state = conn
                    .query_row(
                        "SELECT source_id, display_name, file_type, size_bytes, modified_at,
                                content_hash, chunk_count, indexed_at
                         FROM sources WHERE source_id = ?1",
                        params![source_id],
                        row_to_state,
                    )
                    .optional()?;
                Ok::<Option<FileState>, FindexError>(state)
            })
            .await
    }

    /// Insert or replace a ledger entry.
    ///
    /// Normal ingest writes the entry inside the chunk store's transaction;
    /// this standalone path exists for sources that produce no chunks
    /// (e.g. files whose extracted text is empty).
    pub async fn put(&self, state: FileState) -> Result<()> {
        self.db
            .with_connection(move |conn| {
                upsert_state(conn, &state)?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Remove a ledger entry. Idempotent.
    pub async fn forget(&self, source_id: &str) -> Result<()> {
        let source_id = source_id.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute("DELETE FROM sources WHERE source_id = ?1", params![source_id])?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// All ledger entries whose source id starts with `prefix`.
    ///
    /// Used by directory reconciliation and removal. Remote source ids are
    /// opaque strings, so prefix matching applies uniformly.
    pub async fn list_under(&self, prefix: &str) -> Result<Vec<FileState>> {
        let prefix = prefix.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT source_id, display_name, file_type, size_bytes, modified_at,
                            content_hash, chunk_count, indexed_at
                     FROM sources ORDER BY source_id",
                )?;
                let rows = stmt.query_map([], row_to_state)?;
                let mut states = Vec::new();
                for row in rows {
                    let state = row?;
                    if state.source_id.starts_with(&prefix) {
                        states.push(state);
                    }
                }
                Ok::<Vec<FileState>, FindexError>(states)
            })
            .await
    }

    /// Total number of ledger entries.
    pub async fn count(&self) -> Result<usize> {
        self.db
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM sources", [], |r| r.get(0))?;
                Ok::<usize, FindexError>(n as usize)
            })
            .await
    }
}

pub(crate) fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileState> {
    Ok(FileState {
        source_id: row.get(0)?,
        display_name: row.get(1)?,
        file_type: row.get(2)?,
        size_bytes: row.get::<_, i64>(3)? as u64,
        modified_at: row.get(4)?,
        content_hash: row.get(5)?,
        chunk_count: row.get::<_, i64>(6)? as usize,
        indexed_at: row.get(7)?,
    })
}

pub(crate) fn upsert_state(conn: &rusqlite::Connection, state: &FileState) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sources (source_id, display_name, file_type, size_bytes, modified_at,
                              content_hash, chunk_count, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(source_id) DO UPDATE SET
             display_name = excluded.display_name,
             file_type = excluded.file_type,
             size_bytes = excluded.size_bytes,
             modified_at = excluded.modified_at,
             content_hash = excluded.content_hash,
             chunk_count = excluded.chunk_count,
             indexed_at = excluded.indexed_at",
        params![
            state.source_id,
            state.display_name,
            state.file_type,
            state.size_bytes as i64,
            state.modified_at,
            state.content_hash,
            state.chunk_count as i64,
            state.indexed_at,
        ],
    )?;
    Ok(())
}

/// Build a ledger entry for a freshly indexed source.
pub fn new_state(
    source_id: &str,
    display_name: &str,
    file_type: &str,
    size_bytes: u64,
    modified_at: i64,
    hash: &str,
    chunk_count: usize,
) -> FileState {
    FileState {
        source_id: source_id.to_string(),
        display_name: display_name.to_string(),
        file_type: file_type.to_string(),
        size_bytes,
        modified_at,
        content_hash: hash.to_string(),
        chunk_count,
        indexed_at: Utc::now().to_rfc3339(),
    }
}
