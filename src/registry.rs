//! Directory registry: registered root paths and their lifecycle state.
//!
//! The scheduler owns status mutations while a task runs; everything else
//! reads snapshots.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::db::Db;
use crate::error::{FindexError, Result};

/// Directory lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirStatus {
    NotIndexed,
    Indexing,
    Indexed,
    Error,
}

impl DirStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirStatus::NotIndexed => "not_indexed",
            DirStatus::Indexing => "indexing",
            DirStatus::Indexed => "indexed",
            DirStatus::Error => "error",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "indexing" => DirStatus::Indexing,
            "indexed" => DirStatus::Indexed,
            "error" => DirStatus::Error,
            _ => DirStatus::NotIndexed,
        }
    }
}

/// One registered directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub name: String,
    pub status: DirStatus,
    pub progress: f64,
    pub total_files: usize,
    pub indexed_files: usize,
    pub last_task_id: Option<String>,
    pub last_error: Option<String>,
    pub last_indexed_at: Option<String>,
}

/// Registry access over the `directories` table.
#[derive(Clone)]
pub struct DirectoryRegistry {
    db: Db,
}

impl DirectoryRegistry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Register a directory.
    ///
    /// The path must exist and be a directory; registering the same path
    /// twice is a conflict.
    pub async fn add(&self, path: &str) -> Result<DirectoryEntry> {
        let fs_path = Path::new(path);
        if !fs_path.exists() {
            return Err(FindexError::NotFound(format!("directory not found: {}", path)));
        }
        if !fs_path.is_dir() {
            return Err(FindexError::InvalidInput(format!("path is not a directory: {}", path)));
        }

        let name = fs_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());

        let path_owned = path.to_string();
        let name_clone = name.clone();
        self.db
            .with_connection(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO directories (path, name) VALUES (?1, ?2)",
                    params![path_owned, name_clone],
                )?;
                if inserted == 0 {
                    return Err(FindexError::Conflict(format!(
                        "directory already registered: {}",
                        path_owned
                    )));
                }
                Ok::<(), FindexError>(())
            })
            .await?;

        self.get(path).await?.ok_or_else(|| {
            FindexError::Internal("directory vanished after registration".to_string())
        })
    }

    /// Drop the registry record. The caller is responsible for purging
    /// chunks and ledger entries first.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.db
            .with_connection(move |conn| {
                let deleted = conn.execute("DELETE FROM directories WHERE path = ?1", params![path])?;
                if deleted == 0 {
                    return Err(FindexError::NotFound(format!("directory not found: {}", path)));
                }
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Snapshot of all registered directories.
    pub async fn list(&self) -> Result<Vec<DirectoryEntry>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT path, name, status, progress, total_files, indexed_files,
                            last_task_id, last_error, last_indexed_at
                     FROM directories ORDER BY path",
                )?;
                let rows = stmt.query_map([], row_to_entry)?;
                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?);
                }
                Ok::<Vec<DirectoryEntry>, FindexError>(entries)
            })
            .await
    }

    /// Snapshot of one directory.
    pub async fn get(&self, path: &str) -> Result<Option<DirectoryEntry>> {
        let path = path.to_string();
        self.db
            .with_connection(move |conn| {
                let entry = conn
                    .query_row(
                        "SELECT path, name, status, progress, total_files, indexed_files,
                                last_task_id, last_error, last_indexed_at
                         FROM directories WHERE path = ?1",
                        params![path],
                        row_to_entry,
                    )
                    .optional()?;
                Ok::<Option<DirectoryEntry>, FindexError>(entry)
            })
            .await
    }

    /// Transition to `indexing` for a new task: resets counters and clears
    /// the previous error.
    pub async fn begin_indexing(&self, path: &str, task_id: &str) -> Result<()> {
        let path = path.to_string();
        let task_id = task_id.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE directories
                     SET status = 'indexing', progress = 0.0, total_files = 0,
                         indexed_files = 0, last_task_id = ?2, last_error = NULL
                     WHERE path = ?1",
                    params![path, task_id],
                )?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Update progress counters while a task runs.
    /// progress = indexed / max(total, 1).
    pub async fn update_progress(&self, path: &str, indexed_files: usize, total_files: usize) -> Result<()> {
        let path = path.to_string();
        let progress = indexed_files as f64 / total_files.max(1) as f64;
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE directories
                     SET progress = ?2, total_files = ?3, indexed_files = ?4
                     WHERE path = ?1",
                    params![path, progress, total_files as i64, indexed_files as i64],
                )?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Terminal transition after a successful task.
    pub async fn mark_indexed(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        let now = Utc::now().to_rfc3339();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE directories
                     SET status = 'indexed', progress = 1.0, last_indexed_at = ?2
                     WHERE path = ?1",
                    params![path, now],
                )?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Terminal transition after a failed task.
    pub async fn mark_error(&self, path: &str, message: &str) -> Result<()> {
        let path = path.to_string();
        let message = message.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE directories SET status = 'error', last_error = ?2 WHERE path = ?1",
                    params![path, message],
                )?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Transition after a cancelled task: the partial index is valid, so the
    /// directory lands on `indexed` with its partial counters preserved.
    pub async fn mark_cancelled(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE directories SET status = 'indexed' WHERE path = ?1",
                    params![path],
                )?;
                Ok::<(), FindexError>(())
            })
            .await
    }

    /// Reset directories stuck in `indexing` after a restart. Tasks do not
    /// survive the process; the partial index on disk stays valid.
    pub async fn reset_interrupted(&self) -> Result<usize> {
        self.db
            .with_connection(|conn| {
                let updated = conn.execute(
                    "UPDATE directories
                     SET status = 'error', last_error = 'indexing interrupted by restart'
                     WHERE status = 'indexing'",
                    [],
                )?;
                Ok::<usize, FindexError>(updated)
            })
            .await
    }

    /// Per-status directory counts, for the stats endpoint.
    pub async fn status_counts(&self) -> Result<Vec<(String, usize)>> {
        self.db
            .with_connection(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM directories GROUP BY status")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })?;
                let mut counts = Vec::new();
                for row in rows {
                    counts.push(row?);
                }
                Ok::<Vec<(String, usize)>, FindexError>(counts)
            })
            .await
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectoryEntry> {
    Ok(DirectoryEntry {
        path: row.get(0)?,
        name: row.get(1)?,
        status: DirStatus::from_str(&row.get::<_, String>(2)?),
        progress: row.get(3)?,
        total_files: row.get::<_, i64>(4)? as usize,
        indexed_files: row.get::<_, i64>(5)? as usize,
        last_task_id: row.get(6)?,
        last_error: row.get(7)?,
        last_indexed_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    async fn setup() -> (DirectoryRegistry, TempDir, TempDir) {
        let db_dir = TempDir::new().unwrap();
        let docs_dir = TempDir::new().unwrap();
        let db = Db::new(db_dir.path().join("test.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| crate::db::migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (DirectoryRegistry::new(db), db_dir, docs_dir)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();

        let entry = registry.add(path).await.unwrap();
        assert_eq!(entry.status, DirStatus::NotIndexed);
        assert_eq!(entry.progress, 0.0);

        let fetched = registry.get(path).await.unwrap().unwrap();
        assert_eq!(fetched.path, path);
    }

    #[tokio::test]
    async fn test_add_missing_path() {
        let (registry, _db_dir, _docs_dir) = setup().await;
        let err = registry.add("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, FindexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_file_rejected() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let file = docs_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let err = registry.add(file.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, FindexError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_add_duplicate_conflict() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();

        registry.add(path).await.unwrap();
        let err = registry.add(path).await.unwrap_err();
        assert!(matches!(err, FindexError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();
        registry.add(path).await.unwrap();

        registry.begin_indexing(path, "dir_123_docs").await.unwrap();
        let entry = registry.get(path).await.unwrap().unwrap();
        assert_eq!(entry.status, DirStatus::Indexing);
        assert_eq!(entry.last_task_id.as_deref(), Some("dir_123_docs"));

        registry.update_progress(path, 5, 10).await.unwrap();
        let entry = registry.get(path).await.unwrap().unwrap();
        assert!((entry.progress - 0.5).abs() < 1e-9);
        assert_eq!(entry.indexed_files, 5);
        assert_eq!(entry.total_files, 10);

        registry.mark_indexed(path).await.unwrap();
        let entry = registry.get(path).await.unwrap().unwrap();
        assert_eq!(entry.status, DirStatus::Indexed);
        assert_eq!(entry.progress, 1.0);
        assert!(entry.last_indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_with_zero_total() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();
        registry.add(path).await.unwrap();

        // Empty directory: denominator clamps to 1
        registry.update_progress(path, 0, 0).await.unwrap();
        let entry = registry.get(path).await.unwrap().unwrap();
        assert_eq!(entry.progress, 0.0);
    }

    #[tokio::test]
    async fn test_mark_error() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();
        registry.add(path).await.unwrap();

        registry.mark_error(path, "walk failed").await.unwrap();
        let entry = registry.get(path).await.unwrap().unwrap();
        assert_eq!(entry.status, DirStatus::Error);
        assert_eq!(entry.last_error.as_deref(), Some("walk failed"));

        // A new task clears the error
        registry.begin_indexing(path, "dir_456_docs").await.unwrap();
        let entry = registry.get(path).await.unwrap().unwrap();
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();
        registry.add(path).await.unwrap();

        registry.remove(path).await.unwrap();
        assert!(registry.get(path).await.unwrap().is_none());

        let err = registry.remove(path).await.unwrap_err();
        assert!(matches!(err, FindexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reset_interrupted() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let path = docs_dir.path().to_str().unwrap();
        registry.add(path).await.unwrap();
        registry.begin_indexing(path, "dir_1_docs").await.unwrap();

        let reset = registry.reset_interrupted().await.unwrap();
        assert_eq!(reset, 1);

        let entry = registry.get(path).await.unwrap().unwrap();
        assert_eq!(entry.status, DirStatus::Error);
        assert!(entry.last_error.unwrap().contains("interrupted"));

        // Nothing left to reset
        assert_eq!(registry.reset_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_snapshot() {
        let (registry, _db_dir, docs_dir) = setup().await;
        let other = TempDir::new().unwrap();

        registry.add(docs_dir.path().to_str().unwrap()).await.unwrap();
        registry.add(other.path().to_str().unwrap()).await.unwrap();

        let entries = registry.list().await.unwrap();
        assert_eq!(entries.len(), 2);
    }
}
