//! Indexing scheduler: per-directory background ingest tasks.
//!
//! Tasks run on the tokio runtime under a global concurrency cap. A task for
//! a directory that is already being indexed is not queued twice; the caller
//! gets the running task's id back. Cancellation is cooperative at file
//! boundaries, so a cancelled task leaves a valid partial index behind.

pub mod walker;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::error::{FindexError, Result};
use crate::extract::ExtractorRegistry;
use crate::index::LexicalIndex;
use crate::ledger::{classify, content_hash, metadata_unchanged, new_state, Change, Ledger};
use crate::registry::DirectoryRegistry;
use crate::store::ChunkStore;
use crate::text::{chunk, tokenize};

pub use walker::{discover_files, FileMetadata};

/// Lifecycle of one indexing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Ingest statistics accumulated by a task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub total_files: usize,
    pub new_files: usize,
    pub modified_files: usize,
    pub unchanged_files: usize,
    pub deleted_files: usize,
    pub skipped_files: usize,
    pub total_chunks: usize,
}

impl IngestStats {
    fn summary(&self) -> String {
        format!(
            "new={} modified={} unchanged={} deleted={} skipped={} chunks={}",
            self.new_files,
            self.modified_files,
            self.unchanged_files,
            self.deleted_files,
            self.skipped_files,
            self.total_chunks
        )
    }
}

/// Snapshot of a task's state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub path: String,
    pub state: TaskState,
    pub stats: IngestStats,
    pub message: Option<String>,
}

struct Task {
    status: Mutex<TaskStatus>,
    cancel: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    store: ChunkStore,
    ledger: Ledger,
    registry: DirectoryRegistry,
    lexical: Arc<LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    extractors: Arc<ExtractorRegistry>,
    embed_batch_size: usize,
    allow_degraded: bool,
    semantic_enabled: bool,
    semaphore: Semaphore,
    tasks: Mutex<HashMap<String, Arc<Task>>>,
    /// directory path -> running task id; enforces per-directory serialization
    running: Mutex<HashMap<String, String>>,
}

/// Handle shared by the API layer and `main`.
#[derive(Clone)]
pub struct IndexScheduler {
    inner: Arc<SchedulerInner>,
}

impl IndexScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ChunkStore,
        ledger: Ledger,
        registry: DirectoryRegistry,
        lexical: Arc<LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        extractors: Arc<ExtractorRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                ledger,
                registry,
                lexical,
                embedder,
                extractors,
                embed_batch_size: config.indexing.embed_batch_size,
                allow_degraded: config.embeddings.allow_degraded,
                semantic_enabled: config.embeddings.provider != "disabled",
                semaphore: Semaphore::new(config.indexing.max_concurrent_tasks),
                tasks: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start (or join) an indexing task for a registered directory.
    ///
    /// Returns immediately with the task id. A refresh request for a
    /// directory that is already indexing returns the existing task id.
    pub async fn spawn(&self, path: &str) -> Result<String> {
        if let Some(existing) = self.inner.running.lock().unwrap().get(path).cloned() {
            return Ok(existing);
        }

        let task_id = make_task_id(path);
        let task = Arc::new(Task {
            status: Mutex::new(TaskStatus {
                id: task_id.clone(),
                path: path.to_string(),
                state: TaskState::Queued,
                stats: IngestStats::default(),
                message: None,
            }),
            cancel: AtomicBool::new(false),
            join: Mutex::new(None),
        });

        self.inner
            .tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), Arc::clone(&task));
        self.inner
            .running
            .lock()
            .unwrap()
            .insert(path.to_string(), task_id.clone());

        if let Err(e) = self.inner.registry.begin_indexing(path, &task_id).await {
            self.inner.running.lock().unwrap().remove(path);
            self.inner.tasks.lock().unwrap().remove(&task_id);
            return Err(e);
        }

        let inner = Arc::clone(&self.inner);
        let task_for_run = Arc::clone(&task);
        let path_owned = path.to_string();
        let handle = tokio::spawn(async move {
            run_task(inner, task_for_run, path_owned).await;
        });
        *task.join.lock().unwrap() = Some(handle);

        Ok(task_id)
    }

    /// Request cancellation of a task. Returns false for unknown ids.
    pub fn cancel(&self, task_id: &str) -> bool {
        let tasks = self.inner.tasks.lock().unwrap();
        match tasks.get(task_id) {
            Some(task) => {
                task.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Snapshot of a task.
    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        let tasks = self.inner.tasks.lock().unwrap();
        tasks.get(task_id).map(|t| t.status.lock().unwrap().clone())
    }

    /// Cancel the directory's running task (if any) and wait for it to
    /// settle. Used before purging a directory.
    pub async fn cancel_directory_and_wait(&self, path: &str) -> Result<()> {
        let task = {
            let running = self.inner.running.lock().unwrap();
            let tasks = self.inner.tasks.lock().unwrap();
            running.get(path).and_then(|id| tasks.get(id)).cloned()
        };

        if let Some(task) = task {
            task.cancel.store(true, Ordering::SeqCst);
            let handle = task.join.lock().unwrap().take();
            if let Some(handle) = handle {
                handle
                    .await
                    .map_err(|e| FindexError::Internal(format!("task join failed: {}", e)))?;
            }
        }
        Ok(())
    }

    /// Remove a directory entirely: cancel its task, delete every chunk and
    /// ledger entry under the path, then drop the registry record.
    pub async fn purge_directory(&self, path: &str) -> Result<usize> {
        self.cancel_directory_and_wait(path).await?;

        let prefix = dir_prefix(path);
        let mut removed = 0usize;
        for state in self.inner.ledger.list_under(&prefix).await? {
            let old_ids = self.inner.store.chunk_ids_for_source(&state.source_id).await?;
            self.inner.store.delete_by_source(&state.source_id).await?;
            self.inner.lexical.remove_many(&old_ids);
            removed += 1;
        }

        self.inner.registry.remove(path).await?;
        log::info!("Removed directory {} ({} sources purged)", path, removed);
        Ok(removed)
    }

    /// Wait for a task to reach a terminal state (used by tests).
    #[cfg(test)]
    pub async fn wait_for(&self, task_id: &str) {
        loop {
            match self.task_status(task_id).map(|s| s.state) {
                Some(TaskState::Queued) | Some(TaskState::Running) => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                _ => return,
            }
        }
    }
}

/// Task ids: `dir_<unix_ms>_<slug(path basename)>`.
fn make_task_id(path: &str) -> String {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("dir_{}_{}", ms, slug(path))
}

fn slug(path: &str) -> String {
    let base = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    base.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Source-id prefix covering everything under a directory.
fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches(std::path::MAIN_SEPARATOR);
    format!("{}{}", trimmed, std::path::MAIN_SEPARATOR)
}

enum FileOutcome {
    New(usize),
    Modified(usize),
    Unchanged,
    Skipped,
}

async fn run_task(inner: Arc<SchedulerInner>, task: Arc<Task>, path: String) {
    // Concurrency cap: queued until a permit frees up
    let _permit = match inner.semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => return,
    };
    task.status.lock().unwrap().state = TaskState::Running;

    let result = run_ingest(&inner, &task, &path).await;

    // The directory is free for a new task from here on
    inner.running.lock().unwrap().remove(&path);

    let task_id = task.status.lock().unwrap().id.clone();
    match result {
        Ok(cancelled) => {
            let summary = task.status.lock().unwrap().stats.summary();
            if cancelled {
                let _ = inner.registry.mark_cancelled(&path).await;
                let mut status = task.status.lock().unwrap();
                status.state = TaskState::Cancelled;
                status.message = Some(format!("cancelled: {}", summary));
                log::info!("Task {} cancelled ({})", task_id, summary);
            } else {
                let _ = inner.registry.mark_indexed(&path).await;
                let mut status = task.status.lock().unwrap();
                status.state = TaskState::Completed;
                status.message = Some(summary.clone());
                log::info!("Task {} completed ({})", task_id, summary);
            }
        }
        Err(e) => {
            // Chunks already ingested stay; incremental progress is preserved
            let _ = inner.registry.mark_error(&path, &e.to_string()).await;
            let mut status = task.status.lock().unwrap();
            status.state = TaskState::Failed;
            status.message = Some(e.to_string());
            log::error!("Task {} failed: {}", task_id, e);
        }
    }
}

/// Walk, classify, ingest, reconcile. Returns whether the task was cancelled.
async fn run_ingest(inner: &Arc<SchedulerInner>, task: &Arc<Task>, path: &str) -> Result<bool> {
    let root = std::path::PathBuf::from(path);
    let files = tokio::task::spawn_blocking(move || discover_files(&root))
        .await
        .map_err(|e| FindexError::Internal(format!("walk task panicked: {}", e)))??;

    let total = files.len();
    task.status.lock().unwrap().stats.total_files = total;
    inner.registry.update_progress(path, 0, total).await?;

    let mut observed: HashSet<String> = HashSet::with_capacity(total);
    let mut processed = 0usize;
    let mut cancelled = false;

    for file in files {
        if task.cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }

        observed.insert(file.source_id.clone());

        let outcome = process_file(inner, &file).await;
        {
            let mut status = task.status.lock().unwrap();
            match outcome {
                Ok(FileOutcome::New(chunks)) => {
                    status.stats.new_files += 1;
                    status.stats.total_chunks += chunks;
                }
                Ok(FileOutcome::Modified(chunks)) => {
                    status.stats.modified_files += 1;
                    status.stats.total_chunks += chunks;
                }
                Ok(FileOutcome::Unchanged) => status.stats.unchanged_files += 1,
                Ok(FileOutcome::Skipped) => status.stats.skipped_files += 1,
                Err(FindexError::EmbedderUnavailable(msg)) => {
                    // Without degraded mode the task cannot make progress
                    return Err(FindexError::EmbedderUnavailable(msg));
                }
                Err(e) => {
                    // Per-file errors are swallowed into task statistics
                    log::warn!("Error processing {}: {}", file.source_id, e);
                    status.stats.skipped_files += 1;
                }
            }
        }

        processed += 1;
        inner.registry.update_progress(path, processed, total).await?;
    }

    if !cancelled {
        reconcile_deleted(inner, task, path, &observed).await?;
    }

    Ok(cancelled)
}

/// Classify one file against the ledger and ingest it if needed.
async fn process_file(inner: &Arc<SchedulerInner>, file: &FileMetadata) -> Result<FileOutcome> {
    let prior = inner.ledger.lookup(&file.source_id).await?;

    // Metadata fast path: same size and mtime means skip without extracting
    if let Some(ref state) = prior {
        if metadata_unchanged(state, file.size_bytes, file.modified_at) {
            return Ok(FileOutcome::Unchanged);
        }
    }

    let extractors = Arc::clone(&inner.extractors);
    let file_path = file.path.clone();
    let extracted = match tokio::task::spawn_blocking(move || extractors.extract(&file_path))
        .await
        .map_err(|e| FindexError::Internal(format!("extract task panicked: {}", e)))?
    {
        Ok(extracted) => extracted,
        Err(err) => {
            log::warn!("Skipping {} ({}): {}", file.source_id, err.reason(), err);
            return Ok(FileOutcome::Skipped);
        }
    };

    let hash = content_hash(&extracted.text);
    let change = classify(prior.as_ref(), &hash);

    if change == Change::Unchanged {
        // Touched without edits: refresh the metadata so the fast path
        // applies on the next scan
        if let Some(mut state) = prior {
            state.size_bytes = file.size_bytes;
            state.modified_at = file.modified_at;
            inner.ledger.put(state).await?;
        }
        return Ok(FileOutcome::Unchanged);
    }

    let chunks = chunk(&extracted.text);
    let embeddings = if chunks.is_empty() || !inner.semantic_enabled {
        None
    } else {
        match embed_chunks(inner, &chunks).await {
            Ok(vectors) => Some(vectors),
            Err(e) if inner.allow_degraded => {
                log::warn!("Embedding failed for {}, indexing keyword-only: {}", file.source_id, e);
                None
            }
            Err(e) => return Err(e),
        }
    };

    // Old chunk ids must leave the lexical index after the store swap
    let old_ids = inner.store.chunk_ids_for_source(&file.source_id).await?;

    let chunk_count = chunks.len();
    let state = new_state(
        &file.source_id,
        &file.display_name,
        &extracted.file_type,
        file.size_bytes,
        file.modified_at,
        &hash,
        chunk_count,
    );

    let new_ids = inner
        .store
        .replace_source(state, chunks.clone(), embeddings)
        .await?;

    inner.lexical.remove_many(&old_ids);
    for (i, (_, text)) in chunks.iter().enumerate() {
        inner.lexical.add(&new_ids[i], &tokenize(text));
    }

    match change {
        Change::New => Ok(FileOutcome::New(chunk_count)),
        Change::Modified => Ok(FileOutcome::Modified(chunk_count)),
        Change::Unchanged => unreachable!("handled above"),
    }
}

/// Embed chunk texts in ingest-sized batches, preserving order.
async fn embed_chunks(
    inner: &Arc<SchedulerInner>,
    chunks: &[(usize, String)],
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(inner.embed_batch_size) {
        let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
        vectors.extend(inner.embedder.embed_batch(texts).await?);
    }
    Ok(vectors)
}

/// Drop ledger entries (and their chunks) for files that vanished.
async fn reconcile_deleted(
    inner: &Arc<SchedulerInner>,
    task: &Arc<Task>,
    path: &str,
    observed: &HashSet<String>,
) -> Result<()> {
    let prefix = dir_prefix(path);
    for state in inner.ledger.list_under(&prefix).await? {
        if observed.contains(&state.source_id) {
            continue;
        }
        let old_ids = inner.store.chunk_ids_for_source(&state.source_id).await?;
        inner.store.delete_by_source(&state.source_id).await?;
        inner.lexical.remove_many(&old_ids);
        task.status.lock().unwrap().stats.deleted_files += 1;
        log::info!("Pruned deleted source {}", state.source_id);
    }
    Ok(())
}
