use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

/// Metadata for a discovered file
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Absolute path; doubles as the source id for local files
    pub source_id: String,
    pub path: PathBuf,
    pub display_name: String,
    pub size_bytes: u64,
    /// mtime as unix seconds
    pub modified_at: i64,
}

/// Directory names excluded from walks, beyond the hidden-entry rule.
const SKIP_DIRS: &[&str] = &["node_modules", "__pycache__", "dist", "build"];

/// Temp-file suffixes excluded from walks.
const SKIP_SUFFIXES: &[&str] = &[".tmp", ".log"];

fn is_skipped(entry: &DirEntry) -> bool {
    // The walk root itself is never skipped, even if hidden
    if entry.depth() == 0 {
        return false;
    }

    let name = entry.file_name().to_string_lossy();

    // Hidden entries cover VCS (.git, .svn) and editor (.vscode, .idea) dirs
    if name.starts_with('.') {
        return true;
    }

    if entry.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()) {
        return true;
    }

    let lowered = name.to_lowercase();
    if entry.file_type().is_file() && SKIP_SUFFIXES.iter().any(|s| lowered.ends_with(s)) {
        return true;
    }

    false
}

/// Walk `root` and return every indexable file, applying the skip rules.
///
/// Symlinks are not followed: a walk never leaves the registered root, and
/// every `source_id` stays under it. All regular files survive the walk;
/// unsupported formats are rejected later by the extractor so the skip shows
/// up in task statistics.
pub fn discover_files(root: &Path) -> Result<Vec<FileMetadata>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let metadata = std::fs::metadata(path)?;
        let modified_at = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(FileMetadata {
            source_id: path.to_string_lossy().to_string(),
            path: path.to_path_buf(),
            display_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size_bytes: metadata.len(),
            modified_at,
        });
    }

    // Stable ordering keeps task progress and tests deterministic
    files.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    log::info!("Discovered {} files in {}", files.len(), root.display());
    Ok(files)
}
