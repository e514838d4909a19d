//! Split extracted text into overlapping character windows.
//!
//! Windows target 1000 characters with 200 characters of overlap, preferring
//! to break at a sentence boundary within ±10% of the target. Chunking is a
//! pure function: the same input always yields the same ordinals and texts,
//! which keeps chunk ids stable across re-indexing runs.

/// Target window size in characters.
pub const CHUNK_SIZE: usize = 1000;
/// Overlap between consecutive windows in characters.
pub const CHUNK_OVERLAP: usize = 200;
/// Sentence boundaries are honored within this distance of the target.
const BOUNDARY_SLACK: usize = CHUNK_SIZE / 10;

/// Chunk text into `(ordinal, text)` windows.
///
/// Returns no chunks for empty (or whitespace-only) input and at least one
/// chunk otherwise. Ordinals are dense and contiguous from 0.
pub fn chunk(text: &str) -> Vec<(usize, String)> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // Work in characters, not bytes, so multi-byte input never splits
    // mid-character. offsets[i] is the byte offset of character i.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = offsets.len() - 1;

    if n_chars <= CHUNK_SIZE {
        return vec![(0, text.trim().to_string())];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n_chars {
        let hard_end = (start + CHUNK_SIZE).min(n_chars);

        let end = if hard_end < n_chars {
            find_sentence_break(text, &offsets, start, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };

        let piece = text[offsets[start]..offsets[end]].trim();
        if !piece.is_empty() {
            chunks.push((chunks.len(), piece.to_string()));
        }

        if end >= n_chars {
            break;
        }

        // Step back for overlap; guard against a non-advancing window.
        let next = end.saturating_sub(CHUNK_OVERLAP);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Look for the last sentence terminator within ±10% of the target end.
/// Returns the character index just past the terminator.
fn find_sentence_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    hard_end: usize,
) -> Option<usize> {
    let lo = hard_end.saturating_sub(BOUNDARY_SLACK).max(start + 1);
    let hi = (hard_end + BOUNDARY_SLACK).min(offsets.len() - 1);

    let window = &text[offsets[lo]..offsets[hi]];
    let mut best: Option<usize> = None;
    for (i, c) in window.chars().enumerate() {
        if matches!(c, '.' | '!' | '?') {
            best = Some(lo + i + 1);
        }
    }
    best
}
