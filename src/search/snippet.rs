//! Snippet extraction and highlighting.
//!
//! The snippet is the character window that covers the most distinct query
//! tokens (earliest window on ties), expanded to whitespace boundaries and
//! affixed with "..." where the text continues.

/// Default snippet window in characters.
pub const SNIPPET_WINDOW: usize = 200;

/// Byte spans of alphanumeric runs with their lowercased text.
fn token_spans(text: &str) -> Vec<(usize, usize, String)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            spans.push((s, idx, text[s..idx].to_lowercase()));
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len(), text[s..].to_lowercase()));
    }
    spans
}

/// Extract the snippet of `window` characters around the densest cluster of
/// query-token matches.
pub fn snippet(text: &str, query_tokens: &[String], window: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let n_chars = text.chars().count();
    if n_chars <= window {
        return text.trim().to_string();
    }

    let query: std::collections::HashSet<&str> =
        query_tokens.iter().map(|t| t.as_str()).collect();

    let spans = token_spans(text);
    let matches: Vec<&(usize, usize, String)> = spans
        .iter()
        .filter(|(_, _, token)| query.contains(token.as_str()))
        .collect();

    // Char position of each match, one pass over the text
    let mut match_chars = Vec::with_capacity(matches.len());
    {
        let mut char_pos = 0usize;
        let mut next = 0usize;
        for (byte, _) in text.char_indices() {
            if next < matches.len() && matches[next].0 == byte {
                match_chars.push(char_pos);
                next += 1;
            }
            char_pos += 1;
        }
    }

    let best_char = if matches.is_empty() {
        // No match anywhere: lead with the head of the document
        0
    } else {
        // For each match, count distinct query tokens inside the window
        // starting at it; keep the densest (earliest wins ties)
        let mut best_idx = 0usize;
        let mut best_count = 0usize;
        for i in 0..matches.len() {
            let mut seen = std::collections::HashSet::new();
            for j in i..matches.len() {
                if match_chars[j] - match_chars[i] >= window {
                    break;
                }
                seen.insert(matches[j].2.as_str());
            }
            if seen.len() > best_count {
                best_count = seen.len();
                best_idx = i;
            }
        }
        match_chars[best_idx]
    };

    // Center the window on the best position
    let half = window / 2;
    let start_char = best_char.saturating_sub(half);
    let end_char = (best_char + half).max(start_char + window).min(n_chars);
    let start_char = if end_char == n_chars {
        n_chars.saturating_sub(window)
    } else {
        start_char
    };

    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();

    // Expand to the nearest whitespace so words are not cut mid-way
    let mut start = offsets[start_char];
    if start > 0 {
        start = match text[..start].char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((ws, c)) => ws + c.len_utf8(),
            None => 0,
        };
    }
    let mut end = offsets[end_char];
    if end < text.len() {
        end = match text[end..].find(char::is_whitespace) {
            Some(ws) => end + ws,
            None => text.len(),
        };
    }

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(text[start..end].trim());
    if end < text.len() {
        out.push_str("...");
    }
    out
}

/// Wrap every query-token match in `**...**` markers. The marking is pure
/// text; UI clients may post-process it.
pub fn highlight(text: &str, query_tokens: &[String]) -> String {
    let query: std::collections::HashSet<&str> =
        query_tokens.iter().map(|t| t.as_str()).collect();

    let spans = token_spans(text);
    let mut out = String::with_capacity(text.len() + 16);
    let mut cursor = 0usize;

    for (start, end, token) in spans {
        if query.contains(token.as_str()) {
            out.push_str(&text[cursor..start]);
            out.push_str("**");
            out.push_str(&text[start..end]);
            out.push_str("**");
            cursor = end;
        }
    }
    out.push_str(&text[cursor..]);
    out
}
