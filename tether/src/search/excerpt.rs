//! Excerpt extraction for search hits.

use super::bm25::tokenize;

/// Returns a window of roughly `max_chars` around the first query term found
/// in `text`, with ellipses where the window cuts the text. Falls back to the
/// head of the text when no term matches.
pub fn excerpt_around(text: &str, query: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let lowered = text.to_lowercase();
    let position = tokenize(query)
        .iter()
        .filter_map(|term| lowered.find(term.as_str()))
        .min()
        .unwrap_or(0);

    let half = max_chars / 2;
    let mut start = position.saturating_sub(half);
    let mut end = (start + max_chars).min(text.len());
    if end - start < max_chars {
        start = end.saturating_sub(max_chars);
    }
    // Keep char boundaries.
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }

    let mut excerpt = String::new();
    if start > 0 {
        excerpt.push('…');
    }
    excerpt.push_str(text[start..end].trim());
    if end < text.len() {
        excerpt.push('…');
    }
    excerpt
}
