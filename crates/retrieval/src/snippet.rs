use std::collections::HashSet;

pub const DEFAULT_SNIPPET_WINDOW: usize = 20;

const STRIP: &[char] = &['.', ',', '?', '!'];

/// Excerpt of `text` around the first word that also appears in `query`:
/// `window / 2` words before it up to (not including) `window / 2` words after.
/// Without a match, the first `window` words.
pub fn best_snippet(query: &str, text: &str, window: usize) -> String {
    let words = text.split_whitespace().collect::<Vec<_>>();
    let query_tokens = query
        .to_lowercase()
        .split_whitespace()
        .map(|token| token.trim_matches(STRIP).to_string())
        .collect::<HashSet<_>>();

    let half = window / 2;
    let hit = words
        .iter()
        .position(|word| query_tokens.contains(word.to_lowercase().trim_matches(STRIP)));

    match hit {
        Some(idx) => {
            let start = idx.saturating_sub(half);
            let end = (idx + half).min(words.len());
            words[start..end].join(" ")
        }
        None => words
            .iter()
            .take(window)
            .copied()
            .collect::<Vec<_>>()
            .join(" "),
    }
}
