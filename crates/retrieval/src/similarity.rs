use std::collections::HashSet;

use tracing::warn;

use crate::tokenize::tokenize;

/// Cosine similarity; mismatched, empty or zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut a_norm = 0.0;
    let mut b_norm = 0.0;

    for (lhs, rhs) in a.iter().zip(b.iter()) {
        dot += lhs * rhs;
        a_norm += lhs * lhs;
        b_norm += rhs * rhs;
    }

    if a_norm == 0.0 || b_norm == 0.0 {
        0.0
    } else {
        dot / (a_norm.sqrt() * b_norm.sqrt())
    }
}

/// Best cosine score of `query` against JSON-encoded chunk embeddings.
/// Missing or undecodable embeddings are skipped. The floor is 0.
pub fn best_embedding_score<'a, I>(query: &[f32], candidates: I) -> f32
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut best = 0.0_f32;

    for raw in candidates.into_iter().flatten() {
        match serde_json::from_str::<Vec<f32>>(raw) {
            Ok(vector) => best = best.max(cosine_similarity(query, &vector)),
            Err(error) => warn!(%error, "skipping undecodable chunk embedding"),
        }
    }

    best
}

/// Share of query tokens that also appear in `text`.
pub fn lexical_overlap(query: &str, text: &str) -> f32 {
    let query_tokens = tokenize(query).into_iter().collect::<HashSet<_>>();
    if query_tokens.is_empty() {
        return 0.0;
    }

    let text_tokens = tokenize(text).into_iter().collect::<HashSet<_>>();
    let overlap = query_tokens
        .iter()
        .filter(|token| text_tokens.contains(*token))
        .count() as f32;

    overlap / query_tokens.len() as f32
}
