use once_cell::sync::Lazy;
use regex::Regex;

static CLEANER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{Nd}\s]+").expect("valid tokenizer regex"));

/// Lower-cased word tokens with punctuation removed; single characters are dropped.
pub fn tokenize(input: &str) -> Vec<String> {
    let normalized = CLEANER.replace_all(input, " ").to_lowercase();

    normalized
        .split_whitespace()
        .filter(|token| token.chars().count() > 1)
        .map(|token| token.to_string())
        .collect()
}
