//! Query normalization: the cache key pipeline.
//!
//! lowercase → strip punctuation → drop stopwords (both supported languages)
//! → sort remaining tokens. The sorted-token form makes the key insensitive to
//! word order, so "reset password please" and "please reset password" share an
//! entry.

use std::collections::HashSet;

use once_cell::sync::Lazy;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "do", "does", "did", "can",
        "could", "will", "would", "should", "i", "me", "my", "we", "our", "you", "your", "it",
        "its", "to", "of", "in", "on", "at", "for", "with", "and", "or", "but", "how", "what",
        "when", "where", "why", "who", "which", "please", "that", "this", "these", "those",
        // Spanish
        "el", "la", "los", "las", "un", "una", "unos", "unas", "es", "son", "era", "eran", "ser",
        "estar", "hacer", "hace", "puedo", "puede", "pueden", "yo", "mi", "mis", "nosotros",
        "nuestro", "tu", "tus", "su", "sus", "de", "del", "en", "por", "para", "con", "y", "o",
        "pero", "como", "que", "cuando", "donde", "dónde", "cómo", "qué", "cuál", "quién",
        "favor",
    ]
    .into_iter()
    .collect()
});

/// Produces the normalized cache key for a query.
pub fn normalize_query(query: &str) -> String {
    let mut tokens: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !STOPWORDS.contains(t))
        .map(String::from)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens.join(" ")
}
