use std::collections::HashSet;

/// Pluggable text-similarity strategy.
///
/// The resolver only depends on this contract, so the token-set heuristic
/// below can be swapped for a stronger method (edit distance, embeddings)
/// without touching resolution control flow.
pub trait TextSimilarity: Send + Sync {
    /// Similarity between two strings in `[0, 1]`.
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Token-set (Jaccard) similarity over normalized strings.
///
/// Both inputs are lowercased, stripped of punctuation, and
/// whitespace-collapsed before tokenizing, so "Blinding Lights" and
/// "blinding lights!" compare as identical.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSetSimilarity;

impl TextSimilarity for TokenSetSimilarity {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let ta = tokenize(a);
        let tb = tokenize(b);
        jaccard(&ta, &tb)
    }
}

/// Normalize a title or artist string for matching: lowercase, strip
/// punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_space = false;
        } else if c.is_whitespace() && !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
        // Punctuation and symbols are dropped without breaking the token
    }
    out.trim_end().to_string()
}

fn tokenize(s: &str) -> HashSet<String> {
    normalize(s)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
