//! String similarity used for near-duplicate detection.
//!
//! Scores are normalized Levenshtein ratios over characters: `1 - distance / max_len`.
//! Symmetric, 1.0 for identical input and 0.0 when exactly one side is empty.

use strsim::normalized_levenshtein;

/// Similarity ratio between two already-normalized strings (0.0 - 1.0).
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b).clamp(0.0, 1.0)
}

/// Cheap ceiling on `similarity` for strings of the given char lengths.
///
/// The edit distance is at least the length difference, so the ratio can never exceed
/// `min_len / max_len`.
pub fn similarity_upper_bound(len_a: usize, len_b: usize) -> f64 {
    let longest = len_a.max(len_b);
    if longest == 0 {
        return 1.0;
    }
    len_a.min(len_b) as f64 / longest as f64
}

/// Score `a` against `b` only if the pair can reach `threshold`; returns the score when it does.
pub fn score_at_least(a: &str, len_a: usize, b: &str, len_b: usize, threshold: f64) -> Option<f64> {
    if similarity_upper_bound(len_a, len_b) < threshold {
        return None;
    }
    let score = similarity(a, b);
    (score >= threshold).then_some(score)
}
