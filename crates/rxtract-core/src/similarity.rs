//! Normalized edit-distance similarity between optional text values.

// Similarity ratio uses f64 from usize
#![allow(clippy::cast_precision_loss)]

use crate::models::value_text;
use serde_json::Value;
use strsim::levenshtein;

/// Similarity of two optional strings in `[0, 1]`.
///
/// Both absent compare equal, one absent compares as completely different.
/// Present values are case-folded and trimmed, then scored as
/// `1 - levenshtein / max_len` over characters.
///
/// ```
/// use rxtract_core::similarity::similarity;
///
/// assert_eq!(similarity(None, None), 1.0);
/// assert_eq!(similarity(Some("a"), None), 0.0);
/// assert!((similarity(Some("Asprin"), Some("Aspirin")) - 6.0 / 7.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let (a, b) = match (a, b) {
        (None, None) => return 1.0,
        (Some(a), Some(b)) => (a.to_lowercase(), b.to_lowercase()),
        _ => return 0.0,
    };
    let (a, b) = (a.trim(), b.trim());

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {}
    }

    let max_len = a.chars().count().max(b.chars().count());
    let distance = levenshtein(a, b);

    (1.0 - distance as f64 / max_len as f64).max(0.0)
}

/// Similarity of two optional JSON values, compared by their text form.
///
/// A null value counts as absent.
#[must_use]
pub fn value_similarity(a: Option<&Value>, b: Option<&Value>) -> f64 {
    let a = a.and_then(value_text);
    let b = b.and_then(value_text);
    similarity(a.as_deref(), b.as_deref())
}
