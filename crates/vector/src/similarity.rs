//! Cosine similarity helpers
//!
//! The index keeps unit-length copies of every vector, so scoring there is a
//! plain dot product. `cosine_similarity` is the reference definition.

use semsearch_common::{Result, SemsearchError};

/// Dot product of two equal-length slices
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm
#[inline]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// dot(a, b) / (|a| |b|), clamped to [-1, 1]; 0.0 when either side has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let denom = norm(a) * norm(b);
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (dot(a, b) / denom).clamp(-1.0, 1.0)
}

/// Reject vectors the metric cannot score
pub fn validate_vector(v: &[f32]) -> Result<()> {
    if v.is_empty() {
        return Err(SemsearchError::invalid_vector("vector is empty"));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(SemsearchError::invalid_vector("vector contains NaN or infinite components"));
    }
    let n = norm(v);
    if n == 0.0 || !n.is_finite() {
        return Err(SemsearchError::invalid_vector("vector has zero norm"));
    }
    Ok(())
}

/// Unit-length copy of `v`
pub fn normalized(v: &[f32]) -> Result<Vec<f32>> {
    validate_vector(v)?;
    let n = norm(v);
    Ok(v.iter().map(|x| x / n).collect())
}

/// In-place normalization; leaves zero vectors untouched and reports whether it scaled
pub(crate) fn normalize_in_place(v: &mut [f32]) -> bool {
    let n = norm(v);
    if n == 0.0 || !n.is_finite() {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= n);
    true
}
