//! Distance kernels for vector similarity calculations.
//!
//! The scalar entry points delegate to the SIMD kernels in [`crate::simd`].
//! None of these functions fail: length enforcement is the caller's
//! responsibility (the index validates dimensions at its boundary).

use serde::{Deserialize, Serialize};

use crate::simd;

/// Distance metric used by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean distance. Best when magnitude matters.
    #[default]
    Euclidean,
    /// Cosine distance, `1 - a·b`. Callers must pre-normalize inputs;
    /// the norms are not divided out here.
    Cosine,
}

impl DistanceMetric {
    /// Computes the distance between two vectors. Lower is more similar.
    ///
    /// # Panics
    ///
    /// Panics if vectors have different lengths.
    #[inline]
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Euclidean => euclid_sq(a, b),
            Self::Cosine => cosine_dist(a, b),
        }
    }
}

/// Squared Euclidean distance: Σ (a[i] − b[i])².
#[inline]
#[must_use]
pub fn euclid_sq(a: &[f32], b: &[f32]) -> f32 {
    simd::euclidean_sq_fast(a, b)
}

/// Cosine distance for pre-normalized vectors: 1 − a·b.
#[inline]
#[must_use]
pub fn cosine_dist(a: &[f32], b: &[f32]) -> f32 {
    1.0 - simd::dot_product_fast(a, b)
}

/// Batched squared Euclidean distance from one query to N contiguous rows.
///
/// Uses the factorization ‖q−v‖² = ‖q‖² + ‖v‖² − 2·q·v with the per-row
/// norms supplied by the caller, so each row costs one dot product instead
/// of a subtract-square pass.
///
/// `rows` holds N rows of `q.len()` floats each; `out` receives N results.
///
/// # Panics
///
/// Panics if `rows` or `norms` does not cover `out.len()` rows.
pub fn batch_euclid_sq(q: &[f32], rows: &[f32], norms: &[f32], out: &mut [f32]) {
    let dim = q.len();
    assert!(rows.len() >= out.len() * dim, "row buffer too short");
    assert!(norms.len() >= out.len(), "norm table too short");

    let q_norm = simd::norm_sq_fast(q);
    for (i, slot) in out.iter_mut().enumerate() {
        let row = &rows[i * dim..(i + 1) * dim];
        let dot = simd::dot_product_fast(q, row);
        // Factorized form can go slightly negative through rounding.
        *slot = (q_norm + norms[i] - 2.0 * dot).max(0.0);
    }
}

/// Asymmetric distance computation against a precomputed table.
///
/// `table` is laid out `[subspace][centroid]` with `centroids_per_sub`
/// entries per subspace; `codes` holds one centroid index per subspace.
/// Returns Σ_j table[j·C + codes[j]].
#[inline]
#[must_use]
pub fn adc(table: &[f32], codes: &[u8], centroids_per_sub: usize) -> f32 {
    debug_assert!(table.len() >= codes.len() * centroids_per_sub);

    let mut sum = 0.0;
    for (j, &code) in codes.iter().enumerate() {
        sum += table[j * centroids_per_sub + code as usize];
    }
    sum
}
