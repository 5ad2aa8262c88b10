//! SIMD-accelerated kernels for the hot distance loops.
//!
//! All kernels use the `wide` crate's `f32x8` type: an 8-lane loop with FMA
//! accumulation, a horizontal reduce, and a scalar tail. `wide` lowers to
//! AVX2/SSE on `x86_64`, NEON on `aarch64`, and scalar code elsewhere, so a
//! single implementation covers every target.

use wide::f32x8;

/// L2 cache line size in bytes (standard for modern `x86_64` CPUs).
pub const CACHE_LINE_BYTES: usize = 64;

/// Computes the dot product of two equal-length vectors.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn dot_product_fast(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut sum = f32x8::ZERO;
    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        sum = va.mul_add(vb, sum);
    }

    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        result += a[base + i] * b[base + i];
    }

    result
}

/// Computes the squared Euclidean distance between two equal-length vectors.
///
/// The square root is deliberately omitted: only the ranking matters in
/// graph traversal and re-ranking.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn euclidean_sq_fast(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut sum = f32x8::ZERO;
    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        let diff = va - vb;
        sum = diff.mul_add(diff, sum);
    }

    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        let diff = a[base + i] - b[base + i];
        result += diff * diff;
    }

    result
}

/// Computes the squared L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm_sq_fast(v: &[f32]) -> f32 {
    dot_product_fast(v, v)
}

/// Prefetches the cache lines backing a float slice (T0 hint).
///
/// Call ahead of the distance computation for rows that will be visited
/// next. A no-op on targets without a stable prefetch intrinsic.
#[inline]
pub fn prefetch_floats(data: &[f32]) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: _mm_prefetch is a hint instruction that cannot fault.
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            let mut ptr = data.as_ptr().cast::<i8>();
            let end = ptr.add(data.len() * std::mem::size_of::<f32>());
            while ptr < end {
                _mm_prefetch(ptr, _MM_HINT_T0);
                ptr = ptr.add(CACHE_LINE_BYTES);
            }
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        // aarch64 prefetch intrinsics are unstable (rust-lang/rust#117217).
        let _ = data;
    }
}

/// Prefetches the cache line holding a byte slice (T0 hint).
///
/// Used for product-quantization code rows, which fit a single line for
/// typical subspace counts.
#[inline]
pub fn prefetch_bytes(data: &[u8]) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: _mm_prefetch is a hint instruction that cannot fault.
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            _mm_prefetch(data.as_ptr().cast::<i8>(), _MM_HINT_T0);
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    fn euclid_sq_scalar(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum()
    }

    #[test]
    fn test_dot_product_matches_scalar() {
        // 67 exercises both the 8-wide loop and the scalar tail
        for dim in [1, 7, 8, 16, 67, 128] {
            let a: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.37).sin()).collect();
            let b: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.91).cos()).collect();

            let fast = dot_product_fast(&a, &b);
            let scalar = dot_scalar(&a, &b);
            assert!(
                (fast - scalar).abs() < 1e-4,
                "dim {dim}: {fast} vs {scalar}"
            );
        }
    }

    #[test]
    fn test_euclidean_sq_matches_scalar() {
        for dim in [1, 8, 31, 64, 200] {
            let a: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.13).sin()).collect();
            let b: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.71).cos()).collect();

            let fast = euclidean_sq_fast(&a, &b);
            let scalar = euclid_sq_scalar(&a, &b);
            assert!(
                (fast - scalar).abs() < 1e-3,
                "dim {dim}: {fast} vs {scalar}"
            );
        }
    }

    #[test]
    fn test_euclidean_sq_identity() {
        let v: Vec<f32> = (0..128).map(|i| i as f32).collect();
        assert_eq!(euclidean_sq_fast(&v, &v), 0.0);
    }

    #[test]
    fn test_prefetch_is_harmless() {
        let v = vec![1.0_f32; 768];
        prefetch_floats(&v);
        prefetch_bytes(&[1, 2, 3]);
    }
}
