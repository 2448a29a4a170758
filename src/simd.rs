//! Dense `f32` kernels used by the training loop and the quantizer.
//!
//! Written as plain iterator loops over equal-length slices so LLVM can
//! auto-vectorize them. Every function assumes `a.len() == b.len()`; extra
//! elements of the longer slice are ignored.
//!
//! ```rust
//! use subvec::simd::{dot, norm, axpy};
//!
//! let a = [1.0_f32, 2.0, 3.0];
//! let mut y = [0.0_f32; 3];
//! axpy(0.5, &a, &mut y);
//! assert_eq!(y, [0.5, 1.0, 1.5]);
//! assert!((dot(&a, &a) - 14.0).abs() < 1e-6);
//! assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
//! ```

/// Dot product of two vectors.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// L2 distance squared.
#[inline]
#[must_use]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// `y += alpha * x`.
#[inline]
pub fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

/// `v *= alpha`.
#[inline]
pub fn scale(alpha: f32, v: &mut [f32]) {
    for x in v.iter_mut() {
        *x *= alpha;
    }
}

/// Index of the largest element (first one on ties). `0` for an empty slice.
#[inline]
#[must_use]
pub fn argmax(v: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}
