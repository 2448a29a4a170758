//! Parameter store shared by all training threads.
//!
//! # Concurrency contract
//!
//! Training updates are Hogwild-style: every worker reads and writes rows of
//! the same matrix with plain loads and stores, no lock and no atomic on the
//! per-weight path. Two workers touching the same row at the same time may
//! interleave at the granularity of a single `f32` read-modify-write, and one
//! of the two increments can be lost. Each example only touches a handful of
//! sparse rows, so such collisions are rare and act as a small amount of
//! extra gradient noise. This is the accepted approximation that lets
//! training scale across cores; results are therefore not bit-reproducible
//! with more than one thread.
//!
//! Row indices are bounds-checked; element values are the only thing that
//! can race. A torn `f32` is impossible on the supported targets because
//! aligned 32-bit accesses are single instructions.

use std::cell::UnsafeCell;

use super::{Matrix, RowStore};
use crate::simd;

/// Dense matrix whose rows may be mutated through `&self` from many threads.
pub struct SharedMatrix {
    rows: usize,
    cols: usize,
    data: Box<[UnsafeCell<f32>]>,
}

// SAFETY: see the module docs. Concurrent element updates are the intended
// lock-free training scheme; the allocation itself is never resized or freed
// while shared because every mutator takes `&self` and ownership is only
// recovered through `into_matrix(self)`.
unsafe impl Sync for SharedMatrix {}

impl SharedMatrix {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Raw pointer to the first element of row `i`.
    #[inline]
    fn row_ptr(&self, i: usize) -> *mut f32 {
        assert!(i < self.rows, "row {i} out of bounds for {} rows", self.rows);
        // UnsafeCell<f32> is repr(transparent), so a row is `cols` contiguous f32s.
        UnsafeCell::raw_get(self.data[i * self.cols..].as_ptr())
    }

    /// `row(i) += a * v`, unsynchronized.
    #[inline]
    pub fn add_to_row(&self, v: &[f32], i: usize, a: f32) {
        if self.cols == 0 {
            return;
        }
        let n = v.len().min(self.cols);
        let p = self.row_ptr(i);
        for (j, &x) in v.iter().enumerate().take(n) {
            // SAFETY: j < cols and the row is in bounds; racing writes are accepted (module docs).
            unsafe {
                *p.add(j) += a * x;
            }
        }
    }

    /// Copy of row `i` at this instant.
    pub fn row_snapshot(&self, i: usize) -> Vec<f32> {
        let mut out = vec![0.0; self.cols];
        self.add_row_to(&mut out, i, 1.0);
        out
    }

    /// Recover exclusive ownership once all workers have joined.
    pub fn into_matrix(self) -> Matrix {
        let data: Vec<f32> = self
            .data
            .into_vec()
            .into_iter()
            .map(UnsafeCell::into_inner)
            .collect();
        Matrix::from_vec(self.rows, self.cols, data)
    }
}

impl From<Matrix> for SharedMatrix {
    fn from(m: Matrix) -> Self {
        let rows = m.rows();
        let cols = m.cols();
        let data = m.into_vec().into_iter().map(UnsafeCell::new).collect();
        Self { rows, cols, data }
    }
}

impl RowStore for SharedMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn dot_row(&self, v: &[f32], i: usize) -> f32 {
        if self.cols == 0 {
            return 0.0;
        }
        let p = self.row_ptr(i);
        let mut sum = 0.0;
        for (j, &x) in v.iter().enumerate().take(self.cols) {
            // SAFETY: j < cols and the row is in bounds; racing reads are accepted.
            sum += unsafe { *p.add(j) } * x;
        }
        sum
    }

    #[inline]
    fn add_row_to(&self, out: &mut [f32], i: usize, a: f32) {
        if self.cols == 0 {
            return;
        }
        let p = self.row_ptr(i);
        for (j, o) in out.iter_mut().enumerate().take(self.cols) {
            // SAFETY: as above.
            *o += a * unsafe { *p.add(j) };
        }
    }
}

impl std::fmt::Debug for SharedMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

/// Mean of `rows[i]` over `ids`, written into `out`. Leaves `out` zero if `ids` is empty.
pub(crate) fn average_rows<M: RowStore + ?Sized>(rows: &M, ids: &[usize], out: &mut [f32]) {
    out.fill(0.0);
    if ids.is_empty() {
        return;
    }
    for &i in ids {
        rows.add_row_to(out, i, 1.0);
    }
    simd::scale(1.0 / ids.len() as f32, out);
}
