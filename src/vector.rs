//! Fixed-length dense vector.

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::matrix::RowStore;
use crate::simd;

/// Owned `f32` buffer whose length is fixed at construction.
///
/// Borrowed views (matrix rows, caller buffers) are plain slices; every
/// operation that reads another vector takes `&[f32]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    /// Zero vector of length `n`.
    pub fn new(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    /// Take ownership of an existing buffer.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Multiply every element by `a`.
    pub fn mul(&mut self, a: f32) {
        simd::scale(a, &mut self.data);
    }

    pub fn norm(&self) -> f32 {
        simd::norm(&self.data)
    }

    /// `self += source`.
    pub fn add_vector(&mut self, source: &[f32]) {
        self.add_scaled(source, 1.0);
    }

    /// `self += a * source`.
    pub fn add_scaled(&mut self, source: &[f32], a: f32) {
        debug_assert_eq!(source.len(), self.data.len());
        simd::axpy(a, source, &mut self.data);
    }

    /// `self += a * rows[i]` for any row store (dense, shared, or quantized).
    pub fn add_row<M: RowStore + ?Sized>(&mut self, rows: &M, i: usize, a: f32) {
        rows.add_row_to(&mut self.data, i, a);
    }

    /// `self[i] = rows[i] · v` for every row (matrix-vector product).
    pub fn mul_rows<M: RowStore + ?Sized>(&mut self, rows: &M, v: &[f32]) {
        debug_assert_eq!(rows.rows(), self.data.len());
        for (i, out) in self.data.iter_mut().enumerate() {
            *out = rows.dot_row(v, i);
        }
    }

    /// Index of the largest element.
    pub fn argmax(&self) -> usize {
        simd::argmax(&self.data)
    }
}

impl Index<usize> for Vector {
    type Output = f32;

    fn index(&self, i: usize) -> &f32 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut f32 {
        &mut self.data[i]
    }
}

impl AsRef<[f32]> for Vector {
    fn as_ref(&self) -> &[f32] {
        &self.data
    }
}

/// Space-separated values, as written in vector export files.
impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, x) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{x}")?;
        }
        Ok(())
    }
}
