//! Dense row-major matrices and the row-access trait shared by every
//! parameter store.

mod shared;

pub use shared::SharedMatrix;
pub(crate) use shared::average_rows;

use std::io::{Read, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::persistence::codec;
use crate::simd;

/// Upper bound on `rows * cols` accepted when loading (2^34 floats, 64 GiB).
const MAX_LOAD_ELEMENTS: u64 = 1 << 34;

/// Read access to a table of equal-length rows.
///
/// Implemented by [`Matrix`], [`SharedMatrix`], and
/// [`QMatrix`](crate::quantization::QMatrix), so inference code does not
/// care whether parameters are dense, being trained, or quantized.
pub trait RowStore {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    /// `row(i) · v`.
    fn dot_row(&self, v: &[f32], i: usize) -> f32;

    /// `out += a * row(i)`.
    fn add_row_to(&self, out: &mut [f32], i: usize, a: f32);
}

/// Dense `rows × cols` matrix of `f32`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Zero matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), rows * cols, "buffer does not match {rows}x{cols}");
        Self { rows, cols, data }
    }

    /// Matrix with entries drawn uniformly from `[-bound, bound)`.
    pub fn uniform(rows: usize, cols: usize, bound: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = if bound > 0.0 {
            (0..rows * cols)
                .map(|_| rng.random_range(-bound..bound))
                .collect()
        } else {
            vec![0.0; rows * cols]
        };
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Zero-copy view of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// `row(i) += a * v`.
    pub fn add_to_row(&mut self, v: &[f32], i: usize, a: f32) {
        simd::axpy(a, v, self.row_mut(i));
    }

    /// L2 norm of every row.
    pub fn l2_norm_rows(&self) -> Vec<f32> {
        (0..self.rows).map(|i| simd::norm(self.row(i))).collect()
    }

    /// Divide each row by its entry in `denoms`; rows with a zero denominator are left alone.
    pub fn divide_rows(&mut self, denoms: &[f32]) {
        debug_assert_eq!(denoms.len(), self.rows);
        for (i, &d) in denoms.iter().enumerate() {
            if d != 0.0 {
                simd::scale(1.0 / d, self.row_mut(i));
            }
        }
    }

    /// Copy of the rows listed in `ids`, in that order.
    pub fn select_rows(&self, ids: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(ids.len() * self.cols);
        for &i in ids {
            data.extend_from_slice(self.row(i));
        }
        Matrix::from_vec(ids.len(), self.cols, data)
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_u64(writer, self.rows as u64)?;
        codec::write_u64(writer, self.cols as u64)?;
        codec::write_f32_slice(writer, &self.data)
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let rows = codec::read_u64(reader, "matrix rows")?;
        let cols = codec::read_u64(reader, "matrix cols")?;
        let n = rows
            .checked_mul(cols)
            .filter(|&n| n <= MAX_LOAD_ELEMENTS)
            .ok_or_else(|| Error::Format(format!("malformed matrix dimensions {rows}x{cols}")))?;
        let data = codec::read_f32_vec(reader, n as usize, "matrix data")?;
        Ok(Self {
            rows: rows as usize,
            cols: cols as usize,
            data,
        })
    }
}

impl RowStore for Matrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn dot_row(&self, v: &[f32], i: usize) -> f32 {
        simd::dot(self.row(i), v)
    }

    #[inline]
    fn add_row_to(&self, out: &mut [f32], i: usize, a: f32) {
        simd::axpy(a, self.row(i), out);
    }
}
