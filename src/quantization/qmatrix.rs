//! Product-quantized matrix.

use std::io::{Read, Write};

use tracing::info;

use super::norm::NormQuantizer;
use super::product::ProductQuantizer;
use crate::error::{Error, Result};
use crate::matrix::{Matrix, RowStore};
use crate::persistence::codec;

const MAX_ROWS: u64 = 1 << 34;

/// A matrix whose rows are stored as product-quantizer codes.
///
/// With `qnorm`, each row is split into an 8-bit quantized norm and a
/// product-quantized unit direction; otherwise the raw row is quantized.
#[derive(Debug, Clone, PartialEq)]
pub struct QMatrix {
    rows: usize,
    cols: usize,
    pq: ProductQuantizer,
    /// `rows × nsubq`.
    codes: Vec<u8>,
    norms: Option<(NormQuantizer, Vec<u8>)>,
}

impl QMatrix {
    /// Quantize every row of `matrix`.
    ///
    /// Fails with [`Error::TooFewPoints`] if `matrix` has fewer rows than
    /// `2^nbits`.
    pub fn quantize(matrix: &Matrix, dsub: usize, nbits: u8, qnorm: bool, seed: u64) -> Result<Self> {
        let rows = matrix.rows();
        let cols = matrix.cols();
        let mut pq = ProductQuantizer::new(cols, dsub, nbits)?;

        let (data, norms) = if qnorm {
            let norms = matrix.l2_norm_rows();
            let mut unit = matrix.clone();
            unit.divide_rows(&norms);
            let nq = NormQuantizer::fit(&norms);
            let codes = norms.iter().map(|&n| nq.encode(n)).collect();
            (unit.into_vec(), Some((nq, codes)))
        } else {
            (matrix.as_slice().to_vec(), None)
        };

        pq.train(&data, rows, seed)?;
        let codes = pq.compute_codes(&data, rows);
        info!(rows, cols, nsubq = pq.nsubq(), nbits, qnorm, "quantized matrix");
        Ok(Self {
            rows,
            cols,
            pq,
            codes,
            norms,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_norm_quantized(&self) -> bool {
        self.norms.is_some()
    }

    fn code(&self, i: usize) -> &[u8] {
        let n = self.pq.nsubq();
        &self.codes[i * n..(i + 1) * n]
    }

    fn norm(&self, i: usize) -> f32 {
        match &self.norms {
            Some((nq, codes)) => nq.decode(codes[i]),
            None => 1.0,
        }
    }

    /// Approximate reconstruction of row `i`.
    pub fn get_row(&self, i: usize) -> Vec<f32> {
        let mut out = vec![0.0; self.cols];
        self.add_row_to(&mut out, i, 1.0);
        out
    }

    /// Approximate dense copy of the whole matrix.
    pub fn to_matrix(&self) -> Matrix {
        let mut data = Vec::with_capacity(self.rows * self.cols);
        for i in 0..self.rows {
            data.extend(self.get_row(i));
        }
        Matrix::from_vec(self.rows, self.cols, data)
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_u64(writer, self.rows as u64)?;
        codec::write_u64(writer, self.cols as u64)?;
        self.pq.save(writer)?;
        writer.write_all(&self.codes)?;
        match &self.norms {
            None => codec::write_u8(writer, 0)?,
            Some((nq, codes)) => {
                codec::write_u8(writer, 1)?;
                nq.save(writer)?;
                writer.write_all(codes)?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let rows = codec::read_len(reader, MAX_ROWS, "quantized rows")?;
        let cols = codec::read_len(reader, MAX_ROWS, "quantized cols")?;
        let pq = ProductQuantizer::load(reader)?;
        if pq.dim() != cols {
            return Err(Error::Format(format!(
                "quantizer dim {} does not match {cols} columns",
                pq.dim()
            )));
        }
        let codes = codec::read_byte_vec(reader, rows * pq.nsubq(), "quantized codes")?;
        let norms = match codec::read_u8(reader, "qnorm flag")? {
            0 => None,
            1 => {
                let nq = NormQuantizer::load(reader)?;
                Some((nq, codec::read_byte_vec(reader, rows, "norm codes")?))
            }
            other => return Err(Error::Format(format!("bad qnorm flag {other}"))),
        };
        Ok(Self {
            rows,
            cols,
            pq,
            codes,
            norms,
        })
    }
}

impl RowStore for QMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn dot_row(&self, v: &[f32], i: usize) -> f32 {
        self.pq.mul_code(v, self.code(i), self.norm(i))
    }

    fn add_row_to(&self, out: &mut [f32], i: usize, a: f32) {
        self.pq.add_code(out, self.code(i), a * self.norm(i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd;
    use std::io::Cursor;

    fn reconstruction_error(m: &Matrix, q: &QMatrix) -> f32 {
        (0..m.rows())
            .map(|i| simd::l2_distance_squared(m.row(i), &q.get_row(i)))
            .sum()
    }

    #[test]
    fn rows_reconstruct_approximately() {
        let m = Matrix::uniform(128, 8, 1.0, 3);
        let q = QMatrix::quantize(&m, 2, 4, false, 0).unwrap();
        let energy: f32 = m.as_slice().iter().map(|x| x * x).sum();
        assert!(reconstruction_error(&m, &q) < 0.5 * energy);
    }

    #[test]
    fn qnorm_keeps_large_rows_large() {
        let mut m = Matrix::uniform(64, 4, 1.0, 8);
        m.row_mut(0).copy_from_slice(&[10.0, 0.0, 0.0, 0.0]);
        let q = QMatrix::quantize(&m, 2, 3, true, 0).unwrap();
        assert!(q.is_norm_quantized());
        let n0 = simd::norm(&q.get_row(0));
        assert!(n0 > 5.0, "norm {n0}");
        for i in 1..64 {
            assert!(simd::norm(&q.get_row(i)) < n0);
        }
    }

    #[test]
    fn dot_row_agrees_with_reconstruction() {
        let m = Matrix::uniform(32, 6, 1.0, 2);
        let q = QMatrix::quantize(&m, 4, 2, true, 1).unwrap();
        let v = [1.0, -1.0, 0.5, 0.25, 0.0, 2.0];
        for i in [0, 7, 31] {
            let direct = simd::dot(&q.get_row(i), &v);
            assert!((q.dot_row(&v, i) - direct).abs() < 1e-4);
        }
    }

    #[test]
    fn fewer_rows_than_centroids_fails() {
        let m = Matrix::uniform(10, 4, 1.0, 0);
        let err = QMatrix::quantize(&m, 2, 8, false, 0).unwrap_err();
        assert!(matches!(err, Error::TooFewPoints { points: 10, centroids: 256 }));
    }

    #[test]
    fn save_load_round_trip() {
        let m = Matrix::uniform(20, 5, 1.0, 6);
        let q = QMatrix::quantize(&m, 2, 2, true, 0).unwrap();
        let mut buf = Vec::new();
        q.save(&mut buf).unwrap();
        assert_eq!(QMatrix::load(&mut Cursor::new(buf)).unwrap(), q);
    }
}
