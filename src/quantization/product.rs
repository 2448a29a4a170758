//! Product quantizer.
//!
//! A `dim`-wide vector is cut into `nsubq = ceil(dim / dsub)` partitions; all
//! but the last are `dsub` wide, the last takes the remainder. Each partition
//! gets its own codebook of `2^nbits` centroids and is replaced by one byte.

use std::io::{Read, Write};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::kmeans::KMeans;
use crate::error::{Error, Result};
use crate::persistence::codec;
use crate::simd;

/// At most this many training points per centroid are sampled.
pub const MAX_POINTS_PER_CLUSTER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    dim: usize,
    dsub: usize,
    nbits: u8,
    /// One `ksub × width(m)` codebook per partition.
    codebooks: Vec<Vec<f32>>,
}

impl ProductQuantizer {
    pub fn new(dim: usize, dsub: usize, nbits: u8) -> Result<Self> {
        if dim == 0 || dsub == 0 {
            return Err(Error::Config(
                "product quantizer needs dim > 0 and dsub > 0".to_string(),
            ));
        }
        if !(1..=8).contains(&nbits) {
            return Err(Error::Config(format!("nbits must be in 1..=8, got {nbits}")));
        }
        Ok(Self {
            dim,
            dsub,
            nbits,
            codebooks: Vec::new(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nbits(&self) -> u8 {
        self.nbits
    }

    /// Centroids per partition.
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Number of partitions, i.e. code bytes per vector.
    pub fn nsubq(&self) -> usize {
        self.dim.div_ceil(self.dsub)
    }

    /// Width of partition `m`; only the last one can be narrower than `dsub`.
    fn width(&self, m: usize) -> usize {
        if m + 1 == self.nsubq() {
            self.dim - m * self.dsub
        } else {
            self.dsub
        }
    }

    fn centroid(&self, m: usize, c: usize) -> &[f32] {
        let w = self.width(m);
        &self.codebooks[m][c * w..(c + 1) * w]
    }

    /// Learn one codebook per partition from `n` row-major vectors.
    pub fn train(&mut self, data: &[f32], n: usize, seed: u64) -> Result<()> {
        if data.len() != n * self.dim {
            return Err(Error::DimensionMismatch {
                expected: n * self.dim,
                actual: data.len(),
            });
        }
        let ksub = self.ksub();
        if n < ksub {
            return Err(Error::TooFewPoints {
                points: n,
                centroids: ksub,
            });
        }

        let mut perm: Vec<usize> = (0..n).collect();
        let np = n.min(MAX_POINTS_PER_CLUSTER * ksub);
        if np < n {
            perm.shuffle(&mut StdRng::seed_from_u64(seed));
            perm.truncate(np);
        }
        debug!(points = np, partitions = self.nsubq(), ksub, "training product quantizer");

        let mut codebooks = Vec::with_capacity(self.nsubq());
        for m in 0..self.nsubq() {
            let w = self.width(m);
            let start = m * self.dsub;
            let mut sub = Vec::with_capacity(np * w);
            for &i in &perm {
                sub.extend_from_slice(&data[i * self.dim + start..i * self.dim + start + w]);
            }
            let mut km = KMeans::new(w, ksub)?.with_seed(seed.wrapping_add(m as u64));
            km.fit(&sub, np)?;
            codebooks.push(km.into_centroids());
        }
        self.codebooks = codebooks;
        Ok(())
    }

    /// Nearest-centroid code of every partition of `x`.
    pub fn compute_code(&self, x: &[f32], code: &mut [u8]) {
        for (m, slot) in code.iter_mut().enumerate().take(self.nsubq()) {
            let start = m * self.dsub;
            let sub = &x[start..start + self.width(m)];
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for c in 0..self.ksub() {
                let d = simd::l2_distance_squared(sub, self.centroid(m, c));
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            *slot = best as u8;
        }
    }

    /// Codes of `n` row-major vectors, `nsubq` bytes each.
    pub fn compute_codes(&self, data: &[f32], n: usize) -> Vec<u8> {
        let nsubq = self.nsubq();
        let mut codes = vec![0u8; n * nsubq];
        for (i, code) in codes.chunks_exact_mut(nsubq).enumerate() {
            self.compute_code(&data[i * self.dim..(i + 1) * self.dim], code);
        }
        codes
    }

    /// `alpha * (x · decode(code))` without materializing the decoded vector.
    pub fn mul_code(&self, x: &[f32], code: &[u8], alpha: f32) -> f32 {
        let mut sum = 0.0;
        for (m, &c) in code.iter().enumerate().take(self.nsubq()) {
            let start = m * self.dsub;
            sum += simd::dot(&x[start..start + self.width(m)], self.centroid(m, c as usize));
        }
        alpha * sum
    }

    /// `x += alpha * decode(code)`.
    pub fn add_code(&self, x: &mut [f32], code: &[u8], alpha: f32) {
        for (m, &c) in code.iter().enumerate().take(self.nsubq()) {
            let start = m * self.dsub;
            let w = self.width(m);
            simd::axpy(alpha, self.centroid(m, c as usize), &mut x[start..start + w]);
        }
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_u64(writer, self.dim as u64)?;
        codec::write_u64(writer, self.dsub as u64)?;
        codec::write_u8(writer, self.nbits)?;
        for book in &self.codebooks {
            codec::write_f32_slice(writer, book)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let dim = codec::read_len(reader, 1 << 20, "quantizer dim")?;
        let dsub = codec::read_len(reader, 1 << 20, "quantizer dsub")?;
        let nbits = codec::read_u8(reader, "quantizer nbits")?;
        let mut pq = Self::new(dim, dsub, nbits)
            .map_err(|e| Error::Format(format!("bad product quantizer header: {e}")))?;
        let mut codebooks = Vec::with_capacity(pq.nsubq());
        for m in 0..pq.nsubq() {
            codebooks.push(codec::read_f32_vec(reader, pq.ksub() * pq.width(m), "codebook")?);
        }
        pq.codebooks = codebooks;
        Ok(pq)
    }
}
