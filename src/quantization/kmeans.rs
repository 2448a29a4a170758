//! k-means clustering for product-quantizer codebooks.
//!
//! Squared-L2 Lloyd iterations after k-means++ seeding. The seeding keeps a
//! per-point "distance to nearest chosen centroid" array, so picking `k`
//! centroids costs `O(n·k·d)` instead of rescanning every centroid per step.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{Error, Result};
use crate::simd;

/// Default number of Lloyd iterations.
pub const DEFAULT_ITERATIONS: usize = 25;

/// k-means over flat row-major points of a fixed dimension.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// `k × dimension`, row-major.
    centroids: Vec<f32>,
    dimension: usize,
    k: usize,
    seed: u64,
    iterations: usize,
}

impl KMeans {
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(Error::Config(
                "k-means dimension and k must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            seed: 0,
            iterations: DEFAULT_ITERATIONS,
        })
    }

    /// Seed for k-means++ sampling; identical inputs and seed give identical centroids.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Cluster `num_vectors` points stored contiguously in `vectors`.
    ///
    /// Fails with [`Error::TooFewPoints`] when there are fewer points than clusters.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<()> {
        if vectors.len() < num_vectors * self.dimension {
            return Err(Error::DimensionMismatch {
                expected: num_vectors * self.dimension,
                actual: vectors.len(),
            });
        }
        if num_vectors < self.k {
            return Err(Error::TooFewPoints {
                points: num_vectors,
                centroids: self.k,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        self.centroids = self.kmeans_plus_plus(vectors, num_vectors, &mut rng);

        let mut assignments = vec![usize::MAX; num_vectors];
        let mut dists = vec![0.0f32; num_vectors];
        for iteration in 0..self.iterations {
            let mut changed = 0usize;
            for i in 0..num_vectors {
                let (c, d) = self.nearest(self.get_vector(vectors, i));
                if assignments[i] != c {
                    assignments[i] = c;
                    changed += 1;
                }
                dists[i] = d;
            }
            if changed == 0 {
                debug!(iteration, k = self.k, "k-means converged");
                break;
            }
            self.update_centroids(vectors, num_vectors, &assignments, &mut dists);
        }
        Ok(())
    }

    /// k-means++ seeding: first centroid uniform, each next one sampled with
    /// probability proportional to its squared distance to the nearest chosen one.
    fn kmeans_plus_plus(&self, vectors: &[f32], num_vectors: usize, rng: &mut StdRng) -> Vec<f32> {
        let mut centroids = Vec::with_capacity(self.k * self.dimension);

        let first = rng.random_range(0..num_vectors);
        centroids.extend_from_slice(self.get_vector(vectors, first));

        let mut min_dist: Vec<f32> = (0..num_vectors)
            .map(|i| simd::l2_distance_squared(self.get_vector(vectors, i), &centroids))
            .collect();

        for _ in 1..self.k {
            let total: f64 = min_dist.iter().map(|&d| d as f64).sum();
            let chosen = if total > 0.0 {
                let threshold = rng.random::<f64>() * total;
                let mut cumulative = 0.0;
                let mut pick = num_vectors - 1;
                for (i, &d) in min_dist.iter().enumerate() {
                    cumulative += d as f64;
                    if cumulative >= threshold && d > 0.0 {
                        pick = i;
                        break;
                    }
                }
                pick
            } else {
                // Every point coincides with a centroid already.
                rng.random_range(0..num_vectors)
            };

            let start = centroids.len();
            centroids.extend_from_slice(self.get_vector(vectors, chosen));
            let new_centroid = &centroids[start..];
            for (i, slot) in min_dist.iter_mut().enumerate() {
                let d = simd::l2_distance_squared(self.get_vector(vectors, i), new_centroid);
                if d < *slot {
                    *slot = d;
                }
            }
        }
        centroids
    }

    /// Recompute means; an empty cluster takes over the point that is
    /// currently furthest from its own centroid.
    fn update_centroids(
        &mut self,
        vectors: &[f32],
        num_vectors: usize,
        assignments: &[usize],
        dists: &mut [f32],
    ) {
        let dim = self.dimension;
        let mut sums = vec![0.0f32; self.k * dim];
        let mut counts = vec![0usize; self.k];
        for (i, &c) in assignments.iter().enumerate().take(num_vectors) {
            counts[c] += 1;
            simd::axpy(1.0, self.get_vector(vectors, i), &mut sums[c * dim..(c + 1) * dim]);
        }

        for c in 0..self.k {
            let sum = &mut sums[c * dim..(c + 1) * dim];
            if counts[c] > 0 {
                simd::scale(1.0 / counts[c] as f32, sum);
                continue;
            }
            let far = dists
                .iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &d)| {
                    if d > best.1 {
                        (i, d)
                    } else {
                        best
                    }
                })
                .0;
            debug!(cluster = c, point = far, "reseeding empty cluster");
            sum.copy_from_slice(self.get_vector(vectors, far));
            dists[far] = 0.0;
        }
        self.centroids = sums;
    }

    /// Index of and squared distance to the closest centroid.
    pub fn nearest(&self, v: &[f32]) -> (usize, f32) {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.k {
            let d = simd::l2_distance_squared(v, self.centroid(c));
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        (best, best_dist)
    }

    /// Closest centroid of every point.
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        (0..num_vectors)
            .map(|i| self.nearest(self.get_vector(vectors, i)).0)
            .collect()
    }

    fn get_vector<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        &vectors[idx * self.dimension..(idx + 1) * self.dimension]
    }

    pub fn centroid(&self, c: usize) -> &[f32] {
        &self.centroids[c * self.dimension..(c + 1) * self.dimension]
    }

    /// All centroids, `k × dimension` row-major. Empty before [`fit`](Self::fit).
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    pub fn into_centroids(self) -> Vec<f32> {
        self.centroids
    }
}
