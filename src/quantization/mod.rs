//! Product quantization of embedding matrices.
//!
//! ```text
//! row (dim floats)  →  [ part 0 | part 1 | ... | part nsubq-1 ]
//!                          ↓         ↓               ↓
//!                        code 0    code 1   ...   code nsubq-1   (one byte each)
//! ```
//!
//! Each partition has its own k-means codebook of `2^nbits` centroids. With
//! norm quantization the row norm is stored as a separate 8-bit code and the
//! partitions encode the unit direction, which keeps large and small rows
//! from competing for the same centroids.
//!
//! A quantized matrix is read-only: it supports row reconstruction,
//! dot products, and scaled accumulation through [`RowStore`](crate::matrix::RowStore),
//! but no updates.

pub mod kmeans;
mod norm;
mod product;
mod qmatrix;

pub use kmeans::KMeans;
pub use norm::NormQuantizer;
pub use product::{ProductQuantizer, MAX_POINTS_PER_CLUSTER};
pub use qmatrix::QMatrix;
