//! subvec: subword embeddings and linear text classifiers.
//!
//! Trains word vectors (cbow, skip-gram) and supervised classifiers over
//! whitespace-tokenized text, with character n-grams hashed into a fixed
//! number of buckets so unseen words still get a vector.
//!
//! - [`dictionary`]: vocabulary, subword buckets, word n-grams, subsampling
//! - [`model`]: per-thread SGD kernel and output layers (negative sampling,
//!   hierarchical softmax, softmax)
//! - [`trainer`]: lock-free multi-threaded training over a corpus file
//! - [`quantization`]: product quantization of trained matrices
//! - [`trained`]: queries, quantization and persistence of a finished model
//!
//! ```no_run
//! use subvec::{train, Args};
//!
//! let outcome = train(Args { min_count: 1, ..Args::skipgram() }, "corpus.txt")?;
//! let neighbours = outcome.model.nearest_neighbors("river", 10);
//! # Ok::<(), subvec::Error>(())
//! ```
//!
//! # Critical Nuances
//!
//! ## Training is racy on purpose
//!
//! Workers read and write the shared parameter rows with no locks or atomics
//! (Hogwild). Updates to the same row from two threads may interleave and one
//! of them can be lost; with sparse updates this barely affects convergence,
//! and it is what makes training scale with threads. Consequently, runs with
//! more than one thread are not bit-for-bit reproducible even with a fixed
//! seed. Single-threaded runs are.
//!
//! ## Hash collisions
//!
//! All character and word n-grams share `bucket` rows. Distinct n-grams that
//! hash to the same bucket share a vector. More buckets mean fewer
//! collisions and a larger input matrix.
//!
//! ## Quantization is lossy and one-way
//!
//! [`TrainedModel::quantize`] replaces the dense input matrix; a quantized
//! model cannot be quantized again or trained further.

pub mod args;
pub mod dictionary;
pub mod error;
pub mod matrix;
pub mod model;
pub mod persistence;
pub mod quantization;
pub mod simd;
pub mod trained;
pub mod trainer;
pub mod vector;

pub use args::{Args, LossKind, ModelKind, QuantizeArgs};
pub use dictionary::{Dictionary, Entry, EntryKind};
pub use error::{Error, Result};
pub use matrix::{Matrix, RowStore, SharedMatrix};
pub use quantization::QMatrix;
pub use trained::{Parameters, TestMetrics, TrainedModel};
pub use trainer::{train, CancelHandle, TrainOutcome, Trainer};
pub use vector::Vector;
