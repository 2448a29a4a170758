//! Error types for subvec.

use thiserror::Error;

/// Errors that can occur while configuring, training, quantizing, or loading a model.
///
/// Lookup misses (unknown token, unknown id) are not errors; those APIs
/// return `Option`.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent hyperparameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error (unreadable corpus, model, or vector file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed persisted data (bad magic, bad dimensions, truncated sections).
    #[error("format error: {0}")]
    Format(String),

    /// Persisted model written by a format version this build cannot read.
    #[error("unsupported model version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Too few rows to run k-means with the requested number of centroids.
    #[error("too few points to quantize: {points} rows for {centroids} centroids")]
    TooFewPoints { points: usize, centroids: usize },

    /// The corpus produced no word that survived thresholding.
    #[error("empty vocabulary: {0}")]
    EmptyVocabulary(String),

    /// Dimension mismatch between two operands.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Operation not available for this model (e.g. predicting with an embedding model).
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Config (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_points_is_distinct_from_config() {
        let e = Error::TooFewPoints {
            points: 3,
            centroids: 256,
        };
        assert!(matches!(e, Error::TooFewPoints { .. }));
        assert!(e.to_string().contains("3 rows"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
