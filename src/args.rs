//! Training and quantization hyperparameters.
//!
//! Serialised as JSON for config files and embedded in the model header.
//! Missing fields fall back to the skipgram defaults, so `{}` is a valid
//! (unsupervised) configuration; use [`Args::supervised`], [`Args::cbow`] or
//! [`Args::skipgram`] to start from the defaults of a specific mode.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Training architecture, fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Continuous bag of words: average the context, predict the center word.
    Cbow,
    /// Skip-gram: each center word predicts each context word.
    #[serde(rename = "skipgram")]
    SkipGram,
    /// Linear classifier over the line's words, n-grams and subwords.
    Supervised,
}

/// Output-layer strategy, fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossKind {
    #[serde(rename = "hs")]
    HierarchicalSoftmax,
    #[serde(rename = "ns")]
    NegativeSampling,
    #[serde(rename = "softmax")]
    Softmax,
}

impl std::str::FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cbow" => Ok(Self::Cbow),
            "skipgram" | "sg" => Ok(Self::SkipGram),
            "supervised" | "sup" => Ok(Self::Supervised),
            other => Err(Error::Config(format!("unknown model `{other}`"))),
        }
    }
}

impl std::str::FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hs" => Ok(Self::HierarchicalSoftmax),
            "ns" => Ok(Self::NegativeSampling),
            "softmax" => Ok(Self::Softmax),
            other => Err(Error::Config(format!("unknown loss `{other}`"))),
        }
    }
}

/// Hyperparameters for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Args {
    pub model: ModelKind,
    pub loss: LossKind,

    // ── Network ─────────────────────────────────────────────────────────────
    /// Embedding dimension.
    pub dim: usize,
    /// Maximum context window half-width; each position draws a width in `[1, ws]`.
    pub ws: usize,
    /// Negatives drawn per target under negative sampling.
    pub neg: usize,

    // ── Schedule ────────────────────────────────────────────────────────────
    pub epoch: usize,
    pub thread: usize,
    /// Initial learning rate; decays linearly to zero over the run.
    pub lr: f64,
    /// Tokens a worker processes between flushes of its local token count.
    pub lr_update_rate: u64,
    pub seed: u64,

    // ── Dictionary ──────────────────────────────────────────────────────────
    pub min_count: u64,
    pub min_count_label: u64,
    /// Subsampling threshold.
    pub t: f64,
    /// Prefix that marks a token as a label.
    pub label: String,
    /// Length of word n-grams hashed for supervised models (1 = unigrams only).
    pub word_ngrams: usize,
    /// Number of hash buckets for character and word n-grams.
    pub bucket: usize,
    /// Minimum character n-gram length.
    pub minn: usize,
    /// Maximum character n-gram length (0 disables subwords).
    pub maxn: usize,
    /// Slot count of the open-addressed vocabulary table.
    pub vocab_capacity: usize,

    /// Optional `.vec` file used to initialise the input matrix.
    pub pretrained_vectors: Option<PathBuf>,
    /// 0 silences progress reports, 1 logs start and end, 2 also logs progress.
    pub verbose: u8,
}

impl Default for Args {
    fn default() -> Self {
        Self::skipgram()
    }
}

impl Args {
    /// Defaults for skip-gram embeddings.
    pub fn skipgram() -> Self {
        Self {
            model: ModelKind::SkipGram,
            loss: LossKind::NegativeSampling,
            dim: 100,
            ws: 5,
            neg: 5,
            epoch: 5,
            thread: 12,
            lr: 0.05,
            lr_update_rate: 100,
            seed: 0,
            min_count: 5,
            min_count_label: 0,
            t: 1e-4,
            label: "__label__".to_string(),
            word_ngrams: 1,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            vocab_capacity: 30_000_000,
            pretrained_vectors: None,
            verbose: 2,
        }
    }

    /// Defaults for cbow embeddings.
    pub fn cbow() -> Self {
        Self {
            model: ModelKind::Cbow,
            ..Self::skipgram()
        }
    }

    /// Defaults for a supervised classifier: softmax, no subwords, no buckets.
    pub fn supervised() -> Self {
        Self {
            model: ModelKind::Supervised,
            loss: LossKind::Softmax,
            lr: 0.1,
            min_count: 1,
            minn: 0,
            maxn: 0,
            bucket: 0,
            ..Self::skipgram()
        }
    }

    /// Defaults for the given architecture.
    pub fn for_model(model: ModelKind) -> Self {
        match model {
            ModelKind::Cbow => Self::cbow(),
            ModelKind::SkipGram => Self::skipgram(),
            ModelKind::Supervised => Self::supervised(),
        }
    }

    /// Validate and normalise.
    ///
    /// A supervised model with neither subwords nor word n-grams never
    /// touches the hash buckets, so `bucket` is forced to 0 there.
    pub fn resolve(mut self) -> Result<Self> {
        if self.model == ModelKind::Supervised && self.word_ngrams <= 1 && self.maxn == 0 {
            self.bucket = 0;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject invalid or contradictory settings. Nothing is silently defaulted.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, v: usize) -> Result<()> {
            if v == 0 {
                return Err(Error::Config(format!("{name} must be greater than 0")));
            }
            Ok(())
        }

        positive("dim", self.dim)?;
        positive("ws", self.ws)?;
        positive("epoch", self.epoch)?;
        positive("thread", self.thread)?;
        positive("word_ngrams", self.word_ngrams)?;
        positive("vocab_capacity", self.vocab_capacity)?;
        if self.lr_update_rate == 0 {
            return Err(Error::Config("lr_update_rate must be greater than 0".into()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::Config(format!("lr must be positive, got {}", self.lr)));
        }
        if !(self.t.is_finite() && self.t > 0.0) {
            return Err(Error::Config(format!("t must be positive, got {}", self.t)));
        }
        if self.label.is_empty() {
            return Err(Error::Config("label prefix must not be empty".into()));
        }
        if self.maxn > 0 {
            if self.minn == 0 || self.minn > self.maxn {
                return Err(Error::Config(format!(
                    "need 0 < minn <= maxn, got minn={} maxn={}",
                    self.minn, self.maxn
                )));
            }
            if self.bucket == 0 {
                return Err(Error::Config("subwords (maxn > 0) need bucket > 0".into()));
            }
        }
        if self.word_ngrams > 1 {
            if self.model != ModelKind::Supervised {
                return Err(Error::Config(
                    "word_ngrams > 1 only applies to supervised models".into(),
                ));
            }
            if self.bucket == 0 {
                return Err(Error::Config("word_ngrams > 1 needs bucket > 0".into()));
            }
        }
        if self.loss == LossKind::NegativeSampling && self.neg == 0 {
            return Err(Error::Config("negative sampling needs neg > 0".into()));
        }
        Ok(())
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Settings for [`TrainedModel::quantize`](crate::TrainedModel::quantize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeArgs {
    /// Sub-vector width of each product-quantizer partition.
    pub dsub: usize,
    /// Bits per code; each partition has `2^nbits` centroids.
    pub nbits: u8,
    /// Quantize row norms separately and product-quantize the directions.
    pub qnorm: bool,
    /// Also quantize the output matrix.
    pub qout: bool,
    /// Keep only the `cutoff` input rows with the largest norm (0 keeps all).
    /// Supervised models only.
    pub cutoff: usize,
    /// Seed for k-means sampling.
    pub seed: u64,
}

impl Default for QuantizeArgs {
    fn default() -> Self {
        Self {
            dsub: 2,
            nbits: 8,
            qnorm: false,
            qout: false,
            cutoff: 0,
            seed: 1234,
        }
    }
}

impl QuantizeArgs {
    pub fn validate(&self) -> Result<()> {
        if self.dsub == 0 {
            return Err(Error::Config("dsub must be greater than 0".into()));
        }
        if !(1..=8).contains(&self.nbits) {
            return Err(Error::Config(format!(
                "nbits must be in 1..=8, got {}",
                self.nbits
            )));
        }
        Ok(())
    }
}
