//! A trained model: dictionary, parameters, output layer, and the queries
//! that run on them.
//!
//! Parameters are either dense or product-quantized; every query reads rows
//! through [`RowStore`], so the same code serves both.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::OnceLock;

use tracing::info;

use crate::args::{Args, LossKind, ModelKind, QuantizeArgs};
use crate::dictionary::{Dictionary, EntryKind, EOS};
use crate::error::{Error, Result};
use crate::matrix::{Matrix, RowStore};
use crate::model::{HuffmanTree, NegativeTable, OutputLayer};
use crate::persistence::format::{self, MatrixKind};
use crate::persistence::{codec, vectors};
use crate::quantization::QMatrix;
use crate::simd;
use crate::vector::Vector;

/// Dense or quantized storage of one parameter matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameters {
    Dense(Matrix),
    Quantized(QMatrix),
}

impl Parameters {
    pub fn is_quantized(&self) -> bool {
        matches!(self, Parameters::Quantized(_))
    }

    pub fn as_dense(&self) -> Option<&Matrix> {
        match self {
            Parameters::Dense(m) => Some(m),
            Parameters::Quantized(_) => None,
        }
    }

    /// Dense copy; quantized rows are reconstructed.
    pub fn to_dense(&self) -> Matrix {
        match self {
            Parameters::Dense(m) => m.clone(),
            Parameters::Quantized(q) => q.to_matrix(),
        }
    }

    fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Parameters::Dense(m) => {
                codec::write_u8(writer, MatrixKind::Dense as u8)?;
                m.save(writer)
            }
            Parameters::Quantized(q) => {
                codec::write_u8(writer, MatrixKind::Quantized as u8)?;
                q.save(writer)
            }
        }
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        match MatrixKind::try_from(codec::read_u8(reader, "matrix kind")?)? {
            MatrixKind::Dense => Ok(Parameters::Dense(Matrix::load(reader)?)),
            MatrixKind::Quantized => Ok(Parameters::Quantized(QMatrix::load(reader)?)),
        }
    }
}

impl RowStore for Parameters {
    fn rows(&self) -> usize {
        match self {
            Parameters::Dense(m) => m.rows(),
            Parameters::Quantized(q) => q.rows(),
        }
    }

    fn cols(&self) -> usize {
        match self {
            Parameters::Dense(m) => m.cols(),
            Parameters::Quantized(q) => q.cols(),
        }
    }

    fn dot_row(&self, v: &[f32], i: usize) -> f32 {
        match self {
            Parameters::Dense(m) => m.dot_row(v, i),
            Parameters::Quantized(q) => q.dot_row(v, i),
        }
    }

    fn add_row_to(&self, out: &mut [f32], i: usize, a: f32) {
        match self {
            Parameters::Dense(m) => m.add_row_to(out, i, a),
            Parameters::Quantized(q) => q.add_row_to(out, i, a),
        }
    }
}

/// Output rows: labels for supervised models, words otherwise.
pub(crate) fn output_size(args: &Args, dict: &Dictionary) -> usize {
    match args.model {
        ModelKind::Supervised => dict.nlabels(),
        _ => dict.nwords(),
    }
}

pub(crate) fn output_counts(args: &Args, dict: &Dictionary) -> Vec<u64> {
    match args.model {
        ModelKind::Supervised => dict.counts(EntryKind::Label),
        _ => dict.counts(EntryKind::Word),
    }
}

/// Output layer for queries. Negative sampling needs no table at inference.
fn inference_layer(args: &Args, dict: &Dictionary, tree: Option<HuffmanTree>) -> OutputLayer {
    match args.loss {
        LossKind::NegativeSampling => OutputLayer::NegativeSampling {
            neg: args.neg,
            table: NegativeTable::new(&[], 0),
        },
        LossKind::HierarchicalSoftmax => OutputLayer::HierarchicalSoftmax {
            tree: tree.unwrap_or_else(|| HuffmanTree::build(&output_counts(args, dict))),
        },
        LossKind::Softmax => OutputLayer::Softmax,
    }
}

/// Label-prediction quality over a test set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestMetrics {
    /// Lines with at least one label and one feature.
    pub examples: u64,
    /// Gold labels across those lines.
    pub gold: u64,
    /// Predictions returned.
    pub predicted: u64,
    /// Predictions that were gold labels.
    pub correct: u64,
}

impl TestMetrics {
    pub fn precision(&self) -> f64 {
        if self.predicted == 0 {
            0.0
        } else {
            self.correct as f64 / self.predicted as f64
        }
    }

    pub fn recall(&self) -> f64 {
        if self.gold == 0 {
            0.0
        } else {
            self.correct as f64 / self.gold as f64
        }
    }
}

/// Everything produced by training, ready for queries and persistence.
#[derive(Debug)]
pub struct TrainedModel {
    args: Args,
    dict: Dictionary,
    input: Parameters,
    output: Parameters,
    layer: OutputLayer,
    /// Unit-norm word vectors, built on the first neighbour query.
    word_vectors: OnceLock<Matrix>,
}

impl TrainedModel {
    /// Assemble a model from dense matrices, checking their shapes.
    pub fn from_parts(args: Args, dict: Dictionary, input: Matrix, output: Matrix) -> Result<Self> {
        let model = Self {
            layer: inference_layer(&args, &dict, None),
            args,
            dict,
            input: Parameters::Dense(input),
            output: Parameters::Dense(output),
            word_vectors: OnceLock::new(),
        };
        model
            .check_shapes()
            .map_err(|(expected, actual)| Error::DimensionMismatch { expected, actual })?;
        Ok(model)
    }

    /// `Err((expected, actual))` for the first inconsistent dimension.
    fn check_shapes(&self) -> std::result::Result<(), (usize, usize)> {
        let checks = [
            (self.args.dim, self.input.cols()),
            (self.args.dim, self.output.cols()),
            (self.dict.nwords() + self.dict.bucket_rows(), self.input.rows()),
            (output_size(&self.args, &self.dict), self.output.rows()),
        ];
        match checks.into_iter().find(|(e, a)| e != a) {
            Some(bad) => Err(bad),
            None => Ok(()),
        }
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn input(&self) -> &Parameters {
        &self.input
    }

    pub fn output(&self) -> &Parameters {
        &self.output
    }

    pub fn output_layer(&self) -> &OutputLayer {
        &self.layer
    }

    pub fn dim(&self) -> usize {
        self.args.dim
    }

    pub fn is_quantized(&self) -> bool {
        self.input.is_quantized()
    }

    // ── Vectors ─────────────────────────────────────────────────────────────

    fn average_input(&self, ids: &[usize]) -> Vector {
        let mut v = Vector::new(self.args.dim);
        for &i in ids {
            v.add_row(&self.input, i, 1.0);
        }
        if !ids.is_empty() {
            v.mul(1.0 / ids.len() as f32);
        }
        v
    }

    /// Mean of the word's own row and its n-gram rows. Out-of-vocabulary
    /// words are built from n-grams alone; with no n-grams the result is zero.
    pub fn word_vector(&self, word: &str) -> Vector {
        self.average_input(&self.dict.subword_ids(word))
    }

    /// Same as [`word_vector`](Self::word_vector).
    #[deprecated(note = "use `word_vector`")]
    pub fn vector(&self, word: &str) -> Vector {
        self.word_vector(word)
    }

    /// Row of a single character n-gram (zero if buckets are off or pruned away).
    pub fn subword_vector(&self, subword: &str) -> Vector {
        let mut v = Vector::new(self.args.dim);
        if let Some(id) = self.dict.subword_id(subword) {
            v.add_row(&self.input, id, 1.0);
        }
        v
    }

    /// Supervised: mean of the line's input features. Otherwise: mean of the
    /// unit-normalized vectors of the line's words; zero-norm words are skipped.
    pub fn sentence_vector(&self, text: &str) -> Vector {
        if self.args.model == ModelKind::Supervised {
            let (mut words, mut labels) = (Vec::new(), Vec::new());
            self.dict.get_labeled_line(text, &mut words, &mut labels);
            return self.average_input(&words);
        }
        let mut sum = Vector::new(self.args.dim);
        let mut count = 0usize;
        for token in text.split_whitespace() {
            let mut v = self.word_vector(token);
            let norm = v.norm();
            if norm > 0.0 {
                v.mul(1.0 / norm);
                sum.add_vector(v.as_slice());
                count += 1;
            }
        }
        if count > 0 {
            sum.mul(1.0 / count as f32);
        }
        sum
    }

    /// Every input row that makes up `word`, paired with the string it stands for.
    pub fn ngram_vectors(&self, word: &str) -> Vec<(String, Vector)> {
        let (ids, strings) = self.dict.subword_strings(word);
        strings
            .into_iter()
            .zip(ids)
            .map(|(s, id)| {
                let mut v = Vector::new(self.args.dim);
                v.add_row(&self.input, id, 1.0);
                (s, v)
            })
            .collect()
    }

    fn raw_word_vectors(&self) -> Matrix {
        let dim = self.args.dim;
        let mut m = Matrix::new(self.dict.nwords(), dim);
        for i in 0..self.dict.nwords() {
            let v = self.word_vector(self.dict.word(i));
            m.row_mut(i).copy_from_slice(v.as_slice());
        }
        m
    }

    /// Unit-norm vectors of all words, one row per word id.
    pub fn precompute_word_vectors(&self) -> Matrix {
        let mut m = self.raw_word_vectors();
        let norms = m.l2_norm_rows();
        m.divide_rows(&norms);
        m
    }

    /// Cached [`precompute_word_vectors`](Self::precompute_word_vectors).
    pub fn word_vectors(&self) -> &Matrix {
        self.word_vectors
            .get_or_init(|| self.precompute_word_vectors())
    }

    // ── Neighbours ──────────────────────────────────────────────────────────

    /// The `k` rows of `matrix` most similar to `query`, skipping words in
    /// `exclude`. Scores are `row · query / |query|`, i.e. cosine for
    /// unit-norm rows.
    pub fn nearest_neighbors_in(
        &self,
        matrix: &Matrix,
        query: &[f32],
        k: usize,
        exclude: &HashSet<&str>,
    ) -> Vec<(f32, String)> {
        let mut query_norm = simd::norm(query);
        if query_norm.abs() < 1e-8 {
            query_norm = 1.0;
        }
        let mut scored: Vec<(f32, usize)> = (0..matrix.rows().min(self.dict.len()))
            .filter(|&i| !exclude.contains(self.dict.word(i)))
            .map(|i| (simd::dot(matrix.row(i), query) / query_norm, i))
            .collect();
        top_k(&mut scored, k);
        scored
            .into_iter()
            .map(|(s, i)| (s, self.dict.word(i).to_string()))
            .collect()
    }

    /// The `k` words closest to `word` by cosine similarity.
    pub fn nearest_neighbors(&self, word: &str, k: usize) -> Vec<(f32, String)> {
        let query = self.word_vector(word);
        let exclude = HashSet::from([word]);
        self.nearest_neighbors_in(self.word_vectors(), query.as_slice(), k, &exclude)
    }

    /// Words closest to `a - b + c` (each term unit-normalized), excluding the three inputs.
    pub fn analogies(&self, a: &str, b: &str, c: &str, k: usize) -> Vec<(f32, String)> {
        let mut query = Vector::new(self.args.dim);
        for (word, sign) in [(a, 1.0f32), (b, -1.0), (c, 1.0)] {
            let v = self.word_vector(word);
            let norm = v.norm();
            if norm > 0.0 {
                query.add_scaled(v.as_slice(), sign / norm);
            }
        }
        let exclude = HashSet::from([a, b, c]);
        self.nearest_neighbors_in(self.word_vectors(), query.as_slice(), k, &exclude)
    }

    // ── Classification ──────────────────────────────────────────────────────

    fn require_supervised(&self, what: &str) -> Result<()> {
        if self.args.model != ModelKind::Supervised {
            return Err(Error::Unsupported(format!(
                "{what} needs a supervised model, this one is {:?}",
                self.args.model
            )));
        }
        Ok(())
    }

    fn predict_ids(&self, words: &[usize], k: usize, threshold: f32) -> Vec<(f32, usize)> {
        if words.is_empty() {
            return Vec::new();
        }
        let hidden = self.average_input(words);
        self.layer
            .predict(&self.output, hidden.as_slice(), k, threshold)
            .into_iter()
            .map(|(log_p, class)| (log_p.exp(), class))
            .collect()
    }

    /// Like [`predict`](Self::predict), but returns label indices in
    /// `0..nlabels` instead of label strings.
    pub fn predict_classes(&self, text: &str, k: usize, threshold: f32) -> Result<Vec<(f32, usize)>> {
        self.require_supervised("predict")?;
        let (mut words, mut labels) = (Vec::new(), Vec::new());
        self.dict.get_labeled_line(text, &mut words, &mut labels);
        Ok(self.predict_ids(&words, k, threshold))
    }

    /// Top `k` labels of `text` with probability at least `threshold`, best first.
    pub fn predict(&self, text: &str, k: usize, threshold: f32) -> Result<Vec<(f32, String)>> {
        Ok(self
            .predict_classes(text, k, threshold)?
            .into_iter()
            .filter_map(|(p, class)| self.dict.label(class).map(|l| (p, l.to_string())))
            .collect())
    }

    /// Precision and recall at `k` over a labelled corpus.
    pub fn test<R: BufRead>(&self, mut reader: R, k: usize, threshold: f32) -> Result<TestMetrics> {
        self.require_supervised("test")?;
        let mut metrics = TestMetrics::default();
        let (mut words, mut labels) = (Vec::new(), Vec::new());
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            self.dict.get_labeled_line(&line, &mut words, &mut labels);
            if labels.is_empty() || words.is_empty() {
                continue;
            }
            let predictions = self.predict_ids(&words, k, threshold);
            metrics.examples += 1;
            metrics.gold += labels.len() as u64;
            metrics.predicted += predictions.len() as u64;
            metrics.correct += predictions
                .iter()
                .filter(|(_, class)| labels.contains(class))
                .count() as u64;
        }
        Ok(metrics)
    }

    // ── Quantization ────────────────────────────────────────────────────────

    /// Input row ids to keep under `cutoff`: `</s>` first, then by descending norm.
    fn select_embeddings(&self, input: &Matrix, cutoff: usize) -> Vec<usize> {
        let norms = input.l2_norm_rows();
        let eos = self.dict.word_id(EOS);
        let mut idx: Vec<usize> = (0..input.rows()).collect();
        idx.sort_by(|&a, &b| {
            (Some(b) == eos)
                .cmp(&(Some(a) == eos))
                .then_with(|| norms[b].total_cmp(&norms[a]))
        });
        idx.truncate(cutoff);
        idx
    }

    /// Replace the input matrix (and with `qout` the output matrix) by its
    /// product-quantized form. With a `cutoff`, the dictionary and input
    /// matrix are first pruned to the `cutoff` largest-norm rows; only
    /// supervised models can be pruned, since embedding models index the
    /// output matrix by word id.
    ///
    /// On error the model is left unchanged.
    pub fn quantize(&mut self, qargs: &QuantizeArgs) -> Result<()> {
        qargs.validate()?;
        let Parameters::Dense(input) = &self.input else {
            return Err(Error::Unsupported("model is already quantized".into()));
        };

        let prune = qargs.cutoff > 0 && qargs.cutoff < input.rows();
        if prune && self.args.model != ModelKind::Supervised {
            return Err(Error::Unsupported(format!(
                "cutoff needs a supervised model, this one is {:?}",
                self.args.model
            )));
        }

        let mut dict = self.dict.clone();
        let input = if prune {
            let mut idx = self.select_embeddings(input, qargs.cutoff);
            dict.prune(&mut idx);
            input.select_rows(&idx)
        } else {
            input.clone()
        };

        let qinput = QMatrix::quantize(&input, qargs.dsub, qargs.nbits, qargs.qnorm, qargs.seed)?;
        let output = match &self.output {
            Parameters::Dense(m) if qargs.qout => Parameters::Quantized(QMatrix::quantize(
                m,
                qargs.dsub,
                qargs.nbits,
                qargs.qnorm,
                qargs.seed,
            )?),
            other => other.clone(),
        };

        let dict = std::mem::replace(&mut self.dict, dict);
        let input = std::mem::replace(&mut self.input, Parameters::Quantized(qinput));
        let output = std::mem::replace(&mut self.output, output);
        if let Err((expected, actual)) = self.check_shapes() {
            self.dict = dict;
            self.input = input;
            self.output = output;
            return Err(Error::DimensionMismatch { expected, actual });
        }
        self.word_vectors = OnceLock::new();
        info!(
            rows = self.input.rows(),
            words = self.dict.nwords(),
            qout = self.output.is_quantized(),
            "quantized model"
        );
        Ok(())
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.save_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        format::write_header(writer)?;
        codec::write_bytes(writer, &serde_json::to_vec(&self.args)?)?;
        self.dict.save(writer)?;
        self.input.save(writer)?;
        self.output.save(writer)?;
        if let Some(tree) = self.layer.tree() {
            tree.save(writer)?;
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        Self::load_from(&mut reader)
    }

    pub fn load_from<R: Read>(reader: &mut R) -> Result<Self> {
        format::read_header(reader)?;
        let args: Args = serde_json::from_slice(&codec::read_bytes(reader, "args")?)?;
        args.validate()
            .map_err(|e| Error::Format(format!("stored configuration is invalid: {e}")))?;
        let dict = Dictionary::load(&args, reader)?;
        let input = Parameters::load(reader)?;
        let output = Parameters::load(reader)?;
        let tree = match args.loss {
            LossKind::HierarchicalSoftmax => Some(HuffmanTree::load(reader)?),
            _ => None,
        };
        format::expect_end(reader)?;

        if let Some(tree) = &tree {
            if tree.leaves() != output_size(&args, &dict) {
                return Err(Error::Format(format!(
                    "tree has {} leaves for {} output rows",
                    tree.leaves(),
                    output_size(&args, &dict)
                )));
            }
        }
        let model = Self {
            layer: inference_layer(&args, &dict, tree),
            args,
            dict,
            input,
            output,
            word_vectors: OnceLock::new(),
        };
        model.check_shapes().map_err(|(expected, actual)| {
            Error::Format(format!("matrix dimension {actual} does not match {expected}"))
        })?;
        Ok(model)
    }

    /// Write every word's vector in the text vector format.
    pub fn save_vectors(&self, path: impl AsRef<Path>) -> Result<()> {
        let m = self.raw_word_vectors();
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        vectors::write_vectors(
            &mut writer,
            m.rows(),
            m.cols(),
            (0..m.rows()).map(|i| (self.dict.word(i), m.row(i))),
        )?;
        writer.flush()?;
        Ok(())
    }

    /// Write the output matrix, one row per label (supervised) or word.
    pub fn save_output(&self, path: impl AsRef<Path>) -> Result<()> {
        let m = self.output.to_dense();
        let offset = match self.args.model {
            ModelKind::Supervised => self.dict.nwords(),
            _ => 0,
        };
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        vectors::write_vectors(
            &mut writer,
            m.rows(),
            m.cols(),
            (0..m.rows()).map(|i| (self.dict.word(offset + i), m.row(i))),
        )?;
        writer.flush()?;
        Ok(())
    }
}

/// Keep the `k` highest-scoring entries, best first; ties by ascending id.
fn top_k(scored: &mut Vec<(f32, usize)>, k: usize) {
    let order = |a: &(f32, usize), b: &(f32, usize)| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1));
    if k == 0 {
        scored.clear();
        return;
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, order);
        scored.truncate(k);
    }
    scored.sort_by(order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn toy_embedding_model() -> TrainedModel {
        let args = Args {
            dim: 3,
            min_count: 1,
            maxn: 0,
            bucket: 0,
            vocab_capacity: 64,
            ..Args::skipgram()
        };
        let dict = Dictionary::from_reader(&args, Cursor::new("king queen man woman\n")).unwrap();
        let mut input = Matrix::new(dict.nwords(), 3);
        let rows = [
            ("king", [1.0, 1.0, 0.0]),
            ("queen", [1.0, 0.0, 1.0]),
            ("man", [0.0, 1.0, 0.0]),
            ("woman", [0.0, 0.0, 1.0]),
        ];
        for (w, r) in rows {
            input.row_mut(dict.word_id(w).unwrap()).copy_from_slice(&r);
        }
        let output = Matrix::new(dict.nwords(), 3);
        TrainedModel::from_parts(args, dict, input, output).unwrap()
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let args = Args {
            dim: 3,
            min_count: 1,
            maxn: 0,
            bucket: 0,
            vocab_capacity: 64,
            ..Args::skipgram()
        };
        let dict = Dictionary::from_reader(&args, Cursor::new("a b\n")).unwrap();
        let err = TrainedModel::from_parts(args, dict, Matrix::new(3, 4), Matrix::new(3, 3))
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 4 }));
    }

    #[test]
    fn deprecated_vector_forwards() {
        let m = toy_embedding_model();
        #[allow(deprecated)]
        let v = m.vector("king");
        assert_eq!(v, m.word_vector("king"));
        assert_eq!(v.as_slice(), &[1.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_word_without_ngrams_is_zero() {
        let m = toy_embedding_model();
        assert_eq!(m.word_vector("prince").norm(), 0.0);
    }

    #[test]
    fn analogy_finds_queen() {
        let m = toy_embedding_model();
        let out = m.analogies("king", "man", "woman", 1);
        assert_eq!(out[0].1, "queen");
    }

    #[test]
    fn neighbours_exclude_the_query() {
        let m = toy_embedding_model();
        let out = m.nearest_neighbors("king", 10);
        assert!(out.iter().all(|(_, w)| w != "king"));
        assert!(out.windows(2).all(|w| w[0].0 >= w[1].0));
    }

    #[test]
    fn sentence_vector_averages_unit_vectors() {
        let m = toy_embedding_model();
        let v = m.sentence_vector("man woman unknown");
        assert_eq!(v.as_slice(), &[0.0, 0.5, 0.5]);
    }

    #[test]
    fn predict_on_embedding_model_is_unsupported() {
        let m = toy_embedding_model();
        assert!(matches!(m.predict("king", 1, 0.0), Err(Error::Unsupported(_))));
    }

    #[test]
    fn top_k_orders_and_truncates() {
        let mut v = vec![(0.1, 0), (0.9, 1), (0.5, 2), (0.9, 3)];
        top_k(&mut v, 3);
        assert_eq!(v, vec![(0.9, 1), (0.9, 3), (0.5, 2)]);
    }
}
