//! Per-thread training kernel.
//!
//! A [`Model`] borrows the shared parameters (input and output
//! [`SharedMatrix`]), the frozen [`Dictionary`], and the [`OutputLayer`], and
//! owns its scratch [`State`]. One is created per worker thread.
//!
//! ```text
//! input ids ──avg rows of wi──▶ hidden ──OutputLayer──▶ loss
//!     ▲                            │                     │
//!     └──── += grad ◀── grad ◀─────┴──── wo rows updated ┘
//! ```

mod loss;
mod negatives;
mod tree;

pub use loss::{log, sigmoid, std_log, OutputLayer, MAX_SIGMOID, SIGMOID_TABLE_SIZE};
pub use negatives::{NegativeTable, NEGATIVE_TABLE_SIZE};
pub use tree::{HuffmanTree, Node};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::args::{Args, ModelKind};
use crate::dictionary::Dictionary;
use crate::matrix::{average_rows, SharedMatrix};
use crate::vector::Vector;

/// Scratch buffers, random stream and running loss of one worker.
#[derive(Debug, Clone)]
pub struct State {
    pub(crate) hidden: Vector,
    pub(crate) output: Vector,
    pub(crate) grad: Vector,
    pub(crate) rng: StdRng,
    pub(crate) neg_pos: usize,
    loss_sum: f64,
    nexamples: u64,
}

impl State {
    pub fn new(dim: usize, osz: usize, seed: u64) -> Self {
        Self {
            hidden: Vector::new(dim),
            output: Vector::new(osz),
            grad: Vector::new(dim),
            rng: StdRng::seed_from_u64(seed),
            neg_pos: 0,
            loss_sum: 0.0,
            nexamples: 0,
        }
    }

    fn add_loss(&mut self, loss: f32) {
        self.loss_sum += loss as f64;
        self.nexamples += 1;
    }

    /// Mean loss per example since the last [`take_loss`](Self::take_loss).
    pub fn average_loss(&self) -> f64 {
        if self.nexamples == 0 {
            0.0
        } else {
            self.loss_sum / self.nexamples as f64
        }
    }

    /// Drain the accumulated `(loss sum, example count)`.
    pub fn take_loss(&mut self) -> (f64, u64) {
        let out = (self.loss_sum, self.nexamples);
        self.loss_sum = 0.0;
        self.nexamples = 0;
        out
    }

    pub fn hidden(&self) -> &[f32] {
        self.hidden.as_slice()
    }
}

/// Training kernel for one thread.
pub struct Model<'a> {
    kind: ModelKind,
    ws: usize,
    dict: &'a Dictionary,
    wi: &'a SharedMatrix,
    wo: &'a SharedMatrix,
    output: &'a OutputLayer,
    state: State,
}

impl<'a> Model<'a> {
    /// Kernel for worker `thread_id`; its random stream is seeded with `args.seed + thread_id`.
    pub fn new(
        args: &Args,
        dict: &'a Dictionary,
        wi: &'a SharedMatrix,
        wo: &'a SharedMatrix,
        output: &'a OutputLayer,
        thread_id: usize,
    ) -> Self {
        let seed = args.seed.wrapping_add(thread_id as u64);
        let mut state = State::new(wi.cols(), wo.rows(), seed);
        if let OutputLayer::NegativeSampling { table, .. } = output {
            if !table.is_empty() {
                state.neg_pos = state.rng.random_range(0..table.len());
            }
        }
        Self {
            kind: args.model,
            ws: args.ws,
            dict,
            wi,
            wo,
            output,
            state,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    /// One SGD step: predict `targets[target_index]` from the mean of the
    /// `input` rows, then apply the gradient to both matrices.
    ///
    /// Returns the example's loss; empty input is a no-op returning 0.
    pub fn update(&mut self, input: &[usize], targets: &[usize], target_index: usize, lr: f32) -> f32 {
        if input.is_empty() {
            return 0.0;
        }
        average_rows(self.wi, input, self.state.hidden.as_mut_slice());
        self.state.grad.zero();
        let loss = self
            .output
            .forward(self.wo, targets[target_index], &mut self.state, lr, true);
        self.state.add_loss(loss);
        if self.kind == ModelKind::Supervised {
            self.state.grad.mul(1.0 / input.len() as f32);
        }
        for &i in input {
            self.wi.add_to_row(self.state.grad.as_slice(), i, 1.0);
        }
        loss
    }

    /// Loss of one example without touching any parameter.
    pub fn loss(&mut self, input: &[usize], targets: &[usize], target_index: usize) -> f32 {
        if input.is_empty() {
            return 0.0;
        }
        average_rows(self.wi, input, self.state.hidden.as_mut_slice());
        self.output
            .forward(self.wo, targets[target_index], &mut self.state, 0.0, false)
    }

    /// Train on one parsed line and return the summed loss of its examples.
    ///
    /// `line` holds word ids (cbow, skipgram) or input feature ids
    /// (supervised); `labels` is only read in supervised mode.
    pub fn forward_and_update(&mut self, line: &[usize], labels: &[usize], lr: f32) -> f32 {
        match self.kind {
            ModelKind::Supervised => self.supervised(line, labels, lr),
            ModelKind::Cbow => self.cbow(line, lr),
            ModelKind::SkipGram => self.skipgram(line, lr),
        }
    }

    fn supervised(&mut self, line: &[usize], labels: &[usize], lr: f32) -> f32 {
        if labels.is_empty() || line.is_empty() {
            return 0.0;
        }
        let i = self.state.rng.random_range(0..labels.len());
        self.update(line, labels, i, lr)
    }

    fn cbow(&mut self, line: &[usize], lr: f32) -> f32 {
        let dict = self.dict;
        let mut bow = Vec::new();
        let mut loss = 0.0;
        for w in 0..line.len() {
            let b = self.state.rng.random_range(1..=self.ws);
            bow.clear();
            for c in w.saturating_sub(b)..(w + b + 1).min(line.len()) {
                if c != w {
                    bow.extend_from_slice(dict.subwords_of(line[c]));
                }
            }
            loss += self.update(&bow, line, w, lr);
        }
        loss
    }

    fn skipgram(&mut self, line: &[usize], lr: f32) -> f32 {
        let dict = self.dict;
        let mut loss = 0.0;
        for w in 0..line.len() {
            let b = self.state.rng.random_range(1..=self.ws);
            let ngrams = dict.subwords_of(line[w]);
            for c in w.saturating_sub(b)..(w + b + 1).min(line.len()) {
                if c != w {
                    loss += self.update(ngrams, line, c, lr);
                }
            }
        }
        loss
    }

    /// Top `k` classes for `input` with probability at least `threshold`,
    /// as `(probability, class)`, best first.
    pub fn predict(&mut self, input: &[usize], k: usize, threshold: f32) -> Vec<(f32, usize)> {
        if input.is_empty() {
            return Vec::new();
        }
        average_rows(self.wi, input, self.state.hidden.as_mut_slice());
        self.output
            .predict(self.wo, self.state.hidden.as_slice(), k, threshold)
            .into_iter()
            .map(|(log_p, class)| (log_p.exp(), class))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::LossKind;
    use crate::dictionary::EntryKind;
    use crate::matrix::Matrix;
    use std::io::Cursor;

    const SENTENCE: &str = "the cat sat on the mat";

    fn setup(model: ModelKind, loss: LossKind) -> (Args, Dictionary) {
        let args = Args {
            model,
            loss,
            dim: 10,
            ws: 2,
            min_count: 1,
            bucket: 100,
            minn: 3,
            maxn: 4,
            vocab_capacity: 1024,
            ..Args::cbow()
        };
        let dict = Dictionary::from_reader(&args, Cursor::new(format!("{SENTENCE}\n"))).unwrap();
        (args, dict)
    }

    fn line_ids(dict: &Dictionary) -> Vec<usize> {
        SENTENCE
            .split_whitespace()
            .map(|w| dict.word_id(w).unwrap())
            .collect()
    }

    #[test]
    fn one_cbow_update_decreases_loss() {
        for loss_kind in [LossKind::HierarchicalSoftmax, LossKind::Softmax] {
            let (args, dict) = setup(ModelKind::Cbow, loss_kind);
            let rows = dict.nwords() + args.bucket;
            let wi = SharedMatrix::from(Matrix::uniform(rows, args.dim, 1.0, 1));
            let wo = SharedMatrix::from(Matrix::new(dict.nwords(), args.dim));
            let output = OutputLayer::new(loss_kind, &dict.counts(EntryKind::Word), args.neg, 0);
            let mut model = Model::new(&args, &dict, &wi, &wo, &output, 0);

            let line = line_ids(&dict);
            let target = 2; // "sat"
            let mut bow = Vec::new();
            for c in [0, 1, 3, 4] {
                bow.extend_from_slice(dict.subwords_of(line[c]));
            }
            let before = model.loss(&bow, &line, target);
            model.update(&bow, &line, target, 1.0);
            let after = model.loss(&bow, &line, target);
            assert!(after < before, "{loss_kind:?}: {after} !< {before}");
        }
    }

    #[test]
    fn forward_and_update_touches_only_used_rows() {
        let (args, dict) = setup(ModelKind::SkipGram, LossKind::NegativeSampling);
        let rows = dict.nwords() + args.bucket;
        let init = Matrix::uniform(rows, args.dim, 0.1, 2);
        let wi = SharedMatrix::from(init.clone());
        let wo = SharedMatrix::from(Matrix::new(dict.nwords(), args.dim));
        let output = OutputLayer::new(args.loss, &dict.counts(EntryKind::Word), args.neg, 0);
        let mut model = Model::new(&args, &dict, &wi, &wo, &output, 0);

        let line = vec![dict.word_id("cat").unwrap(), dict.word_id("sat").unwrap()];
        let loss = model.forward_and_update(&line, &[], 0.05);
        assert!(loss > 0.0);
        drop(model);

        let touched: std::collections::HashSet<usize> = line
            .iter()
            .flat_map(|&w| dict.subwords_of(w).iter().copied())
            .collect();
        let after = wi.into_matrix();
        for r in 0..rows {
            if !touched.contains(&r) {
                assert_eq!(after.row(r), init.row(r), "row {r} changed");
            }
        }
    }

    #[test]
    fn supervised_update_learns_label() {
        let args = Args {
            dim: 8,
            vocab_capacity: 1024,
            ..Args::supervised()
        };
        let corpus = "__label__a red apple\n__label__b blue sky\n";
        let dict = Dictionary::from_reader(&args, Cursor::new(corpus)).unwrap();
        let wi = SharedMatrix::from(Matrix::uniform(dict.nwords(), args.dim, 1.0 / 8.0, 3));
        let wo = SharedMatrix::from(Matrix::new(dict.nlabels(), args.dim));
        let output = OutputLayer::new(args.loss, &dict.counts(EntryKind::Label), args.neg, 0);
        let mut model = Model::new(&args, &dict, &wi, &wo, &output, 0);

        let (mut words, mut labels) = (Vec::new(), Vec::new());
        for _ in 0..50 {
            for line in corpus.lines() {
                dict.get_labeled_line(line, &mut words, &mut labels);
                model.forward_and_update(&words, &labels, 0.5);
            }
        }
        dict.get_labeled_line("red apple", &mut words, &mut labels);
        let top = model.predict(&words, 1, 0.0);
        assert_eq!(dict.label(top[0].1), Some("__label__a"));
        assert!(top[0].0 > 0.5);
        assert!(model.state().average_loss() > 0.0);
    }
}
