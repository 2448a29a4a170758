//! Output-layer strategies and the lookup tables they share.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::OnceLock;

use super::negatives::NegativeTable;
use super::tree::HuffmanTree;
use super::State;
use crate::args::LossKind;
use crate::matrix::{RowStore, SharedMatrix};
use crate::simd;

pub const SIGMOID_TABLE_SIZE: usize = 512;
pub const MAX_SIGMOID: f32 = 8.0;
pub const LOG_TABLE_SIZE: usize = 512;

fn sigmoid_table() -> &'static [f32] {
    static TABLE: OnceLock<Vec<f32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as f32 * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as f32 - MAX_SIGMOID;
                1.0 / (1.0 + (-x).exp())
            })
            .collect()
    })
}

fn log_table() -> &'static [f32] {
    static TABLE: OnceLock<Vec<f32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=LOG_TABLE_SIZE)
            .map(|i| ((i as f32 + 1e-5) / LOG_TABLE_SIZE as f32).ln())
            .collect()
    })
}

/// Table sigmoid, clamped to 0 / 1 outside `[-MAX_SIGMOID, MAX_SIGMOID]`.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x < -MAX_SIGMOID {
        0.0
    } else if x > MAX_SIGMOID {
        1.0
    } else {
        let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as f32 / MAX_SIGMOID / 2.0) as usize;
        sigmoid_table()[i]
    }
}

/// Table log for `x` in `(0, 1]`.
#[inline]
pub fn log(x: f32) -> f32 {
    if x > 1.0 {
        return 0.0;
    }
    let i = (x.max(0.0) * LOG_TABLE_SIZE as f32) as usize;
    log_table()[i]
}

/// Exact log with a small floor, used for reported probabilities.
#[inline]
pub fn std_log(x: f32) -> f32 {
    (x + 1e-5).ln()
}

/// How the hidden vector is scored against output rows.
#[derive(Debug, Clone)]
pub enum OutputLayer {
    NegativeSampling { neg: usize, table: NegativeTable },
    HierarchicalSoftmax { tree: HuffmanTree },
    Softmax,
}

impl OutputLayer {
    /// Build the layer for `loss` over classes with the given counts.
    pub fn new(loss: LossKind, counts: &[u64], neg: usize, seed: u64) -> Self {
        match loss {
            LossKind::NegativeSampling => Self::NegativeSampling {
                neg,
                table: NegativeTable::new(counts, seed),
            },
            LossKind::HierarchicalSoftmax => Self::HierarchicalSoftmax {
                tree: HuffmanTree::build(counts),
            },
            LossKind::Softmax => Self::Softmax,
        }
    }

    pub fn kind(&self) -> LossKind {
        match self {
            Self::NegativeSampling { .. } => LossKind::NegativeSampling,
            Self::HierarchicalSoftmax { .. } => LossKind::HierarchicalSoftmax,
            Self::Softmax => LossKind::Softmax,
        }
    }

    pub fn tree(&self) -> Option<&HuffmanTree> {
        match self {
            Self::HierarchicalSoftmax { tree } => Some(tree),
            _ => None,
        }
    }

    /// Loss of predicting `target` from `state.hidden`.
    ///
    /// With `backprop`, accumulates the input gradient into `state.grad` and
    /// updates the touched output rows in place.
    pub fn forward(
        &self,
        wo: &SharedMatrix,
        target: usize,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        match self {
            Self::NegativeSampling { neg, table } => {
                let mut loss = binary_logistic(wo, target, true, state, lr, backprop);
                for _ in 0..*neg {
                    let negative = table.sample(&mut state.neg_pos, target);
                    loss += binary_logistic(wo, negative, false, state, lr, backprop);
                }
                loss
            }
            Self::HierarchicalSoftmax { tree } => {
                let mut loss = 0.0;
                for (&node, &branch) in tree.path(target).iter().zip(tree.code(target)) {
                    loss += binary_logistic(wo, node as usize, branch, state, lr, backprop);
                }
                loss
            }
            Self::Softmax => {
                softmax_output(wo, state.hidden.as_slice(), state.output.as_mut_slice());
                if backprop {
                    for i in 0..wo.rows() {
                        let label = if i == target { 1.0 } else { 0.0 };
                        let alpha = lr * (label - state.output[i]);
                        wo.add_row_to(state.grad.as_mut_slice(), i, alpha);
                        wo.add_to_row(state.hidden.as_slice(), i, alpha);
                    }
                }
                -log(state.output[target])
            }
        }
    }

    /// Top `k` classes with probability at least `threshold`, best first, as
    /// `(log probability, class)`.
    pub fn predict<M: RowStore + ?Sized>(
        &self,
        wo: &M,
        hidden: &[f32],
        k: usize,
        threshold: f32,
    ) -> Vec<(f32, usize)> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        match self {
            Self::HierarchicalSoftmax { tree } => {
                if let Some(root) = tree.root() {
                    dfs(tree, wo, hidden, k, std_log(threshold), root, 0.0, &mut heap);
                }
            }
            Self::NegativeSampling { .. } => {
                for i in 0..wo.rows() {
                    let p = sigmoid(wo.dot_row(hidden, i));
                    push_top_k(&mut heap, k, threshold, p, i);
                }
            }
            Self::Softmax => {
                let mut output = vec![0.0; wo.rows()];
                softmax_output(wo, hidden, &mut output);
                for (i, &p) in output.iter().enumerate() {
                    push_top_k(&mut heap, k, threshold, p, i);
                }
            }
        }
        let mut out: Vec<(f32, usize)> = heap
            .into_iter()
            .map(|Reverse(Scored(s, i))| (s, i))
            .collect();
        out.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        out
    }
}

/// One sigmoid term; `label` says whether `target` is the positive class.
fn binary_logistic(
    wo: &SharedMatrix,
    target: usize,
    label: bool,
    state: &mut State,
    lr: f32,
    backprop: bool,
) -> f32 {
    let score = sigmoid(wo.dot_row(state.hidden.as_slice(), target));
    if backprop {
        let alpha = lr * (label as u8 as f32 - score);
        wo.add_row_to(state.grad.as_mut_slice(), target, alpha);
        wo.add_to_row(state.hidden.as_slice(), target, alpha);
    }
    if label {
        -log(score)
    } else {
        -log(1.0 - score)
    }
}

/// Numerically stable softmax of `wo · hidden` into `output`.
fn softmax_output<M: RowStore + ?Sized>(wo: &M, hidden: &[f32], output: &mut [f32]) {
    if output.is_empty() {
        return;
    }
    for (i, o) in output.iter_mut().enumerate() {
        *o = wo.dot_row(hidden, i);
    }
    let max = output[simd::argmax(output)];
    let mut z = 0.0;
    for o in output.iter_mut() {
        *o = (*o - max).exp();
        z += *o;
    }
    for o in output.iter_mut() {
        *o /= z;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored(f32, usize);

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then_with(|| other.1.cmp(&self.1))
    }
}

type TopK = BinaryHeap<Reverse<Scored>>;

fn push_top_k(heap: &mut TopK, k: usize, threshold: f32, p: f32, class: usize) {
    if p < threshold {
        return;
    }
    let score = std_log(p);
    if heap.len() == k && heap.peek().is_some_and(|Reverse(min)| score < min.0) {
        return;
    }
    heap.push(Reverse(Scored(score, class)));
    if heap.len() > k {
        heap.pop();
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs<M: RowStore + ?Sized>(
    tree: &HuffmanTree,
    wo: &M,
    hidden: &[f32],
    k: usize,
    log_threshold: f32,
    node: usize,
    score: f32,
    heap: &mut TopK,
) {
    if score < log_threshold {
        return;
    }
    if heap.len() == k && heap.peek().is_some_and(|Reverse(min)| score < min.0) {
        return;
    }
    let n = tree.nodes()[node];
    match (n.left, n.right) {
        (Some(left), Some(right)) => {
            let f = sigmoid(wo.dot_row(hidden, node - tree.leaves()));
            dfs(tree, wo, hidden, k, log_threshold, left, score + std_log(1.0 - f), heap);
            dfs(tree, wo, hidden, k, log_threshold, right, score + std_log(f), heap);
        }
        _ => {
            heap.push(Reverse(Scored(score, node)));
            if heap.len() > k {
                heap.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    #[test]
    fn sigmoid_table_matches_closed_form() {
        for x in [-7.9f32, -1.0, 0.0, 0.5, 3.0, 7.9] {
            let exact = 1.0 / (1.0 + (-x).exp());
            assert!((sigmoid(x) - exact).abs() < 0.02, "x={x}");
        }
        assert_eq!(sigmoid(-100.0), 0.0);
        assert_eq!(sigmoid(100.0), 1.0);
    }

    #[test]
    fn log_table_is_monotone() {
        assert!(log(0.1) < log(0.5));
        assert!(log(1.0).abs() < 1e-3);
        assert_eq!(log(2.0), 0.0);
        assert!(log(0.0).is_finite());
    }

    #[test]
    fn softmax_predict_ranks_by_score() {
        let wo = Matrix::from_vec(3, 2, vec![1.0, 0.0, 0.0, 1.0, -1.0, 0.0]);
        let layer = OutputLayer::Softmax;
        let out = layer.predict(&wo, &[2.0, 1.0], 2, 0.0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].1, 0);
        assert_eq!(out[1].1, 1);
        assert!(out[0].0 >= out[1].0);
    }

    #[test]
    fn threshold_filters_predictions() {
        let wo = Matrix::from_vec(2, 1, vec![5.0, -5.0]);
        let out = OutputLayer::Softmax.predict(&wo, &[1.0], 2, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, 0);
    }

    #[test]
    fn hierarchical_predict_probabilities_sum_to_one() {
        let tree = HuffmanTree::build(&[5, 3, 2, 1]);
        let layer = OutputLayer::HierarchicalSoftmax { tree };
        let wo = Matrix::uniform(4, 3, 1.0, 2);
        let out = layer.predict(&wo, &[0.3, -0.4, 0.9], 4, 0.0);
        assert_eq!(out.len(), 4);
        let total: f32 = out.iter().map(|(s, _)| s.exp()).sum();
        assert!((total - 1.0).abs() < 1e-3, "total {total}");
    }
}
