//! Unigram^0.5 table for negative sampling.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Upper bound on table entries.
pub const NEGATIVE_TABLE_SIZE: usize = 10_000_000;
/// Entries per class before the upper bound applies.
const ENTRIES_PER_CLASS: usize = 1000;

/// Class ids repeated proportionally to `count^0.5`, then shuffled.
#[derive(Debug, Clone)]
pub struct NegativeTable {
    table: Vec<u32>,
    classes: usize,
}

impl NegativeTable {
    pub fn new(counts: &[u64], seed: u64) -> Self {
        let size = NEGATIVE_TABLE_SIZE.min(counts.len().saturating_mul(ENTRIES_PER_CLASS));
        let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
        let mut table = Vec::with_capacity(size);
        let mut classes = 0;
        if z > 0.0 {
            for (i, &c) in counts.iter().enumerate() {
                let n = ((c as f64).sqrt() * size as f64 / z).ceil() as usize;
                if n > 0 {
                    classes += 1;
                }
                table.extend(std::iter::repeat(i as u32).take(n));
            }
        }
        table.shuffle(&mut StdRng::seed_from_u64(seed));
        Self { table, classes }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Next entry from `pos` that differs from `target`.
    ///
    /// `pos` is a per-thread cursor. When the table holds a single class
    /// there is nothing to skip to, and that class is returned as is.
    pub fn sample(&self, pos: &mut usize, target: usize) -> usize {
        if self.table.is_empty() {
            return target;
        }
        loop {
            let neg = self.table[*pos % self.table.len()] as usize;
            *pos = (*pos + 1) % self.table.len();
            if neg != target || self.classes < 2 {
                return neg;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequent_classes_dominate_by_square_root() {
        let t = NegativeTable::new(&[100, 25, 0], 1);
        let ones = t.table.iter().filter(|&&c| c == 0).count();
        let twos = t.table.iter().filter(|&&c| c == 1).count();
        assert!(t.table.iter().all(|&c| c != 2));
        let ratio = ones as f64 / twos as f64;
        assert!((ratio - 2.0).abs() < 0.05, "ratio {ratio}");
    }

    #[test]
    fn rare_classes_keep_at_least_one_entry() {
        let t = NegativeTable::new(&[1_000_000_000_000, 1], 5);
        assert_eq!(t.table.iter().filter(|&&c| c == 1).count(), 1);
        assert_eq!(t.classes, 2);
        let mut pos = 0;
        assert_eq!(t.sample(&mut pos, 0), 1);
    }

    #[test]
    fn sample_skips_the_target() {
        let t = NegativeTable::new(&[10, 10, 10], 3);
        let mut pos = 0;
        for _ in 0..100 {
            assert_ne!(t.sample(&mut pos, 1), 1);
        }
    }

    #[test]
    fn single_class_table_does_not_spin() {
        let t = NegativeTable::new(&[7], 0);
        let mut pos = 0;
        assert_eq!(t.sample(&mut pos, 0), 0);
    }
}
