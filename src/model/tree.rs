//! Huffman tree for hierarchical softmax, stored as a flat arena.
//!
//! Leaves are `0..osz` (one per output class, in dictionary order, which is
//! by descending count); internal nodes follow, and the root is the last
//! node, `2·osz − 2`. Internal node `n` owns output row `n − osz`.

use std::io::{Read, Write};

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::persistence::codec;

/// Path and code storage; 32 levels cover any balanced tree up to 4G leaves.
pub type Path = SmallVec<[u32; 32]>;
pub type Code = SmallVec<[bool; 32]>;

const NO_NODE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub count: u64,
    /// Whether this node is the right child of its parent.
    pub binary: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HuffmanTree {
    osz: usize,
    nodes: Vec<Node>,
    paths: Vec<Path>,
    codes: Vec<Code>,
}

impl HuffmanTree {
    /// Build from class counts sorted in descending order.
    ///
    /// Two queues merge in linear time: leaves are consumed from the
    /// smallest end backwards, internal nodes are created in increasing
    /// count order.
    pub fn build(counts: &[u64]) -> Self {
        let osz = counts.len();
        let n = (2 * osz).saturating_sub(1);
        let mut nodes = vec![
            Node {
                parent: None,
                left: None,
                right: None,
                count: u64::MAX / 4,
                binary: false,
            };
            n
        ];
        for (node, &c) in nodes.iter_mut().zip(counts) {
            node.count = c;
        }

        let mut leaf = osz as isize - 1;
        let mut next = osz;
        for i in osz..n {
            let mut mini = [0usize; 2];
            for slot in &mut mini {
                if leaf >= 0 && nodes[leaf as usize].count < nodes[next].count {
                    *slot = leaf as usize;
                    leaf -= 1;
                } else {
                    *slot = next;
                    next += 1;
                }
            }
            nodes[i].left = Some(mini[0]);
            nodes[i].right = Some(mini[1]);
            nodes[i].count = nodes[mini[0]].count + nodes[mini[1]].count;
            nodes[mini[0]].parent = Some(i);
            nodes[mini[1]].parent = Some(i);
            nodes[mini[1]].binary = true;
        }

        let mut tree = Self {
            osz,
            nodes,
            paths: Vec::new(),
            codes: Vec::new(),
        };
        tree.compute_paths();
        tree
    }

    fn compute_paths(&mut self) {
        self.paths = Vec::with_capacity(self.osz);
        self.codes = Vec::with_capacity(self.osz);
        for i in 0..self.osz {
            let mut path = Path::new();
            let mut code = Code::new();
            let mut j = i;
            while let Some(p) = self.nodes[j].parent {
                path.push((p - self.osz) as u32);
                code.push(self.nodes[j].binary);
                j = p;
            }
            self.paths.push(path);
            self.codes.push(code);
        }
    }

    /// Number of leaves.
    pub fn leaves(&self) -> usize {
        self.osz
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> Option<usize> {
        self.nodes.len().checked_sub(1)
    }

    /// Output rows of the internal nodes above leaf `target`, leaf to root.
    pub fn path(&self, target: usize) -> &[u32] {
        &self.paths[target]
    }

    /// Branch taken at each node of [`path`](Self::path).
    pub fn code(&self, target: usize) -> &[bool] {
        &self.codes[target]
    }

    pub fn depth(&self, target: usize) -> usize {
        self.paths[target].len()
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        fn link(n: Option<usize>) -> u64 {
            n.map_or(NO_NODE, |i| i as i64) as u64
        }
        codec::write_u64(writer, self.osz as u64)?;
        for node in &self.nodes {
            codec::write_u64(writer, link(node.parent))?;
            codec::write_u64(writer, link(node.left))?;
            codec::write_u64(writer, link(node.right))?;
            codec::write_u64(writer, node.count)?;
            codec::write_u8(writer, node.binary as u8)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let osz = codec::read_len(reader, 1 << 32, "tree leaves")?;
        let n = (2 * osz).saturating_sub(1);
        let link = |reader: &mut R| -> Result<Option<usize>> {
            let raw = codec::read_u64(reader, "tree link")? as i64;
            match raw {
                NO_NODE => Ok(None),
                i if i >= 0 && (i as usize) < n => Ok(Some(i as usize)),
                i => Err(Error::Format(format!("tree link {i} out of range {n}"))),
            }
        };
        let mut nodes = Vec::with_capacity(n);
        for _ in 0..n {
            let parent = link(reader)?;
            let left = link(reader)?;
            let right = link(reader)?;
            let count = codec::read_u64(reader, "tree count")?;
            let binary = codec::read_u8(reader, "tree branch")? != 0;
            if parent.is_some_and(|p| p < osz) {
                return Err(Error::Format("tree leaf used as a parent".into()));
            }
            nodes.push(Node {
                parent,
                left,
                right,
                count,
                binary,
            });
        }
        let mut tree = Self {
            osz,
            nodes,
            paths: Vec::new(),
            codes: Vec::new(),
        };
        tree.compute_paths();
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frequent_leaves_get_short_paths() {
        let tree = HuffmanTree::build(&[1000, 10, 5, 1]);
        assert_eq!(tree.nodes().len(), 7);
        assert_eq!(tree.depth(0), 1);
        assert_eq!(tree.depth(3), 3);
        assert_eq!(tree.root(), Some(6));
        assert_eq!(tree.nodes()[6].count, 1016);
    }

    #[test]
    fn paths_end_at_the_root() {
        let tree = HuffmanTree::build(&[5, 4, 3, 2, 1]);
        let root_row = (tree.root().unwrap() - tree.leaves()) as u32;
        for leaf in 0..5 {
            assert_eq!(*tree.path(leaf).last().unwrap(), root_row);
            assert_eq!(tree.path(leaf).len(), tree.code(leaf).len());
        }
    }

    #[test]
    fn codes_are_unique() {
        let tree = HuffmanTree::build(&[9, 7, 7, 3, 2, 2, 1]);
        let codes: std::collections::HashSet<Vec<bool>> =
            (0..7).map(|i| tree.code(i).to_vec()).collect();
        assert_eq!(codes.len(), 7);
    }

    #[test]
    fn zipf_vocabulary_stays_shallow() {
        // Zipf counts over a few thousand classes, sorted descending.
        let v = 4000usize;
        let counts: Vec<u64> = (0..v).map(|i| 1_000_000 / (i as u64 + 1)).collect();
        let tree = HuffmanTree::build(&counts);
        assert_eq!(tree.nodes().len(), 2 * v - 1);

        let log2_v = (v as f64).log2().ceil() as usize;
        let slack = 8;
        let max_depth = (0..v).map(|i| tree.depth(i)).max().unwrap();
        assert!(max_depth <= log2_v + slack, "max depth {max_depth} for {v} classes");

        let total: f64 = counts.iter().map(|&c| c as f64).sum();
        let mut kraft = 0.0f64;
        let mut expected_len = 0.0f64;
        let mut entropy = 0.0f64;
        for (i, &c) in counts.iter().enumerate() {
            assert_eq!(tree.path(i).len(), tree.code(i).len());
            let p = c as f64 / total;
            kraft += 0.5f64.powi(tree.depth(i) as i32);
            expected_len += p * tree.depth(i) as f64;
            entropy -= p * p.log2();
        }
        // Full binary tree, and within one bit of the entropy.
        assert!((kraft - 1.0).abs() < 1e-9, "kraft sum {kraft}");
        assert!(expected_len < entropy + 1.0, "{expected_len} vs {entropy}");
    }

    #[test]
    fn single_class_has_empty_path() {
        let tree = HuffmanTree::build(&[3]);
        assert_eq!(tree.depth(0), 0);
    }

    #[test]
    fn save_load_round_trip() {
        let tree = HuffmanTree::build(&[8, 4, 2, 1, 1]);
        let mut buf = Vec::new();
        tree.save(&mut buf).unwrap();
        assert_eq!(HuffmanTree::load(&mut Cursor::new(buf)).unwrap(), tree);
    }
}
