//! Fixed-depth append-only Merkle tree with a bounded root history.
//!
//! Incomplete subtrees are padded with the precomputed hash of an empty
//! subtree at the same level (`zero[i]`), never by duplicating the odd node.
//! The withdrawal circuit folds paths under the same rule, so the padding
//! here must not change.
//!
//! Every level's node vector is kept, so an insert only rehashes the path
//! from the new leaf to the root and `root`/`proof` are plain lookups.

use std::collections::{HashMap, VecDeque};

use ark_bn254::Fr;
use thiserror::Error;

use crate::hasher::{HashError, PairHasher, PoseidonHasher};

/// Tree depth used by every pool; bounds capacity to 2^20 deposits.
pub const DEFAULT_DEPTH: usize = 20;
/// Number of recent roots a withdrawal proof may reference.
pub const ROOT_HISTORY_CAPACITY: usize = 100;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("tree depth must be between 1 and {MAX_DEPTH}, got {0}")]
    InvalidDepth(usize),
    #[error("root history capacity must be non-zero")]
    EmptyHistory,
    #[error("tree is full ({capacity} leaves)")]
    TreeFull { capacity: u64 },
    #[error("leaf index {index} out of range (leaf count {leaf_count})")]
    IndexOutOfRange { index: usize, leaf_count: usize },
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Membership path for one leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    /// Sibling at each level, bottom-up.
    pub siblings: Vec<Fr>,
    /// `true` where the running node is a right child.
    pub path_bits: Vec<bool>,
}

impl MerkleProof {
    /// Fold `leaf` with the siblings to the root this path commits to.
    pub fn compute_root<H: PairHasher>(&self, leaf: &Fr, hasher: &mut H) -> Result<Fr, HashError> {
        let mut node = *leaf;
        for (sibling, is_right) in self.siblings.iter().zip(&self.path_bits) {
            node = if *is_right {
                hasher.hash_pair(sibling, &node)?
            } else {
                hasher.hash_pair(&node, sibling)?
            };
        }
        Ok(node)
    }

    /// Path bits as the `0`/`1` integers the circuit input expects.
    pub fn path_indices(&self) -> Vec<u8> {
        self.path_bits.iter().map(|bit| u8::from(*bit)).collect()
    }
}

pub struct MerkleTree<H = PoseidonHasher> {
    depth: usize,
    hasher: H,
    /// `zeros[i]` is the root of an empty subtree of height `i`.
    zeros: Vec<Fr>,
    /// `layers[0]` holds the leaves, `layers[depth]` the root once non-empty.
    layers: Vec<Vec<Fr>>,
    /// First insertion index of each distinct commitment.
    positions: HashMap<Fr, usize>,
    root_history: VecDeque<Fr>,
    history_capacity: usize,
}

impl MerkleTree<PoseidonHasher> {
    /// Poseidon tree with the default root-history window.
    pub fn new(depth: usize) -> Result<Self, AccumulatorError> {
        Self::with_hasher(PoseidonHasher::new()?, depth, ROOT_HISTORY_CAPACITY)
    }
}

impl<H: PairHasher> MerkleTree<H> {
    pub fn with_hasher(
        mut hasher: H,
        depth: usize,
        history_capacity: usize,
    ) -> Result<Self, AccumulatorError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(AccumulatorError::InvalidDepth(depth));
        }
        if history_capacity == 0 {
            return Err(AccumulatorError::EmptyHistory);
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(Fr::from(0u64));
        for level in 1..=depth {
            let below = zeros[level - 1];
            zeros.push(hasher.hash_pair(&below, &below)?);
        }

        let mut root_history = VecDeque::with_capacity(history_capacity + 1);
        root_history.push_back(zeros[depth]);

        Ok(Self {
            depth,
            hasher,
            zeros,
            layers: vec![Vec::new(); depth + 1],
            positions: HashMap::new(),
            root_history,
            history_capacity,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn root_history_len(&self) -> usize {
        self.root_history.len()
    }

    /// Hash of an empty subtree of the given height.
    pub fn zero(&self, level: usize) -> Option<Fr> {
        self.zeros.get(level).copied()
    }

    /// Append a leaf and record the resulting root. Returns the leaf index.
    pub fn insert(&mut self, leaf: Fr) -> Result<usize, AccumulatorError> {
        let index = self.leaf_count();
        if index as u64 >= self.capacity() {
            return Err(AccumulatorError::TreeFull {
                capacity: self.capacity(),
            });
        }

        // Hash the whole path before touching any layer so a failure leaves
        // the tree unchanged. The new node is always the last one on its
        // level, so a left child has no right neighbour yet.
        let mut parents = Vec::with_capacity(self.depth);
        let mut node = leaf;
        let mut position = index;
        for level in 0..self.depth {
            node = if position % 2 == 1 {
                let left = self.layers[level][position - 1];
                self.hasher.hash_pair(&left, &node)?
            } else {
                let zero = self.zeros[level];
                self.hasher.hash_pair(&node, &zero)?
            };
            parents.push(node);
            position /= 2;
        }

        self.layers[0].push(leaf);
        for (level, parent) in parents.into_iter().enumerate() {
            let slot = index >> (level + 1);
            let row = &mut self.layers[level + 1];
            if slot < row.len() {
                row[slot] = parent;
            } else {
                row.push(parent);
            }
        }
        self.positions.entry(leaf).or_insert(index);

        let root = self.root();
        self.root_history.push_back(root);
        while self.root_history.len() > self.history_capacity {
            self.root_history.pop_front();
        }

        Ok(index)
    }

    pub fn root(&self) -> Fr {
        match self.layers[self.depth].first() {
            Some(root) => *root,
            None => self.zeros[self.depth],
        }
    }

    pub fn proof(&self, index: usize) -> Result<MerkleProof, AccumulatorError> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(AccumulatorError::IndexOutOfRange { index, leaf_count });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_bits = Vec::with_capacity(self.depth);
        let mut position = index;
        for level in 0..self.depth {
            let sibling = self.layers[level]
                .get(position ^ 1)
                .copied()
                .unwrap_or(self.zeros[level]);
            siblings.push(sibling);
            path_bits.push(position % 2 == 1);
            position /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            siblings,
            path_bits,
        })
    }

    /// Whether `root` is within the recent-root window.
    pub fn is_known_root(&self, root: &Fr) -> bool {
        self.root_history.contains(root)
    }

    /// Index of the first leaf equal to `commitment`.
    pub fn leaf_index_of(&self, commitment: &Fr) -> Option<usize> {
        self.positions.get(commitment).copied()
    }

    pub fn leaf(&self, index: usize) -> Option<Fr> {
        self.layers[0].get(index).copied()
    }

    /// Root recomputed from scratch by level-wise pairwise hashing.
    pub fn recompute_root(&mut self) -> Result<Fr, HashError> {
        if self.layers[0].is_empty() {
            return Ok(self.zeros[self.depth]);
        }
        let mut level_nodes = self.layers[0].clone();
        for level in 0..self.depth {
            let zero = self.zeros[level];
            let mut next = Vec::with_capacity(level_nodes.len().div_ceil(2));
            for pair in level_nodes.chunks(2) {
                let right = pair.get(1).unwrap_or(&zero);
                next.push(self.hasher.hash_pair(&pair[0], right)?);
            }
            level_nodes = next;
        }
        Ok(level_nodes[0])
    }
}
