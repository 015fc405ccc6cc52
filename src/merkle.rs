//! Append-only Merkle accumulator for note commitments
//!
//! A fixed-depth (20 level) binary tree over the ordered commitment list.
//! Node storage is sparse: any (level, index) pair not present defaults to
//! the zero value for that level, where `zero[0]` is a domain-separated
//! constant and `zero[k] = H2(zero[k-1], zero[k-1])`.
//!
//! Properties:
//! - Insertion is O(depth) and order-sensitive: the same commitments in a
//!   different order produce a different root.
//! - Leaves are write-once; nothing is ever overwritten or removed.
//! - The whole structure is derived state: it can be rebuilt at any time
//!   from the ordered leaf list (`from_leaves`).

use ff::PrimeField;
use halo2_proofs::pasta::Fp;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::constants::{domains, MAX_TREE_LEAVES, MERKLE_TREE_DEPTH};
use crate::hash::{domain_separator_field, hash2};

/// Errors from accumulator operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    /// Proofs for unfilled positions are refused outright: a zero-path proof
    /// would still verify against the empty subtree and could mask a sync bug.
    #[error("leaf index {index} out of range (leaf count {leaf_count})")]
    LeafIndexOutOfRange { index: u64, leaf_count: u64 },

    #[error("accumulator is full")]
    TreeFull,
}

/// A Merkle path proving membership of a commitment in the tree
///
/// `indices[level]` is 1 if the node at that level is a right child, else 0;
/// `elements[level]` is the sibling value at that level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    position: u64,
    elements: Vec<Fp>,
    indices: Vec<u8>,
}

impl MerklePath {
    fn new(position: u64, elements: Vec<Fp>, indices: Vec<u8>) -> Self {
        debug_assert_eq!(elements.len(), MERKLE_TREE_DEPTH);
        debug_assert_eq!(indices.len(), MERKLE_TREE_DEPTH);
        Self {
            position,
            elements,
            indices,
        }
    }

    /// The all-zero path used for dummy witness slots
    ///
    /// Never valid against a real root; dummy slots are exempt from the
    /// inclusion check, so the contents are irrelevant as long as the shape
    /// is right.
    pub fn dummy() -> Self {
        Self {
            position: 0,
            elements: vec![Fp::zero(); MERKLE_TREE_DEPTH],
            indices: vec![0u8; MERKLE_TREE_DEPTH],
        }
    }

    /// Get the leaf position this path belongs to
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the sibling values, leaf level first
    pub fn elements(&self) -> &[Fp] {
        &self.elements
    }

    /// Get the left/right indicators, leaf level first (1 = right child)
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// Compute the root this path folds to for a given leaf value
    pub fn compute_root(&self, leaf: Fp) -> Fp {
        let mut hash = leaf;
        for level in 0..MERKLE_TREE_DEPTH {
            hash = if self.indices[level] == 1 {
                hash2(self.elements[level], hash)
            } else {
                hash2(hash, self.elements[level])
            };
        }
        hash
    }

    /// Verify the path folds to the expected root
    pub fn verify(&self, leaf: Fp, root: Fp) -> bool {
        self.compute_root(leaf) == root
    }
}

/// The append-only accumulator
///
/// Sparse node storage keyed by (level, index); absent nodes read as the
/// zero value of their level. The root lives at (depth, 0) and is rewritten
/// on every insertion.
#[derive(Clone)]
pub struct Accumulator {
    /// Number of leaves inserted
    leaf_count: u64,
    /// The ordered leaf list (rebuild source)
    leaves: Vec<Fp>,
    /// Sparse node storage: (level, index) -> value
    nodes: HashMap<(usize, u64), Fp>,
    /// Zero-value table, one entry per level plus the empty root.
    /// Owned by the instance and computed on first use.
    zeros: OnceCell<Vec<Fp>>,
}

impl Accumulator {
    /// Create a new empty accumulator
    pub fn new() -> Self {
        Self {
            leaf_count: 0,
            leaves: Vec::new(),
            nodes: HashMap::new(),
            zeros: OnceCell::new(),
        }
    }

    /// Rebuild from an ordered leaf list
    ///
    /// Insertion order is part of the root, so the slice must be in ledger
    /// order.
    pub fn from_leaves(leaves: &[Fp]) -> Result<Self, MerkleError> {
        let mut tree = Self::new();
        for &leaf in leaves {
            tree.insert(leaf)?;
        }
        Ok(tree)
    }

    fn zeros(&self) -> &[Fp] {
        self.zeros.get_or_init(|| {
            let mut zeros = Vec::with_capacity(MERKLE_TREE_DEPTH + 1);
            zeros.push(domain_separator_field(domains::EMPTY_LEAF));
            for level in 1..=MERKLE_TREE_DEPTH {
                let prev = zeros[level - 1];
                zeros.push(hash2(prev, prev));
            }
            zeros
        })
    }

    /// The zero value for a level (the root of an empty subtree of that depth)
    pub fn zero_at(&self, level: usize) -> Fp {
        self.zeros()[level]
    }

    /// Get the number of leaves in the tree
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// The ordered leaf list
    pub fn leaves(&self) -> &[Fp] {
        &self.leaves
    }

    /// Get the current root
    pub fn root(&self) -> Fp {
        self.node(MERKLE_TREE_DEPTH, 0)
    }

    fn node(&self, level: usize, index: u64) -> Fp {
        match self.nodes.get(&(level, index)) {
            Some(&value) => value,
            None => self.zero_at(level),
        }
    }

    /// Append a commitment to the tree, returning the new root
    ///
    /// Walks up from the fresh leaf, writing the running hash at each level
    /// and folding it with the sibling (zero value if unset).
    pub fn insert(&mut self, leaf: Fp) -> Result<Fp, MerkleError> {
        if self.leaf_count >= MAX_TREE_LEAVES {
            return Err(MerkleError::TreeFull);
        }

        let mut hash = leaf;
        let mut index = self.leaf_count;
        for level in 0..MERKLE_TREE_DEPTH {
            self.nodes.insert((level, index), hash);
            let sibling = self.node(level, index ^ 1);
            hash = if index & 1 == 1 {
                hash2(sibling, hash)
            } else {
                hash2(hash, sibling)
            };
            index >>= 1;
        }
        self.nodes.insert((MERKLE_TREE_DEPTH, 0), hash);

        self.leaves.push(leaf);
        self.leaf_count += 1;
        Ok(hash)
    }

    /// Generate a membership proof for the leaf at the given index
    pub fn generate_proof(&self, leaf_index: u64) -> Result<MerklePath, MerkleError> {
        if leaf_index >= self.leaf_count {
            return Err(MerkleError::LeafIndexOutOfRange {
                index: leaf_index,
                leaf_count: self.leaf_count,
            });
        }

        let mut elements = Vec::with_capacity(MERKLE_TREE_DEPTH);
        let mut indices = Vec::with_capacity(MERKLE_TREE_DEPTH);
        let mut index = leaf_index;
        for level in 0..MERKLE_TREE_DEPTH {
            indices.push((index & 1) as u8);
            elements.push(self.node(level, index ^ 1));
            index >>= 1;
        }

        Ok(MerklePath::new(leaf_index, elements, indices))
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.root().to_repr();
        f.debug_struct("Accumulator")
            .field("leaf_count", &self.leaf_count)
            .field("root", &format_args!("{:02x}{:02x}...", root[0], root[1]))
            .finish()
    }
}
