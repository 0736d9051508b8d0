//! Merkle roots and inclusion proofs for block bodies.
//!
//! Pairs are hashed left to right. When a level has an odd number of
//! nodes, the last one is promoted unchanged to the next level; it is not
//! hashed with itself.

use crate::hash::{hash_concat, Hash};

fn parent(left: &Hash, right: &Hash) -> Hash {
    hash_concat(&[left.as_ref(), right.as_ref()])
}

fn next_level(nodes: &[Hash]) -> Vec<Hash> {
    nodes
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => parent(left, right),
            [carried] => *carried,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Merkle root of an ordered list of hashes.
///
/// The zero hash for an empty list, the leaf itself for a single leaf.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.first().copied().unwrap_or(Hash::ZERO)
}

/// Every level of a merkle tree, leaves first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

/// Path from one leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: Hash,
    /// One step per level where the node had a sibling; `true` when the
    /// sibling sits on the right.
    pub path: Vec<(Hash, bool)>,
}

impl MerkleProof {
    /// Whether this path leads from `leaf` to `root`.
    pub fn verify(&self, root: &Hash) -> bool {
        let computed = self
            .path
            .iter()
            .fold(self.leaf, |node, (sibling, sibling_on_right)| {
                if *sibling_on_right {
                    parent(&node, sibling)
                } else {
                    parent(sibling, &node)
                }
            });
        computed == *root
    }
}

impl MerkleTree {
    pub fn new(leaves: &[Hash]) -> Self {
        let mut levels = vec![leaves.to_vec()];
        while let Some(top) = levels.last().filter(|level| level.len() > 1) {
            let next = next_level(top);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(Hash::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// All nodes flattened level by level, leaves first and root last.
    pub fn store(&self) -> Vec<Hash> {
        self.levels.iter().flatten().copied().collect()
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaf = *self.levels.first()?.get(index)?;
        let mut path = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if let Some(hash) = level.get(sibling) {
                path.push((*hash, sibling > position));
            }
            position /= 2;
        }
        Some(MerkleProof { leaf, path })
    }
}
