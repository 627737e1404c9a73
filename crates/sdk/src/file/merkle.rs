//! Merkle roots over segment hashes.

use std::fmt;

use cess_types::{Hash256, blake2_256};
use rs_merkle::{Hasher, MerkleProof, MerkleTree};

/// Builds a commitment over ordered leaves.
pub trait MerkleBuilder: Send + Sync + fmt::Debug {
    /// Root over `leaves`, or `None` when there are none.
    fn root(&self, leaves: &[Hash256]) -> Option<Hash256>;
}

/// BLAKE2b-256 hasher for `rs_merkle`.
#[derive(Debug, Clone, Copy)]
pub struct Blake2Hasher;

impl Hasher for Blake2Hasher {
    type Hash = Hash256;

    fn hash(data: &[u8]) -> Self::Hash {
        blake2_256(data)
    }
}

/// Binary BLAKE2b-256 merkle tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake2MerkleBuilder;

impl Blake2MerkleBuilder {
    /// Serialized inclusion proof for the leaves at `indices`.
    #[must_use]
    pub fn proof(&self, leaves: &[Hash256], indices: &[usize]) -> Option<Vec<u8>> {
        if indices.iter().any(|&i| i >= leaves.len()) {
            return None;
        }
        Some(MerkleTree::<Blake2Hasher>::from_leaves(leaves).proof(indices).to_bytes())
    }

    /// Checks a proof produced by [`proof`](Self::proof).
    #[must_use]
    pub fn verify(
        &self,
        root: Hash256,
        proof: &[u8],
        indices: &[usize],
        leaves: &[Hash256],
        total_leaves: usize,
    ) -> bool {
        MerkleProof::<Blake2Hasher>::from_bytes(proof)
            .is_ok_and(|proof| proof.verify(root, indices, leaves, total_leaves))
    }
}

impl MerkleBuilder for Blake2MerkleBuilder {
    fn root(&self, leaves: &[Hash256]) -> Option<Hash256> {
        MerkleTree::<Blake2Hasher>::from_leaves(leaves).root()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn leaves() -> Vec<Hash256> {
        [b"alpha".as_slice(), b"beta".as_slice(), b"gamma".as_slice(), b"delta".as_slice()]
            .into_iter()
            .map(blake2_256)
            .collect()
    }

    #[test]
    fn root_depends_on_order() {
        let builder = Blake2MerkleBuilder;
        let mut leaves = leaves();
        let root = builder.root(&leaves).unwrap();
        leaves.swap(0, 1);
        assert_ne!(builder.root(&leaves).unwrap(), root);
        assert!(builder.root(&[]).is_none());
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let leaf = blake2_256(b"only");
        assert_eq!(Blake2MerkleBuilder.root(&[leaf]), Some(leaf));
    }

    #[test]
    fn proofs_verify_and_tampering_fails() {
        let builder = Blake2MerkleBuilder;
        let leaves = leaves();
        let root = builder.root(&leaves).unwrap();
        let proof = builder.proof(&leaves, &[1, 3]).unwrap();
        let proven = [leaves[1], leaves[3]];
        assert!(builder.verify(root, &proof, &[1, 3], &proven, leaves.len()));

        let mut tampered = root;
        tampered[0] ^= 0xff;
        assert!(!builder.verify(tampered, &proof, &[1, 3], &proven, leaves.len()));
        assert!(builder.proof(&leaves, &[4]).is_none());
    }
}
