//! Binary Keccak-256 Merkle tree with value-sorted pair hashing.
//!
//! Every parent is `keccak256(min(a, b) ++ max(a, b))`, so a proof is just the
//! ordered list of siblings and needs no left/right flags. A level with an odd
//! number of nodes pairs its last node with itself.

use std::fmt;

use alloy::primitives::{B256, Keccak256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("cannot build a Merkle tree from zero leaves")]
    EmptyTree,

    #[error("leaf index {index} out of range for tree with {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("proof for leaf {index} does not reproduce root {root}")]
    InconsistentProof { index: usize, root: B256 },
}

/// Hash two sibling nodes into their parent, smaller digest first.
pub fn combine(a: B256, b: B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Keccak256::new();
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize()
}

/// Recompute the root from `leaf` and its siblings and compare with `root`.
pub fn verify_proof(leaf: B256, siblings: &[B256], root: B256) -> bool {
    siblings
        .iter()
        .fold(leaf, |node, sibling| combine(node, *sibling))
        == root
}

/// Immutable tree over leaf digests. All levels are kept so a proof is a
/// walk of `depth()` lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `layers[0]` are the leaves, the last layer holds only the root.
    layers: Vec<Vec<B256>>,
}

impl MerkleTree {
    pub fn build(leaves: &[B256]) -> Result<Self, TreeError> {
        if leaves.is_empty() {
            return Err(TreeError::EmptyTree);
        }

        let mut layers = vec![leaves.to_vec()];
        loop {
            let level = &layers[layers.len() - 1];
            if level.len() == 1 {
                break;
            }
            let next: Vec<B256> = level
                .chunks(2)
                .map(|pair| combine(pair[0], *pair.get(1).unwrap_or(&pair[0])))
                .collect();
            layers.push(next);
        }

        Ok(Self { layers })
    }

    pub fn root(&self) -> B256 {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    /// A built tree always holds at least one leaf.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of hashing levels between a leaf and the root.
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn leaf(&self, index: usize) -> Option<B256> {
        self.layers[0].get(index).copied()
    }

    /// Sibling path for the leaf at `index`, leaf level first.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, TreeError> {
        if index >= self.len() {
            return Err(TreeError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }

        let mut siblings = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in &self.layers[..self.depth()] {
            // An unpaired last node is its own sibling.
            let sibling = level.get(position ^ 1).unwrap_or(&level[position]);
            siblings.push(*sibling);
            position /= 2;
        }

        Ok(MerkleProof(siblings))
    }
}

/// Inclusion proof: sibling digests from the leaf level up to the root.
///
/// On the wire a proof is one hex string, `0x` followed by the 32-byte
/// siblings concatenated in order. That is the byte layout the on-chain
/// verifier reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MerkleProof(pub Vec<B256>);

impl MerkleProof {
    pub fn siblings(&self) -> &[B256] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn verify(&self, leaf: B256, root: B256) -> bool {
        verify_proof(leaf, &self.0, root)
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(2 + self.0.len() * 64);
        out.push_str("0x");
        for sibling in &self.0 {
            out.push_str(&hex::encode(sibling));
        }
        out
    }

    pub fn from_hex(input: &str) -> Result<Self, TreeError> {
        let digits = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(digits).map_err(|e| TreeError::MalformedProof(e.to_string()))?;
        if bytes.len() % 32 != 0 {
            return Err(TreeError::MalformedProof(format!(
                "{} bytes is not a whole number of 32-byte siblings",
                bytes.len()
            )));
        }
        Ok(Self(bytes.chunks_exact(32).map(B256::from_slice).collect()))
    }
}

impl fmt::Display for MerkleProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for MerkleProof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MerkleProof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;

    fn leaves(n: usize) -> Vec<B256> {
        (0..n).map(|i| keccak256(format!("leaf_{i}"))).collect()
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert_eq!(MerkleTree::build(&[]), Err(TreeError::EmptyTree));
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = leaves(1)[0];
        let tree = MerkleTree::build(&[leaf]).unwrap();

        assert_eq!(tree.root(), leaf);
        assert_eq!(tree.depth(), 0);
        let proof = tree.proof(0).unwrap();
        assert!(proof.is_empty());
        assert!(proof.verify(leaf, tree.root()));
    }

    #[test]
    fn combine_is_order_independent() {
        let [a, b] = [leaves(2)[0], leaves(2)[1]];
        assert_eq!(combine(a, b), combine(b, a));
        assert_ne!(combine(a, b), combine(a, a));
    }

    #[test]
    fn two_leaf_root_matches_manual_hash() {
        let l = leaves(2);
        let tree = MerkleTree::build(&l).unwrap();

        let (lo, hi) = if l[0] <= l[1] { (l[0], l[1]) } else { (l[1], l[0]) };
        let expected = keccak256([lo.as_slice(), hi.as_slice()].concat());
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn root_is_deterministic() {
        let l = leaves(7);
        assert_eq!(
            MerkleTree::build(&l).unwrap().root(),
            MerkleTree::build(&l).unwrap().root()
        );
    }

    #[test]
    fn every_leaf_proof_verifies() {
        for n in [1, 2, 3, 4, 5, 8, 13, 64, 100] {
            let l = leaves(n);
            let tree = MerkleTree::build(&l).unwrap();
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(proof.verify(*leaf, tree.root()), "leaf {i} of {n}");
            }
        }
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let l = leaves(3);
        let tree = MerkleTree::build(&l).unwrap();

        let left = combine(l[0], l[1]);
        let right = combine(l[2], l[2]);
        assert_eq!(tree.root(), combine(left, right));

        let proof = tree.proof(2).unwrap();
        // ceil(log2(3)) == 2
        assert_eq!(proof.len(), 2);
        assert_eq!(proof.siblings(), &[l[2], left]);
        assert!(proof.verify(l[2], tree.root()));
    }

    #[test]
    fn proof_length_is_ceil_log2() {
        for (n, depth) in [(1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            let tree = MerkleTree::build(&leaves(n)).unwrap();
            assert_eq!(tree.depth(), depth, "n = {n}");
            assert_eq!(tree.proof(n - 1).unwrap().len(), depth);
        }
    }

    #[test]
    fn out_of_range_index_fails() {
        let tree = MerkleTree::build(&leaves(4)).unwrap();
        assert_eq!(
            tree.proof(4),
            Err(TreeError::IndexOutOfRange { index: 4, len: 4 })
        );
    }

    #[test]
    fn flipped_bits_break_verification() {
        let l = leaves(6);
        let tree = MerkleTree::build(&l).unwrap();
        let proof = tree.proof(3).unwrap();

        for sibling in 0..proof.len() {
            for bit in [0usize, 7, 128, 255] {
                let mut tampered = proof.clone();
                tampered.0[sibling].0[bit / 8] ^= 1 << (bit % 8);
                assert!(!tampered.verify(l[3], tree.root()));
            }
        }

        let mut root = tree.root();
        root.0[31] ^= 0x01;
        assert!(!proof.verify(l[3], root));
    }

    #[test]
    fn proof_hex_layout() {
        let tree = MerkleTree::build(&leaves(5)).unwrap();
        let proof = tree.proof(1).unwrap();
        let encoded = proof.to_hex();

        assert_eq!(encoded.len(), 2 + 64 * proof.len());
        assert_eq!(&encoded[2..66], hex::encode(proof.siblings()[0]));
        assert_eq!(MerkleProof::from_hex(&encoded).unwrap(), proof);
        assert_eq!(serde_json::to_value(&proof).unwrap(), encoded);
    }

    #[test]
    fn ragged_proof_hex_is_rejected() {
        assert!(matches!(
            MerkleProof::from_hex("0xabcd"),
            Err(TreeError::MalformedProof(_))
        ));
        assert!(matches!(
            MerkleProof::from_hex("0xnothex"),
            Err(TreeError::MalformedProof(_))
        ));
        assert_eq!(MerkleProof::from_hex("0x").unwrap(), MerkleProof::default());
    }
}
