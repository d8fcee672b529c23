use alloy::primitives::{Address, B256, U256};

use super::leaf::Leaf;
use super::merkle::{MerkleProof, MerkleTree, TreeError};

/// One distribution batch: the ordered leaves and the Merkle tree over their
/// digests. Immutable once built; a membership change means a new tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistTree {
    leaves: Vec<Leaf>,
    merkle: MerkleTree,
}

impl WhitelistTree {
    /// Build from leaves in the given order. Position `i` is `leaves[i]`.
    pub fn from_leaves(leaves: Vec<Leaf>) -> Result<Self, TreeError> {
        let digests: Vec<B256> = leaves.iter().map(Leaf::digest).collect();
        let merkle = MerkleTree::build(&digests)?;
        Ok(Self { leaves, merkle })
    }

    pub fn from_entries(entries: &[(Address, U256)]) -> Result<Self, TreeError> {
        Self::from_leaves(
            entries
                .iter()
                .map(|(account, amount)| Leaf::new(*account, *amount))
                .collect(),
        )
    }

    /// Every account gets the same amount.
    pub fn uniform(accounts: &[Address], amount: U256) -> Result<Self, TreeError> {
        Self::from_leaves(
            accounts
                .iter()
                .map(|account| Leaf::new(*account, amount))
                .collect(),
        )
    }

    pub fn root(&self) -> B256 {
        self.merkle.root()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    pub fn leaf(&self, position: usize) -> Option<&Leaf> {
        self.leaves.get(position)
    }

    /// Position of the first leaf for `account`, if any.
    pub fn position_of(&self, account: Address) -> Option<usize> {
        self.leaves.iter().position(|leaf| leaf.account() == account)
    }

    pub fn proof(&self, position: usize) -> Result<MerkleProof, TreeError> {
        self.merkle.proof(position)
    }

    pub fn merkle(&self) -> &MerkleTree {
        &self.merkle
    }

    /// Verify every leaf's proof against the root. A failure here is a bug in
    /// construction, never a property of the input.
    pub fn self_check(&self) -> Result<(), TreeError> {
        let root = self.root();
        for (index, leaf) in self.leaves.iter().enumerate() {
            if !self.merkle.proof(index)?.verify(leaf.digest(), root) {
                return Err(TreeError::InconsistentProof { index, root });
            }
        }
        Ok(())
    }
}
