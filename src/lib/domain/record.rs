//! Serialized tree records and content files.
//!
//! A record is `{ root, leafInfos: [{ address, amount }] }`, amounts as decimal
//! strings so 256-bit values survive JSON. Decoding always rebuilds the tree
//! and refuses a record whose leaves do not hash to its root.

use std::io::Write;
use std::path::Path;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use super::leaf::{format_account, Leaf, LeafError};
use super::merkle::TreeError;
use super::tree::WhitelistTree;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("leaf {position}: {source}")]
    Leaf {
        position: usize,
        #[source]
        source: LeafError,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("root mismatch: record claims {claimed}, leaves hash to {computed}")]
    RootMismatch { claimed: B256, computed: B256 },

    #[error("content file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("content file JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecordError {
    /// Whether the record was well-formed but hashed to the wrong root.
    pub fn is_integrity(&self) -> bool {
        matches!(self, RecordError::RootMismatch { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafInfo {
    pub address: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRecord {
    pub root: B256,
    pub leaf_infos: Vec<LeafInfo>,
}

impl TreeRecord {
    pub fn from_tree(tree: &WhitelistTree) -> Self {
        Self {
            root: tree.root(),
            leaf_infos: tree
                .leaves()
                .iter()
                .map(|leaf| LeafInfo {
                    address: format_account(leaf.account()),
                    amount: leaf.amount().to_string(),
                })
                .collect(),
        }
    }

    /// Rebuild the tree from `leaf_infos` and check it against `root`.
    pub fn into_tree(self) -> Result<WhitelistTree, RecordError> {
        let leaves = self
            .leaf_infos
            .iter()
            .enumerate()
            .map(|(position, info)| {
                Leaf::parse(&info.address, &info.amount)
                    .map_err(|source| RecordError::Leaf { position, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tree = WhitelistTree::from_leaves(leaves)?;
        if tree.root() != self.root {
            return Err(RecordError::RootMismatch {
                claimed: self.root,
                computed: tree.root(),
            });
        }
        Ok(tree)
    }
}

/// Read a content file (JSON array of records) and rebuild every tree.
pub fn read_content(path: &Path) -> Result<Vec<WhitelistTree>, RecordError> {
    let bytes = std::fs::read(path)?;
    let records: Vec<TreeRecord> = serde_json::from_slice(&bytes)?;
    records.into_iter().map(TreeRecord::into_tree).collect()
}

/// Write trees as a content file. Goes through a temp file and a rename so a
/// reader never sees a half-written file.
pub fn write_content(path: &Path, trees: &[WhitelistTree]) -> Result<(), RecordError> {
    let records: Vec<TreeRecord> = trees.iter().map(TreeRecord::from_tree).collect();
    let json = serde_json::to_string_pretty(&records)?;

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
