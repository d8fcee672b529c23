use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

/// One membership of an account: the tree root and the leaf position in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    pub root: B256,
    pub position: u64,
}

/// Append-only list of every tree an account appears in, in publish order.
///
/// Entries are never removed, and re-appending an existing `(root, position)`
/// pair is a no-op so retried writes cannot duplicate rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    entries: Vec<IndexEntry>,
}

impl AddressRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` unless already present. Returns whether it was appended.
    pub fn push_unique(&mut self, entry: IndexEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<AddressRecord> for Vec<IndexEntry> {
    fn from(record: AddressRecord) -> Self {
        record.entries
    }
}
