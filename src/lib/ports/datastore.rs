use alloy::primitives::{Address, B256};
use std::future::Future;

use crate::domain::index::AddressRecord;
use crate::domain::record::TreeRecord;

/// Which trees `count_trees` should count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFilter {
    All,
    Root(B256),
}

/// Result of `insert_tree`. The root is a unique key, so inserting an
/// existing root changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Port for the persistent store of published trees and the address index.
///
/// Every write must be safe to repeat: a second `insert_tree` for the same
/// root and a second `upsert_address_record` for the same
/// `(account, root, position)` are no-ops.
///
/// Implementations:
/// - `InMemoryDatastore` (tests, CLI, single-process server)
/// - `RetryingDatastore<D>` (backoff wrapper around any other implementation)
pub trait TreeDatastore: Send + Sync {
    /// Persist a tree record keyed by its root.
    fn insert_tree(
        &self,
        record: TreeRecord,
    ) -> impl Future<Output = Result<InsertOutcome, DatastoreError>> + Send;

    fn count_trees(
        &self,
        filter: TreeFilter,
    ) -> impl Future<Output = Result<u64, DatastoreError>> + Send;

    fn find_tree(
        &self,
        root: B256,
    ) -> impl Future<Output = Result<Option<TreeRecord>, DatastoreError>> + Send;

    /// All stored roots in insertion order.
    fn list_roots(&self) -> impl Future<Output = Result<Vec<B256>, DatastoreError>> + Send;

    fn find_address_record(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<Option<AddressRecord>, DatastoreError>> + Send;

    /// Append `(root, position)` to the account's record, creating it if absent.
    fn upsert_address_record(
        &self,
        account: Address,
        root: B256,
        position: u64,
    ) -> impl Future<Output = Result<(), DatastoreError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatastoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("datastore call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal datastore error: {0}")]
    Internal(String),
}

impl DatastoreError {
    /// Connectivity failures are worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatastoreError::Unavailable(_))
    }
}
