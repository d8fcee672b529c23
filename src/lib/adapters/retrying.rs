use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256};

use crate::domain::index::AddressRecord;
use crate::domain::record::TreeRecord;
use crate::ports::datastore::{DatastoreError, InsertOutcome, TreeDatastore, TreeFilter};

/// Backoff schedule for `RetryingDatastore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Wraps a datastore and retries connectivity failures with exponential
/// backoff. Non-retryable errors and the last failure are returned as-is.
///
/// All datastore writes are idempotent, so replaying one after an ambiguous
/// failure is safe.
pub struct RetryingDatastore<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D: TreeDatastore> RetryingDatastore<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, DatastoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatastoreError>>,
    {
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.policy.attempts => {
                    tracing::warn!(op, attempt, ?backoff, "datastore call failed, retrying: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl<D: TreeDatastore> TreeDatastore for RetryingDatastore<D> {
    async fn insert_tree(&self, record: TreeRecord) -> Result<InsertOutcome, DatastoreError> {
        self.retry("insert_tree", || self.inner.insert_tree(record.clone()))
            .await
    }

    async fn count_trees(&self, filter: TreeFilter) -> Result<u64, DatastoreError> {
        self.retry("count_trees", || self.inner.count_trees(filter))
            .await
    }

    async fn find_tree(&self, root: B256) -> Result<Option<TreeRecord>, DatastoreError> {
        self.retry("find_tree", || self.inner.find_tree(root)).await
    }

    async fn list_roots(&self) -> Result<Vec<B256>, DatastoreError> {
        self.retry("list_roots", || self.inner.list_roots()).await
    }

    async fn find_address_record(
        &self,
        account: Address,
    ) -> Result<Option<AddressRecord>, DatastoreError> {
        self.retry("find_address_record", || {
            self.inner.find_address_record(account)
        })
        .await
    }

    async fn upsert_address_record(
        &self,
        account: Address,
        root: B256,
        position: u64,
    ) -> Result<(), DatastoreError> {
        self.retry("upsert_address_record", || {
            self.inner.upsert_address_record(account, root, position)
        })
        .await
    }
}
