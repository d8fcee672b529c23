use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use alloy::primitives::{Address, B256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::domain::index::IndexEntry;
use crate::domain::merkle::TreeError;
use crate::domain::record::TreeRecord;
use crate::domain::tree::WhitelistTree;
use crate::ports::datastore::{DatastoreError, InsertOutcome, TreeDatastore, TreeFilter};

const DEFAULT_CACHE_CAPACITY: usize = 64;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type PublishLocks = std::sync::Mutex<HashMap<B256, Arc<Mutex<()>>>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("tree with root {0} is already published")]
    DuplicateRoot(B256),

    #[error("no published tree with root {0}")]
    NotFound(B256),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

/// Owner of the published trees and the address index.
///
/// Trees are persisted as records and rebuilt on read. Rebuilt trees are
/// cached by root; the cache only saves work, every answer is the same
/// without it. Publishing is serialized per root: a second publish of the
/// same root waits for the first, then sees its outcome.
pub struct TreeStore<D: TreeDatastore> {
    datastore: D,
    cache: Mutex<TreeCache>,
    /// One lock per root with a publish in progress or waiting.
    publishing: PublishLocks,
    request_timeout: Duration,
}

impl<D: TreeDatastore> TreeStore<D> {
    pub fn new(datastore: D) -> Self {
        Self {
            datastore,
            cache: Mutex::new(TreeCache::new(DEFAULT_CACHE_CAPACITY)),
            publishing: std::sync::Mutex::new(HashMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = Mutex::new(TreeCache::new(capacity));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn datastore(&self) -> &D {
        &self.datastore
    }

    /// Persist `tree` and index every leaf under its account.
    ///
    /// Fails with `DuplicateRoot` if the root is already stored. The index
    /// entries are written again in that case, so a publish that stored the
    /// record but failed part way through indexing is completed by the next
    /// attempt.
    pub async fn publish(&self, tree: &WhitelistTree) -> Result<(), StoreError> {
        let root = tree.root();
        let _lock = PublishLock::acquire(&self.publishing, root).await;

        tree.self_check().map_err(|e| {
            error!(%root, "freshly built tree failed its self-check: {e}");
            StoreError::Integrity(e.to_string())
        })?;

        if self
            .call(self.datastore.count_trees(TreeFilter::Root(root)))
            .await?
            > 0
        {
            self.index(tree).await?;
            return Err(StoreError::DuplicateRoot(root));
        }

        let outcome = self
            .call(self.datastore.insert_tree(TreeRecord::from_tree(tree)))
            .await?;
        self.index(tree).await?;
        if outcome == InsertOutcome::AlreadyExists {
            return Err(StoreError::DuplicateRoot(root));
        }

        self.cache.lock().await.insert(root, Arc::new(tree.clone()));
        info!(%root, leaves = tree.len(), "published tree");
        Ok(())
    }

    /// Upsert every `(account, root, position)` of `tree`. Idempotent.
    async fn index(&self, tree: &WhitelistTree) -> Result<(), StoreError> {
        let root = tree.root();
        for (position, leaf) in tree.leaves().iter().enumerate() {
            self.call(
                self.datastore
                    .upsert_address_record(leaf.account(), root, position as u64),
            )
            .await
            .inspect_err(|e| {
                warn!(%root, position, "index write failed, a later publish will resume it: {e}");
            })?;
        }
        Ok(())
    }

    /// Publish, treating an already published root as success.
    /// Returns whether this call stored the tree.
    pub async fn publish_if_absent(&self, tree: &WhitelistTree) -> Result<bool, StoreError> {
        match self.publish(tree).await {
            Ok(()) => Ok(true),
            Err(StoreError::DuplicateRoot(root)) => {
                warn!(%root, "tree already published, skipping");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Load a published tree, rebuilding it from its record and checking the
    /// rebuilt root against the stored key.
    pub async fn load_by_root(&self, root: B256) -> Result<Arc<WhitelistTree>, StoreError> {
        if let Some(tree) = self.cache.lock().await.get(&root) {
            return Ok(tree);
        }

        let record = self
            .call(self.datastore.find_tree(root))
            .await?
            .ok_or(StoreError::NotFound(root))?;

        if record.root != root {
            error!(%root, stored = %record.root, "datastore returned a record under the wrong key");
            return Err(StoreError::Integrity(format!(
                "record stored under {root} claims root {}",
                record.root
            )));
        }

        let tree = Arc::new(record.into_tree().map_err(|e| {
            error!(%root, "stored tree failed to rebuild: {e}");
            StoreError::Integrity(format!("tree {root}: {e}"))
        })?);

        self.cache.lock().await.insert(root, Arc::clone(&tree));
        Ok(tree)
    }

    /// Every `(root, position)` the account was published under, in publish
    /// order. Empty if the account never appeared.
    pub async fn find_trees_for_account(
        &self,
        account: Address,
    ) -> Result<Vec<IndexEntry>, StoreError> {
        let record = self
            .call(self.datastore.find_address_record(account))
            .await?;
        Ok(record.map(Vec::from).unwrap_or_default())
    }

    pub async fn list_roots(&self) -> Result<Vec<B256>, StoreError> {
        Ok(self.call(self.datastore.list_roots()).await?)
    }

    pub async fn contains(&self, root: B256) -> Result<bool, StoreError> {
        let count = self
            .call(self.datastore.count_trees(TreeFilter::Root(root)))
            .await?;
        Ok(count > 0)
    }

    /// Accounts of a published tree in leaf order.
    pub async fn accounts(&self, root: B256) -> Result<Vec<Address>, StoreError> {
        let tree = self.load_by_root(root).await?;
        Ok(tree.leaves().iter().map(|leaf| leaf.account()).collect())
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, DatastoreError>>,
    ) -> Result<T, DatastoreError> {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| DatastoreError::Timeout(self.request_timeout))?
    }
}

/// Holds the publish lock of one root until dropped.
struct PublishLock<'a> {
    locks: &'a PublishLocks,
    root: B256,
    _guard: OwnedMutexGuard<()>,
}

impl<'a> PublishLock<'a> {
    async fn acquire(locks: &'a PublishLocks, root: B256) -> Self {
        let lock = {
            let mut map = locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(root).or_default())
        };
        Self {
            locks,
            root,
            _guard: lock.lock_owned().await,
        }
    }
}

impl Drop for PublishLock<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard hold the only references when nobody waits.
        if map
            .get(&self.root)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            map.remove(&self.root);
        }
    }
}

/// Least-recently-used cache of rebuilt trees.
struct TreeCache {
    capacity: usize,
    trees: HashMap<B256, Arc<WhitelistTree>>,
    /// Most recently used at the back.
    recency: VecDeque<B256>,
}

impl TreeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trees: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn get(&mut self, root: &B256) -> Option<Arc<WhitelistTree>> {
        let tree = self.trees.get(root).cloned()?;
        self.touch(*root);
        Some(tree)
    }

    fn insert(&mut self, root: B256, tree: Arc<WhitelistTree>) {
        if self.capacity == 0 {
            return;
        }
        if self.trees.insert(root, tree).is_none() {
            while self.trees.len() > self.capacity {
                let Some(oldest) = self.recency.pop_front() else {
                    break;
                };
                self.trees.remove(&oldest);
            }
        }
        self.touch(root);
    }

    fn touch(&mut self, root: B256) {
        self.recency.retain(|r| *r != root);
        self.recency.push_back(root);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.trees.len()
    }
}
