use alloy::primitives::{Address, B256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::domain::index::{AddressRecord, IndexEntry};
use crate::domain::record::TreeRecord;
use crate::ports::datastore::{DatastoreError, InsertOutcome, TreeDatastore, TreeFilter};

#[derive(Default)]
struct State {
    trees: HashMap<B256, TreeRecord>,
    /// Roots in insertion order.
    order: Vec<B256>,
    addresses: HashMap<Address, AddressRecord>,
}

/// In-memory implementation of `TreeDatastore` for tests, the CLI and a
/// single-process server.
///
/// The root is a unique key and address entries are deduplicated, so
/// repeated writes behave like upserts against a document store.
pub struct InMemoryDatastore {
    state: Mutex<State>,
    /// Number of upcoming calls that fail with `Unavailable`.
    failures: AtomicUsize,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` calls fail as if the backend were unreachable.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), DatastoreError> {
        let took = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(DatastoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeDatastore for InMemoryDatastore {
    async fn insert_tree(&self, record: TreeRecord) -> Result<InsertOutcome, DatastoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let root = record.root;

        if state.trees.contains_key(&root) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state.trees.insert(root, record);
        state.order.push(root);
        Ok(InsertOutcome::Inserted)
    }

    async fn count_trees(&self, filter: TreeFilter) -> Result<u64, DatastoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let count = match filter {
            TreeFilter::All => state.trees.len(),
            TreeFilter::Root(root) => usize::from(state.trees.contains_key(&root)),
        };
        Ok(count as u64)
    }

    async fn find_tree(&self, root: B256) -> Result<Option<TreeRecord>, DatastoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.trees.get(&root).cloned())
    }

    async fn list_roots(&self) -> Result<Vec<B256>, DatastoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.order.clone())
    }

    async fn find_address_record(
        &self,
        account: Address,
    ) -> Result<Option<AddressRecord>, DatastoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.addresses.get(&account).cloned())
    }

    async fn upsert_address_record(
        &self,
        account: Address,
        root: B256,
        position: u64,
    ) -> Result<(), DatastoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .addresses
            .entry(account)
            .or_default()
            .push_unique(IndexEntry { root, position });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::LeafInfo;

    fn record(byte: u8) -> TreeRecord {
        TreeRecord {
            root: B256::repeat_byte(byte),
            leaf_infos: vec![LeafInfo {
                address: format!("0x{}", "11".repeat(20)),
                amount: "1".into(),
            }],
        }
    }

    #[tokio::test]
    async fn insert_is_unique_per_root() {
        let store = InMemoryDatastore::new();

        assert_eq!(store.insert_tree(record(0x01)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_tree(record(0x01)).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.count_trees(TreeFilter::All).await.unwrap(), 1);
        assert_eq!(
            store.count_trees(TreeFilter::Root(B256::repeat_byte(0x01))).await.unwrap(),
            1
        );
        assert_eq!(
            store.count_trees(TreeFilter::Root(B256::repeat_byte(0x02))).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn roots_are_listed_in_insert_order() {
        let store = InMemoryDatastore::new();
        for byte in [0x03, 0x01, 0x02] {
            store.insert_tree(record(byte)).await.unwrap();
        }

        let roots = store.list_roots().await.unwrap();
        assert_eq!(
            roots,
            vec![B256::repeat_byte(0x03), B256::repeat_byte(0x01), B256::repeat_byte(0x02)]
        );
    }

    #[tokio::test]
    async fn address_upsert_is_idempotent() {
        let store = InMemoryDatastore::new();
        let account = Address::repeat_byte(0xAA);
        let root = B256::repeat_byte(0x01);

        store.upsert_address_record(account, root, 4).await.unwrap();
        store.upsert_address_record(account, root, 4).await.unwrap();
        store
            .upsert_address_record(account, B256::repeat_byte(0x02), 0)
            .await
            .unwrap();

        let record = store.find_address_record(account).await.unwrap().unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.entries()[0], IndexEntry { root, position: 4 });
    }

    #[tokio::test]
    async fn unknown_address_has_no_record() {
        let store = InMemoryDatastore::new();
        assert!(store
            .find_address_record(Address::repeat_byte(0x99))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn simulated_outage_fails_then_recovers() {
        let store = InMemoryDatastore::new();
        store.fail_next(2);

        assert!(matches!(
            store.list_roots().await,
            Err(DatastoreError::Unavailable(_))
        ));
        assert!(store.list_roots().await.is_err());
        assert!(store.list_roots().await.is_ok());
    }
}
