use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::domain::leaf::{parse_account, LeafError};
use crate::domain::merkle::MerkleProof;
use crate::domain::tree::WhitelistTree;
use crate::ports::datastore::TreeDatastore;
use crate::store::{StoreError, TreeStore};

const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 16;

/// The winning membership of an account and its inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub account: Address,
    pub root: B256,
    pub amount: U256,
    pub position: u64,
    pub proof: MerkleProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Entitled(Entitlement),
    /// The account was never published. A normal negative answer.
    UnknownAccount,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error(transparent)]
    InvalidAccount(#[from] LeafError),

    #[error("index for {account} disagrees with every tree it points to ({mismatches} entries)")]
    Integrity { account: Address, mismatches: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("lookup task failed: {0}")]
    Task(String),
}

impl ResolverError {
    /// Data corruption, as opposed to bad input or an unreachable backend.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ResolverError::Integrity { .. } | ResolverError::Store(StoreError::Integrity(_))
        )
    }
}

/// Read-only answer to "what is this account entitled to, and the proof".
///
/// An account may appear in many trees. The entitlement is the largest
/// amount across them; on equal amounts the most recently published tree
/// wins.
pub struct EntitlementResolver<D: TreeDatastore> {
    store: Arc<TreeStore<D>>,
    max_concurrent_lookups: usize,
}

impl<D: TreeDatastore> EntitlementResolver<D> {
    pub fn new(store: Arc<TreeStore<D>>) -> Self {
        Self {
            store,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
        }
    }

    pub fn with_max_concurrent_lookups(mut self, limit: usize) -> Self {
        self.max_concurrent_lookups = limit.max(1);
        self
    }

    pub fn store(&self) -> &Arc<TreeStore<D>> {
        &self.store
    }

    /// Canonicalize `account` and resolve it.
    pub async fn resolve(&self, account: &str) -> Result<Resolution, ResolverError> {
        let account = parse_account(account)?;
        self.resolve_account(account).await
    }

    pub async fn resolve_account(&self, account: Address) -> Result<Resolution, ResolverError> {
        let matches = self.store.find_trees_for_account(account).await?;
        if matches.is_empty() {
            debug!(%account, "account not indexed");
            return Ok(Resolution::UnknownAccount);
        }

        let mut best: Option<(Arc<WhitelistTree>, usize, U256)> = None;
        let mut mismatches = 0;

        for entry in &matches {
            let tree = match self.store.load_by_root(entry.root).await {
                Ok(tree) => tree,
                Err(StoreError::NotFound(root)) => {
                    error!(%account, %root, "index points at a tree that is not stored");
                    mismatches += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let position = usize::try_from(entry.position).unwrap_or(usize::MAX);
            let Some(leaf) = tree.leaf(position).filter(|leaf| leaf.account() == account) else {
                error!(
                    %account,
                    root = %entry.root,
                    position = entry.position,
                    "index entry does not match the leaf in its tree"
                );
                mismatches += 1;
                continue;
            };

            // `>=` so a later tree wins a tie.
            let amount = leaf.amount();
            if best.as_ref().is_none_or(|(_, _, top)| amount >= *top) {
                best = Some((Arc::clone(&tree), position, amount));
            }
        }

        let Some((tree, position, amount)) = best else {
            return Err(ResolverError::Integrity {
                account,
                mismatches,
            });
        };

        let proof = tree.proof(position).map_err(StoreError::from)?;
        debug!(%account, root = %tree.root(), %amount, candidates = matches.len(), "resolved entitlement");

        Ok(Resolution::Entitled(Entitlement {
            account,
            root: tree.root(),
            amount,
            position: position as u64,
            proof,
        }))
    }
}

impl<D: TreeDatastore + 'static> EntitlementResolver<D> {
    /// Resolve many accounts concurrently with at most
    /// `max_concurrent_lookups` in flight. Results follow input order.
    pub async fn resolve_many(
        self: &Arc<Self>,
        accounts: Vec<String>,
    ) -> Vec<Result<Resolution, ResolverError>> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_lookups));

        let handles: Vec<_> = accounts
            .into_iter()
            .map(|account| {
                let resolver = Arc::clone(self);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    resolver.resolve(&account).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .unwrap_or_else(|e| Err(ResolverError::Task(e.to_string()))),
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryDatastore;
    use crate::domain::leaf::Leaf;
    use crate::domain::record::{LeafInfo, TreeRecord};

    fn account(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn resolver() -> EntitlementResolver<InMemoryDatastore> {
        EntitlementResolver::new(Arc::new(TreeStore::new(InMemoryDatastore::new())))
    }

    async fn publish(
        resolver: &EntitlementResolver<InMemoryDatastore>,
        entries: &[(u8, u64)],
    ) -> WhitelistTree {
        let entries: Vec<_> = entries
            .iter()
            .map(|(b, amount)| (account(*b), U256::from(*amount)))
            .collect();
        let tree = WhitelistTree::from_entries(&entries).unwrap();
        resolver.store().publish(&tree).await.unwrap();
        tree
    }

    fn entitled(resolution: Resolution) -> Entitlement {
        match resolution {
            Resolution::Entitled(e) => e,
            Resolution::UnknownAccount => panic!("expected an entitlement"),
        }
    }

    #[tokio::test]
    async fn resolves_with_verifiable_proof() {
        let r = resolver();
        let tree = publish(&r, &[(0xAA, 100_000), (0xBB, 200_000)]).await;

        let e = entitled(r.resolve_account(account(0xAA)).await.unwrap());
        assert_eq!(e.root, tree.root());
        assert_eq!(e.amount, U256::from(100_000));
        assert_eq!(e.position, 0);

        let digest = Leaf::new(account(0xAA), U256::from(100_000)).digest();
        assert!(e.proof.verify(digest, tree.root()));
    }

    #[tokio::test]
    async fn later_tree_wins_on_equal_amounts() {
        let r = resolver();
        let _t1 = publish(&r, &[(0xAA, 100), (0x01, 1)]).await;
        let t2 = publish(&r, &[(0x02, 2), (0xAA, 100)]).await;

        let e = entitled(r.resolve_account(account(0xAA)).await.unwrap());
        assert_eq!(e.root, t2.root());
        assert_eq!(e.position, 1);
    }

    #[tokio::test]
    async fn highest_amount_wins_regardless_of_order() {
        let r = resolver();
        let t1 = publish(&r, &[(0xAA, 100), (0x01, 1)]).await;
        let _t2 = publish(&r, &[(0xAA, 50), (0x02, 2)]).await;

        let e = entitled(r.resolve_account(account(0xAA)).await.unwrap());
        assert_eq!(e.root, t1.root());
        assert_eq!(e.amount, U256::from(100));
    }

    #[tokio::test]
    async fn unknown_account_is_a_negative_answer() {
        let r = resolver();
        publish(&r, &[(0x01, 1)]).await;

        let resolution = r
            .resolve("0xabcabcabcabcabcabcabcabcabcabcabcabcabca")
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::UnknownAccount);
    }

    #[tokio::test]
    async fn query_is_case_insensitive() {
        let r = resolver();
        publish(&r, &[(0xAB, 5)]).await;

        let upper = format!("0x{}", "AB".repeat(20));
        assert!(matches!(
            r.resolve(&upper).await.unwrap(),
            Resolution::Entitled(_)
        ));
    }

    #[tokio::test]
    async fn malformed_account_is_rejected() {
        let r = resolver();
        assert!(matches!(
            r.resolve("0xnope").await,
            Err(ResolverError::InvalidAccount(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_index_entry_is_excluded() {
        let r = resolver();
        let good = publish(&r, &[(0xAA, 10), (0xBB, 20)]).await;
        let other = publish(&r, &[(0xCC, 30), (0xDD, 40)]).await;

        // Point 0xAA at a leaf that belongs to 0xDD, with a bigger amount.
        r.store()
            .datastore()
            .upsert_address_record(account(0xAA), other.root(), 1)
            .await
            .unwrap();

        let e = entitled(r.resolve_account(account(0xAA)).await.unwrap());
        assert_eq!(e.root, good.root());
        assert_eq!(e.amount, U256::from(10));
    }

    #[tokio::test]
    async fn fully_desynced_index_is_an_integrity_error() {
        let r = resolver();
        let datastore = r.store().datastore();
        datastore
            .upsert_address_record(account(0xAA), B256::repeat_byte(0x11), 0)
            .await
            .unwrap();
        datastore
            .upsert_address_record(account(0xAA), B256::repeat_byte(0x12), 3)
            .await
            .unwrap();

        let err = r.resolve_account(account(0xAA)).await.unwrap_err();
        assert!(err.is_integrity());
        assert!(matches!(err, ResolverError::Integrity { mismatches: 2, .. }));
    }

    #[tokio::test]
    async fn tampered_stored_tree_fails_hard() {
        let r = resolver();
        let tree = WhitelistTree::from_entries(&[(account(0xAA), U256::from(1))]).unwrap();
        let mut record = TreeRecord::from_tree(&tree);
        record.leaf_infos[0] = LeafInfo {
            address: format!("0x{}", "aa".repeat(20)),
            amount: "2".into(),
        };
        let datastore = r.store().datastore();
        datastore.insert_tree(record).await.unwrap();
        datastore
            .upsert_address_record(account(0xAA), tree.root(), 0)
            .await
            .unwrap();

        let err = r.resolve_account(account(0xAA)).await.unwrap_err();
        assert!(matches!(err, ResolverError::Store(StoreError::Integrity(_))));
    }

    #[tokio::test]
    async fn resolve_many_keeps_input_order() {
        let r = Arc::new(resolver().with_max_concurrent_lookups(2));
        publish(&r, &[(0x01, 1), (0x02, 2), (0x03, 3)]).await;

        let queries = vec![
            format!("0x{}", "03".repeat(20)),
            "garbage".to_string(),
            format!("0x{}", "09".repeat(20)),
            format!("0x{}", "01".repeat(20)),
        ];
        let results = r.resolve_many(queries).await;

        assert_eq!(results.len(), 4);
        assert_eq!(
            entitled(results[0].as_ref().unwrap().clone()).amount,
            U256::from(3)
        );
        assert!(matches!(results[1], Err(ResolverError::InvalidAccount(_))));
        assert_eq!(*results[2].as_ref().unwrap(), Resolution::UnknownAccount);
        assert_eq!(
            entitled(results[3].as_ref().unwrap().clone()).amount,
            U256::from(1)
        );
    }
}
