//! The page storage engine: object store, B-tree index, commit DAG,
//! mutation journal, and merge resolver for a single Ledger page, plus the
//! cooperative coroutine runtime everything above runs on.
//!
//! `ledger-core` has no knowledge of the network or of disk I/O specifics —
//! it depends only on the [`kv::KvEngine`] contract, so it is equally at
//! home on top of `ledger-storage-sled` or an in-memory [`testkit`] double.

pub mod btree;
pub mod commitdag;
pub mod error;
pub mod journal;
pub mod kv;
pub mod merge;
pub mod objectstore;
pub mod runtime;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::PageHealth;

use std::sync::Mutex;

use ledger_proto::{CommitId, PageId};

use commitdag::CommitDag;
use journal::Journal;
use kv::KvEngine;
use objectstore::ObjectStore;

/// Every error a page-level operation can produce, flattened across the
/// subsystems it touches.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Kv(#[from] error::KvError),
    #[error(transparent)]
    ObjectStore(#[from] error::ObjectStoreError),
    #[error(transparent)]
    BTree(#[from] error::BTreeError),
    #[error(transparent)]
    Commit(#[from] error::CommitError),
    #[error(transparent)]
    Journal(#[from] error::JournalError),
    #[error(transparent)]
    Merge(#[from] error::MergeError),
}

impl PageError {
    /// `Some(reason)` if this error reflects on-disk corruption rather
    /// than a transient or programmer error, in which case the page that
    /// produced it must flip to [`PageHealth::Unhealthy`] (spec.md §7).
    fn integrity_reason(&self) -> Option<String> {
        match self {
            PageError::ObjectStore(error::ObjectStoreError::DataIntegrity { declared, computed }) => {
                Some(format!("object store: declared id {declared} does not match computed digest {computed}"))
            }
            PageError::Commit(error::CommitError::DataIntegrity(reason)) => Some(format!("commit dag: {reason}")),
            _ => None,
        }
    }
}

/// One page's storage: its own object store and commit DAG over a
/// dedicated [`kv::KvDatabase`] bucket, plus the health flag spec.md §7
/// asks be surfaced once a data-integrity error is observed.
pub struct Page {
    pub id: PageId,
    store: ObjectStore,
    dag: CommitDag,
    health: Mutex<PageHealth>,
}

impl Page {
    pub async fn open(engine: &dyn KvEngine, id: PageId) -> Result<Self, error::KvError> {
        let bucket = engine.bucket(&id.to_base64()).await?;
        Ok(Page { id, store: ObjectStore::new(bucket.clone()), dag: CommitDag::new(bucket), health: Mutex::new(PageHealth::Healthy) })
    }

    pub fn store(&self) -> &ObjectStore { &self.store }
    pub fn dag(&self) -> &CommitDag { &self.dag }

    pub fn health(&self) -> PageHealth { self.health.lock().expect("health mutex poisoned").clone() }

    fn note<T>(&self, result: Result<T, PageError>) -> Result<T, PageError> {
        if let Err(err) = &result {
            if let Some(reason) = err.integrity_reason() {
                *self.health.lock().expect("health mutex poisoned") = PageHealth::Unhealthy { reason };
            }
        }
        result
    }

    pub async fn heads(&self) -> Result<Vec<CommitId>, PageError> { self.note(self.dag.heads().await.map_err(PageError::from)) }

    /// Merge any concurrent heads pairwise down to a single head. Safe to
    /// call repeatedly — a page with one head returns it unchanged without
    /// writing anything.
    pub async fn resolve_head(&self, timestamp_micros: u64) -> Result<Option<CommitId>, PageError> {
        let mut heads = self.heads().await?;
        heads.sort();
        let mut iter = heads.into_iter();
        let Some(mut current) = iter.next() else { return Ok(None) };
        for other in iter {
            current = self.note(
                merge::merge(&self.store, &self.dag, current, other, timestamp_micros, merge::DEFAULT_LCA_BUDGET)
                    .await
                    .map_err(PageError::from),
            )?;
        }
        Ok(Some(current))
    }

    /// Start a transaction against the page's current (resolved) head.
    pub async fn begin(&self, timestamp_micros: u64) -> Result<Journal<'_>, PageError> {
        let head = self.resolve_head(timestamp_micros).await?;
        Ok(Journal::begin(&self.store, &self.dag, head).await?)
    }

    /// Read a single key as of the page's current (resolved) head.
    pub async fn get(&self, key: &[u8], timestamp_micros: u64) -> Result<Option<Vec<u8>>, PageError> {
        let Some(head) = self.resolve_head(timestamp_micros).await? else { return Ok(None) };
        let commit = self.note(self.dag.get(head).await.map_err(PageError::from))?;
        let found = self.note(btree::lookup(&self.store, commit.root_tree, key).await.map_err(PageError::from))?;
        let Some((value_id, _priority)) = found else { return Ok(None) };
        Ok(Some(self.note(self.store.read_to_end(value_id).await.map_err(PageError::from))?))
    }
}
