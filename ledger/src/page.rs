//! A single open page: the storage engine ([`ledger_core::Page`]) plus the
//! change-event broadcast watchers subscribe to and the raw KV bucket the
//! sync engines scan (spec.md §6's page-level surface: put, delete,
//! start-transaction/commit-transaction, snapshots, watchers).

use std::sync::Arc;

use ledger_core::kv::KvDatabase;
use ledger_core::PageHealth;
use ledger_proto::{CommitId, PageId, Priority};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::transaction::Transaction;
use crate::watch::{ChangeEvent, WatchSource};

pub struct PageHandle {
    page: ledger_core::Page,
    pub(crate) kv: Arc<dyn KvDatabase>,
    watch: WatchSource,
}

impl PageHandle {
    pub(crate) fn new(page: ledger_core::Page, kv: Arc<dyn KvDatabase>) -> Self { PageHandle { page, kv, watch: WatchSource::new() } }

    pub fn id(&self) -> PageId { self.page.id }

    pub fn health(&self) -> PageHealth { self.page.health() }

    pub fn kv(&self) -> Arc<dyn KvDatabase> { self.kv.clone() }

    pub(crate) fn core(&self) -> &ledger_core::Page { &self.page }

    pub async fn heads(&self) -> Result<Vec<CommitId>> { Ok(self.page.heads().await?) }

    /// A read-only view pinned to the page's current (merge-resolved) head.
    pub async fn snapshot(&self, timestamp_micros: u64) -> Result<Snapshot<'_>> {
        let head = self.page.resolve_head(timestamp_micros).await?;
        let root = match head {
            Some(id) => Some(self.page.dag().get(id).await?.root_tree),
            None => None,
        };
        Ok(Snapshot::new(self.page.store(), head, root))
    }

    pub async fn begin_transaction(&self, timestamp_micros: u64) -> Result<Transaction<'_>> {
        let head = self.page.resolve_head(timestamp_micros).await?;
        Transaction::begin(self.page.store(), self.page.dag(), &self.watch, head).await
    }

    /// A single-edit convenience transaction (spec.md §6 "writes via page:
    /// put").
    pub async fn put(&self, key: impl Into<Vec<u8>>, value: Vec<u8>, priority: Priority, timestamp_micros: u64) -> Result<CommitId> {
        let mut txn = self.begin_transaction(timestamp_micros).await?;
        txn.put(key, value, priority).await?;
        txn.commit(timestamp_micros).await
    }

    pub async fn delete(&self, key: impl Into<Vec<u8>>, timestamp_micros: u64) -> Result<CommitId> {
        let mut txn = self.begin_transaction(timestamp_micros).await?;
        txn.delete(key)?;
        txn.commit(timestamp_micros).await
    }

    pub async fn get(&self, key: &[u8], timestamp_micros: u64) -> Result<Option<Vec<u8>>> { Ok(self.page.get(key, timestamp_micros).await?) }

    /// Subscribe to this page's ordered change events (spec.md §6
    /// "registers watchers"). The returned receiver only sees events
    /// published after this call.
    pub fn watch(&self) -> broadcast::Receiver<ChangeEvent> { self.watch.subscribe() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::kv::KvEngine;
    use ledger_core::testkit::MemoryKvEngine;
    use ledger_proto::PageId;

    #[tokio::test]
    async fn put_then_snapshot_round_trips() {
        let engine = MemoryKvEngine::new();
        let id = PageId::new();
        let core = ledger_core::Page::open(&engine, id).await.unwrap();
        let kv = engine.bucket(&id.to_base64()).await.unwrap();
        let page = PageHandle::new(core, kv);

        page.put("k", b"v".to_vec(), Priority::Eager, 1).await.unwrap();
        let snap = page.snapshot(2).await.unwrap();
        assert_eq!(snap.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn watchers_see_the_committed_change() {
        let engine = MemoryKvEngine::new();
        let id = PageId::new();
        let core = ledger_core::Page::open(&engine, id).await.unwrap();
        let kv = engine.bucket(&id.to_base64()).await.unwrap();
        let page = PageHandle::new(core, kv);

        let mut rx = page.watch();
        page.put("k", b"v".to_vec(), Priority::Eager, 1).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].key, b"k");
    }
}
