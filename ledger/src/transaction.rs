//! A page transaction (spec.md §6 "writes via page: put, delete,
//! start-transaction/commit-transaction"). Wraps
//! [`ledger_core::journal::Journal`], adding the two things a journal alone
//! doesn't do: draining a raw byte value into the object store before
//! buffering the edit, and publishing an ordered [`crate::watch::ChangeEvent`]
//! once the commit lands.

use ledger_core::btree;
use ledger_core::commitdag::CommitDag;
use ledger_core::journal::Journal;
use ledger_core::objectstore::{BytesSource, ObjectStore};
use ledger_proto::{CommitId, Priority};

use crate::error::Result;
use crate::watch::{Change, ChangeEvent, WatchSource};

pub struct Transaction<'a> {
    store: &'a ObjectStore,
    dag: &'a CommitDag,
    watch: &'a WatchSource,
    base_root: Option<ledger_proto::ObjectId>,
    journal: Journal<'a>,
}

impl<'a> Transaction<'a> {
    pub(crate) async fn begin(store: &'a ObjectStore, dag: &'a CommitDag, watch: &'a WatchSource, base_head: Option<CommitId>) -> Result<Transaction<'a>> {
        let base_root = match base_head {
            Some(id) => Some(dag.get(id).await?.root_tree),
            None => None,
        };
        let journal = Journal::begin(store, dag, base_head).await?;
        Ok(Transaction { store, dag, watch, base_root, journal })
    }

    pub async fn put(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>, priority: Priority) -> Result<()> {
        let value_id = self.store.add_from_source(BytesSource::new(value)).await?;
        self.journal.put(key, value_id, priority)?;
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.journal.delete(key)?;
        Ok(())
    }

    pub fn begin_nested(&mut self) -> Result<()> { Ok(self.journal.begin_nested()?) }
    pub fn commit_nested(&mut self) -> Result<()> { Ok(self.journal.commit_nested()?) }
    pub fn rollback_nested(&mut self) -> Result<()> { Ok(self.journal.rollback_nested()?) }

    pub fn abort(self) { self.journal.abort() }

    pub async fn commit(self, timestamp_micros: u64) -> Result<CommitId> {
        let base_root = self.base_root;
        let commit_id = self.journal.commit(timestamp_micros).await?;
        let new_root = self.dag.get(commit_id).await?.root_tree;
        if let Some(base_root) = base_root {
            let diff = btree::diff(self.store, base_root, new_root).await?;
            if !diff.is_empty() {
                self.watch.publish(ChangeEvent { commit: commit_id, changes: diff.into_iter().map(Change::from).collect() });
            }
        } else if new_root != btree::empty_root(self.store).await? {
            let diff = btree::diff(self.store, btree::empty_root(self.store).await?, new_root).await?;
            self.watch.publish(ChangeEvent { commit: commit_id, changes: diff.into_iter().map(Change::from).collect() });
        }
        Ok(commit_id)
    }
}
