//! The journal: a mutation builder that batches `put`/`delete` edits
//! against a page and, on `commit`, folds them into a single new
//! [`CommitRecord`] appended to the [`CommitDag`] (spec.md §4.6).
//!
//! Supports nested transactions: `begin_nested` opens an inner buffer,
//! `commit_nested` folds it into its parent (still entirely in memory —
//! nothing touches storage until the outermost `commit`), and
//! `rollback_nested` discards it. This mirrors how the teacher's
//! websocket client layers retry scopes on top of a single outbound
//! queue rather than writing through on every call.

use ledger_proto::{CommitId, CommitRecord, ObjectId, Priority};

use crate::btree::{self, EditOp};
use crate::commitdag::CommitDag;
use crate::error::JournalError;
use crate::objectstore::ObjectStore;

pub struct Journal<'a> {
    store: &'a ObjectStore,
    dag: &'a CommitDag,
    base_head: Option<CommitId>,
    base_root: ObjectId,
    base_generation: u64,
    frames: Vec<Vec<(Vec<u8>, EditOp)>>,
    closed: bool,
}

impl<'a> Journal<'a> {
    /// Open a new journal against the page's current head, or a fresh
    /// empty tree if the page has no commits yet.
    pub async fn begin(store: &'a ObjectStore, dag: &'a CommitDag, base_head: Option<CommitId>) -> Result<Journal<'a>, JournalError> {
        let (base_root, base_generation) = match base_head {
            Some(id) => {
                let commit = dag.get(id).await?;
                (commit.root_tree, commit.generation)
            }
            None => (btree::empty_root(store).await?, 0),
        };
        Ok(Journal { store, dag, base_head, base_root, base_generation, frames: vec![Vec::new()], closed: false })
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: ObjectId, priority: Priority) -> Result<(), JournalError> {
        self.current_frame()?.push((key.into(), EditOp::Put(value, priority)));
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<(), JournalError> {
        self.current_frame()?.push((key.into(), EditOp::Delete));
        Ok(())
    }

    fn current_frame(&mut self) -> Result<&mut Vec<(Vec<u8>, EditOp)>, JournalError> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        Ok(self.frames.last_mut().expect("at least one frame is always open"))
    }

    /// How many transactions (including the outermost) are currently open.
    pub fn depth(&self) -> usize { self.frames.len() }

    pub fn begin_nested(&mut self) -> Result<(), JournalError> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        self.frames.push(Vec::new());
        Ok(())
    }

    /// Fold the innermost transaction's edits into its parent frame.
    pub fn commit_nested(&mut self) -> Result<(), JournalError> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        if self.frames.len() < 2 {
            return Err(JournalError::NoNestedTransaction);
        }
        let inner = self.frames.pop().expect("checked length above");
        self.frames.last_mut().expect("outermost frame always remains").extend(inner);
        Ok(())
    }

    /// Discard the innermost transaction's edits entirely.
    pub fn rollback_nested(&mut self) -> Result<(), JournalError> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        if self.frames.len() < 2 {
            return Err(JournalError::NoNestedTransaction);
        }
        self.frames.pop();
        Ok(())
    }

    /// Apply every buffered edit (folding in any still-open nested
    /// transactions) and append the resulting commit to the DAG.
    pub async fn commit(mut self, timestamp_micros: u64) -> Result<CommitId, JournalError> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        while self.frames.len() > 1 {
            self.commit_nested()?;
        }
        let edits = self.frames.pop().expect("outermost frame always remains");
        self.closed = true;
        let new_root = btree::apply(self.store, self.base_root, &edits).await?;
        let record = match self.base_head {
            Some(parent) => CommitRecord::new_child(new_root, vec![parent], &[self.base_generation], timestamp_micros),
            None => CommitRecord::new_root(new_root, timestamp_micros),
        };
        Ok(self.dag.add_commit(&record).await?)
    }

    /// Discard every buffered edit without writing anything.
    pub fn abort(mut self) { self.closed = true; }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::BytesSource;
    use crate::testkit::MemoryKv;
    use std::sync::Arc;

    fn rig() -> (ObjectStore, CommitDag) {
        let kv = Arc::new(MemoryKv::new());
        (ObjectStore::new(kv.clone()), CommitDag::new(kv))
    }

    async fn value(store: &ObjectStore, s: &str) -> ObjectId { store.add_from_source(BytesSource::new(s.as_bytes().to_vec())).await.unwrap() }

    #[tokio::test]
    async fn commit_with_no_prior_head_creates_root_commit() {
        let (store, dag) = rig();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        let v = value(&store, "hello").await;
        journal.put("k", v, Priority::Eager).unwrap();
        let commit_id = journal.commit(1).await.unwrap();
        let commit = dag.get(commit_id).await.unwrap();
        assert!(commit.parents.is_empty());
        assert_eq!(commit.generation, 0);
        let (stored, _) = btree::lookup(&store, commit.root_tree, b"k").await.unwrap().unwrap();
        assert_eq!(stored, v);
    }

    #[tokio::test]
    async fn second_commit_chains_onto_the_first() {
        let (store, dag) = rig();
        let v1 = value(&store, "1").await;
        let mut j1 = Journal::begin(&store, &dag, None).await.unwrap();
        j1.put("a", v1, Priority::Eager).unwrap();
        let c1 = j1.commit(1).await.unwrap();

        let v2 = value(&store, "2").await;
        let mut j2 = Journal::begin(&store, &dag, Some(c1)).await.unwrap();
        j2.put("b", v2, Priority::Eager).unwrap();
        let c2 = j2.commit(2).await.unwrap();

        let commit = dag.get(c2).await.unwrap();
        assert_eq!(commit.parents, vec![c1]);
        assert_eq!(commit.generation, 1);
        assert!(btree::lookup(&store, commit.root_tree, b"a").await.unwrap().is_some());
        assert!(btree::lookup(&store, commit.root_tree, b"b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn nested_transaction_commit_folds_edits_in() {
        let (store, dag) = rig();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        let va = value(&store, "a").await;
        let vb = value(&store, "b").await;
        journal.put("a", va, Priority::Eager).unwrap();
        journal.begin_nested().unwrap();
        journal.put("b", vb, Priority::Eager).unwrap();
        journal.commit_nested().unwrap();
        assert_eq!(journal.depth(), 1);
        let commit_id = journal.commit(1).await.unwrap();
        let commit = dag.get(commit_id).await.unwrap();
        assert!(btree::lookup(&store, commit.root_tree, b"a").await.unwrap().is_some());
        assert!(btree::lookup(&store, commit.root_tree, b"b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn nested_transaction_rollback_discards_its_edits() {
        let (store, dag) = rig();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        let va = value(&store, "a").await;
        let vb = value(&store, "b").await;
        journal.put("a", va, Priority::Eager).unwrap();
        journal.begin_nested().unwrap();
        journal.put("b", vb, Priority::Eager).unwrap();
        journal.rollback_nested().unwrap();
        let commit_id = journal.commit(1).await.unwrap();
        let commit = dag.get(commit_id).await.unwrap();
        assert!(btree::lookup(&store, commit.root_tree, b"a").await.unwrap().is_some());
        assert!(btree::lookup(&store, commit.root_tree, b"b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_nested_without_an_open_nested_transaction_errors() {
        let (store, dag) = rig();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        assert!(matches!(journal.commit_nested(), Err(JournalError::NoNestedTransaction)));
    }

    #[tokio::test]
    async fn abort_discards_everything() {
        let (store, dag) = rig();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        let v = value(&store, "x").await;
        journal.put("k", v, Priority::Eager).unwrap();
        journal.abort();
        assert!(dag.heads().await.unwrap().is_empty());
    }
}
