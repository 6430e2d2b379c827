//! A read-only view of a page as of one resolved head (spec.md §6 "takes
//! snapshots; reads via snapshot: get, get-entries, get-keys-by-prefix").
//!
//! Unlike [`crate::page::PageHandle::get`], a `Snapshot` is pinned to the
//! root tree it was built from — later commits on the page are invisible to
//! it, giving callers a consistent read even while concurrent writers
//! advance the head.

use ledger_core::btree;
use ledger_core::objectstore::ObjectStore;
use ledger_proto::{CommitId, ObjectId};

use crate::error::Result;

pub struct Snapshot<'a> {
    store: &'a ObjectStore,
    pub head: Option<CommitId>,
    root: Option<ObjectId>,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(store: &'a ObjectStore, head: Option<CommitId>, root: Option<ObjectId>) -> Self { Snapshot { store, head, root } }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(root) = self.root else { return Ok(None) };
        let Some((value_id, _priority)) = btree::lookup(self.store, root, key).await? else { return Ok(None) };
        Ok(Some(self.store.read_to_end(value_id).await?))
    }

    /// All entries from `from_key` (inclusive) onward, in key order.
    pub async fn get_entries(&self, from_key: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let Some(root) = self.root else { return Ok(Vec::new()) };
        let entries = btree::iterate(self.store, root, from_key).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let value = self.store.read_to_end(entry.value).await?;
            out.push((entry.key, value));
        }
        Ok(out)
    }

    /// All keys starting with `prefix`, in key order.
    pub async fn get_keys_by_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let Some(root) = self.root else { return Ok(Vec::new()) };
        let entries = btree::iterate(self.store, root, Some(prefix)).await?;
        Ok(entries.into_iter().take_while(|e| e.key.starts_with(prefix)).map(|e| e.key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::commitdag::CommitDag;
    use ledger_core::journal::Journal;
    use ledger_core::objectstore::BytesSource;
    use ledger_core::testkit::MemoryKv;
    use ledger_proto::Priority;
    use std::sync::Arc;

    #[tokio::test]
    async fn reads_reflect_only_the_pinned_head() {
        let kv = Arc::new(MemoryKv::new());
        let store = ObjectStore::new(kv.clone());
        let dag = CommitDag::new(kv);

        let v1 = store.add_from_source(BytesSource::new(b"1".to_vec())).await.unwrap();
        let mut j1 = Journal::begin(&store, &dag, None).await.unwrap();
        j1.put("a", v1, Priority::Eager).unwrap();
        let c1 = j1.commit(1).await.unwrap();
        let root1 = dag.get(c1).await.unwrap().root_tree;
        let snap1 = Snapshot::new(&store, Some(c1), Some(root1));

        let v2 = store.add_from_source(BytesSource::new(b"2".to_vec())).await.unwrap();
        let mut j2 = Journal::begin(&store, &dag, Some(c1)).await.unwrap();
        j2.put("b", v2, Priority::Eager).unwrap();
        j2.commit(2).await.unwrap();

        assert_eq!(snap1.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(snap1.get(b"b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_keys_by_prefix_filters_to_the_prefix() {
        let kv = Arc::new(MemoryKv::new());
        let store = ObjectStore::new(kv.clone());
        let dag = CommitDag::new(kv);
        let mut j = Journal::begin(&store, &dag, None).await.unwrap();
        for key in ["a/1", "a/2", "b/1"] {
            let v = store.add_from_source(BytesSource::new(key.as_bytes().to_vec())).await.unwrap();
            j.put(key, v, Priority::Eager).unwrap();
        }
        let c = j.commit(1).await.unwrap();
        let root = dag.get(c).await.unwrap().root_tree;
        let snap = Snapshot::new(&store, Some(c), Some(root));
        let keys = snap.get_keys_by_prefix(b"a/").await.unwrap();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
    }
}
