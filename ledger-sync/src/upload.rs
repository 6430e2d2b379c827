//! The per-page upload worker (spec.md §4.8). Scans `S/` rows for commits
//! not yet marked synced, uploads each commit's transitive object closure
//! and then the commit record itself, and advances the sync-state/watermark
//! rows in the same bucket on success.
//!
//! Grounded on `user_sync_impl.cc`'s retry-with-backoff shape
//! (`CheckCloudVersion` reposting itself via `backoff_->GetNext()` on a
//! network error) and on spec.md §4.8's permanent-vs-transient failure
//! split.

use std::sync::Arc;

use ledger_core::commitdag::CommitDag;
use ledger_core::error::CommitError;
use ledger_core::kv::{keys, KvDatabase};
use ledger_core::objectstore::ObjectStore;
use ledger_core::{btree, runtime::CoroutineContext};
use ledger_proto::{CommitId, PageId};

use crate::aggregator::{Aggregator, UploadState};
use crate::backoff::Backoff;
use crate::document::{commit_path, object_key, BlobService, CommitEnvelope, DocumentService};
use crate::error::SyncError;

const SYNC_STATE_UNSYNCED: u8 = 0;
const SYNC_STATE_SYNCED: u8 = 1;
const SYNC_STATE_UNSYNCABLE: u8 = 2;

/// Retries a transient failure this many times before giving up on a pass
/// (the caller's next scheduled pass will pick the commit back up).
const MAX_ATTEMPTS_PER_PASS: u32 = 5;

pub struct UploadEngine<'a> {
    app: String,
    page: PageId,
    store: &'a ObjectStore,
    dag: &'a CommitDag,
    kv: Arc<dyn KvDatabase>,
    document: Arc<dyn DocumentService>,
    blob: Arc<dyn BlobService>,
    backoff: Backoff,
}

impl<'a> UploadEngine<'a> {
    pub fn new(
        app: impl Into<String>,
        page: PageId,
        store: &'a ObjectStore,
        dag: &'a CommitDag,
        kv: Arc<dyn KvDatabase>,
        document: Arc<dyn DocumentService>,
        blob: Arc<dyn BlobService>,
    ) -> Self {
        UploadEngine { app: app.into(), page, store, dag, kv, document, blob, backoff: Backoff::default_policy() }
    }

    pub async fn run_pass(&mut self, aggregator: &Aggregator, cx: Option<&CoroutineContext>) -> Result<usize, SyncError> {
        let pending = self.scan_pending().await?;
        if pending.is_empty() {
            aggregator.report(self.page, crate::aggregator::SyncState { download: Default::default(), upload: UploadState::Idle });
            return Ok(0);
        }
        aggregator.report(self.page, crate::aggregator::SyncState { download: Default::default(), upload: UploadState::Pending });
        let mut uploaded = 0;
        for id in pending {
            if let Some(cx) = cx {
                if cx.is_interrupted() {
                    break;
                }
            }
            self.upload_one(aggregator, id).await?;
            uploaded += 1;
        }
        aggregator.report(self.page, crate::aggregator::SyncState { download: Default::default(), upload: UploadState::Idle });
        Ok(uploaded)
    }

    /// Commit ids with an unsynced `S/` row, ordered by `(generation,
    /// timestamp_micros)` so upload preserves local commit order (spec.md
    /// §5 "sync upload preserves local order").
    async fn scan_pending(&self) -> Result<Vec<CommitId>, SyncError> {
        let rows = self.kv.get_with_prefix(keys::SYNC_STATE).await.map_err(CommitError::from)?;
        let mut pending = Vec::new();
        for (key, value) in rows {
            if value.first().copied() != Some(SYNC_STATE_UNSYNCED) {
                continue;
            }
            let raw = &key[keys::SYNC_STATE.len()..];
            let Ok(arr) = <[u8; 32]>::try_from(raw) else { continue };
            pending.push(CommitId::from_bytes(arr));
        }
        let mut with_order = Vec::with_capacity(pending.len());
        for id in pending {
            let commit = self.dag.get(id).await.map_err(SyncError::from)?;
            with_order.push((commit.generation, commit.timestamp_micros, id));
        }
        with_order.sort();
        Ok(with_order.into_iter().map(|(_, _, id)| id).collect())
    }

    async fn upload_one(&mut self, aggregator: &Aggregator, id: CommitId) -> Result<(), SyncError> {
        aggregator.report(self.page, crate::aggregator::SyncState { download: Default::default(), upload: UploadState::InProgress });
        let mut attempt = 0;
        loop {
            match self.try_upload(id).await {
                Ok(()) => {
                    self.backoff.reset();
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS_PER_PASS => {
                    attempt += 1;
                    aggregator.report(self.page, crate::aggregator::SyncState { download: Default::default(), upload: UploadState::Error });
                    tracing::warn!(commit = %id, attempt, error = %err, "transient upload failure, backing off");
                    tokio::time::sleep(self.backoff.next()).await;
                }
                Err(err) => {
                    tracing::warn!(commit = %id, error = %err, "permanent upload failure, marking unsyncable");
                    self.mark_unsyncable(id).await?;
                    aggregator.report(self.page, crate::aggregator::SyncState { download: Default::default(), upload: UploadState::Error });
                    return Ok(());
                }
            }
        }
    }

    async fn try_upload(&self, id: CommitId) -> Result<(), SyncError> {
        let commit = self.dag.get(id).await?;
        let object_ids = btree::collect_object_ids(self.store, commit.root_tree).await?;
        for &object_id in &object_ids {
            let bytes = self.store.read_to_end(object_id).await?;
            self.blob.upload(&object_key(&self.app, &self.page.to_base64(), object_id), bytes).await?;
        }
        let envelope = CommitEnvelope {
            id,
            content: ledger_proto::encode_document_value(&commit.encode()),
            objects: object_ids,
            timestamp_micros: commit.timestamp_micros,
            batch_position: 0,
            batch_size: 1,
        };
        let body = serde_json::to_value(&envelope).map_err(|e| SyncError::Malformed(e.to_string()))?;
        self.document.put(&commit_path(&self.app, &self.page.to_base64(), id), body).await?;
        self.mark_synced(id).await
    }

    async fn mark_synced(&self, id: CommitId) -> Result<(), SyncError> {
        let mut batch = self.kv.start_batch();
        batch.put(keys::sync_state_key(&id), vec![SYNC_STATE_SYNCED]);
        batch.put(keys::upload_watermark_key(&self.page), id.as_bytes().to_vec());
        batch.execute().await.map_err(CommitError::from)?;
        Ok(())
    }

    async fn mark_unsyncable(&self, id: CommitId) -> Result<(), SyncError> {
        let mut batch = self.kv.start_batch();
        batch.put(keys::sync_state_key(&id), vec![SYNC_STATE_UNSYNCABLE]);
        batch.execute().await.map_err(CommitError::from)?;
        Ok(())
    }
}

/// Record a freshly-committed commit as unsynced, so the next upload pass
/// picks it up. Called by whatever drives the journal's `commit` (the
/// `ledger` facade), since `ledger-core` itself has no notion of sync.
pub async fn mark_pending(kv: &dyn KvDatabase, id: CommitId) -> Result<(), SyncError> {
    let mut batch = kv.start_batch();
    batch.put(keys::sync_state_key(&id), vec![SYNC_STATE_UNSYNCED]);
    batch.execute().await.map_err(CommitError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::InMemoryCloud;
    use ledger_core::journal::Journal;
    use ledger_core::objectstore::BytesSource;
    use ledger_core::testkit::MemoryKv;
    use ledger_proto::Priority;

    async fn setup() -> (ObjectStore, CommitDag, Arc<dyn KvDatabase>) {
        let kv: Arc<dyn KvDatabase> = Arc::new(MemoryKv::new());
        (ObjectStore::new(kv.clone()), CommitDag::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn uploads_a_pending_commit_and_marks_it_synced() {
        let (store, dag, kv) = setup().await;
        let value = store.add_from_source(BytesSource::new(b"hello".to_vec())).await.unwrap();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        journal.put("k", value, Priority::Eager).unwrap();
        let commit_id = journal.commit(1).await.unwrap();
        mark_pending(kv.as_ref(), commit_id).await.unwrap();

        let cloud = Arc::new(InMemoryCloud::new());
        let (aggregator, _rx) = Aggregator::new();
        let page = PageId::new();
        let mut engine = UploadEngine::new("app", page, &store, &dag, kv.clone(), cloud.clone(), cloud.clone());
        let uploaded = engine.run_pass(&aggregator, None).await.unwrap();
        assert_eq!(uploaded, 1);

        let row = kv.get(&keys::sync_state_key(&commit_id)).await.unwrap().unwrap();
        assert_eq!(row, vec![SYNC_STATE_SYNCED]);
        assert!(cloud.get(&commit_path("app", &page.to_base64(), commit_id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn permanent_failure_marks_the_commit_unsyncable() {
        let (store, dag, kv) = setup().await;
        let value = store.add_from_source(BytesSource::new(b"hello".to_vec())).await.unwrap();
        let mut journal = Journal::begin(&store, &dag, None).await.unwrap();
        journal.put("k", value, Priority::Eager).unwrap();
        let commit_id = journal.commit(1).await.unwrap();
        mark_pending(kv.as_ref(), commit_id).await.unwrap();

        let cloud = Arc::new(InMemoryCloud::rejecting());
        let (aggregator, _rx) = Aggregator::new();
        let page = PageId::new();
        let mut engine = UploadEngine::new("app", page, &store, &dag, kv.clone(), cloud.clone(), cloud.clone());
        engine.run_pass(&aggregator, None).await.unwrap();

        let row = kv.get(&keys::sync_state_key(&commit_id)).await.unwrap().unwrap();
        assert_eq!(row, vec![SYNC_STATE_UNSYNCABLE]);
    }
}
