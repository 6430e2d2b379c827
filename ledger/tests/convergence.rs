//! End-to-end scenarios from spec.md §8: two-device convergence and
//! cloud-erased recovery, driven entirely through the public `ledger`
//! facade against `ledger_sync::testkit::InMemoryCloud` rather than a
//! real remote.

use std::sync::Arc;

use ledger::{Engine, EngineConfig, StorageLocation};
use ledger_proto::{PageId, Priority};
use ledger_sync::document::commits_prefix;
use ledger_sync::testkit::InMemoryCloud;
use ledger_sync::{BlobService, DocumentService};

fn remote(cloud: &Arc<InMemoryCloud>) -> (Arc<dyn DocumentService>, Arc<dyn BlobService>) {
    (cloud.clone() as Arc<dyn DocumentService>, cloud.clone() as Arc<dyn BlobService>)
}

async fn drain(engine: &Engine, page: &ledger::PageHandle, rx: &mut tokio::sync::mpsc::Receiver<ledger_sync::WatchEvent>) {
    while let Ok(event) = rx.try_recv() {
        engine.download_event(page, event).await.unwrap();
    }
}

#[tokio::test]
async fn two_devices_converge_after_syncing_through_the_cloud() {
    let cloud = Arc::new(InMemoryCloud::new());
    let page_id = PageId::new();

    let engine_a = Engine::start(EngineConfig::new("app", "alice", StorageLocation::Temporary), Some(remote(&cloud))).await.unwrap();
    let engine_b = Engine::start(EngineConfig::new("app", "alice", StorageLocation::Temporary), Some(remote(&cloud))).await.unwrap();

    let page_a = engine_a.repository.open_page(page_id).await.unwrap();
    let page_b = engine_b.repository.open_page(page_id).await.unwrap();

    let watch_path = commits_prefix("app", &page_id.to_base64());
    let mut rx_a = cloud.watch(&watch_path).await.unwrap();
    let mut rx_b = cloud.watch(&watch_path).await.unwrap();

    const N: u64 = 10;
    for i in 0..N {
        page_a.put(format!("a{i}"), format!("va{i}").into_bytes(), Priority::Eager, i + 1).await.unwrap();
        page_b.put(format!("b{i}"), format!("vb{i}").into_bytes(), Priority::Eager, i + 1).await.unwrap();
    }

    engine_a.upload_pass(&page_a).await.unwrap();
    engine_b.upload_pass(&page_b).await.unwrap();

    drain(&engine_a, &page_a, &mut rx_a).await;
    drain(&engine_b, &page_b, &mut rx_b).await;
    // a second pass resolves commits that only became ingestible once
    // their sibling's upload landed.
    drain(&engine_a, &page_a, &mut rx_a).await;
    drain(&engine_b, &page_b, &mut rx_b).await;

    let snapshot_a = page_a.snapshot(1000).await.unwrap();
    let snapshot_b = page_b.snapshot(1000).await.unwrap();
    let keys_a = snapshot_a.get_keys_by_prefix(b"").await.unwrap();
    let keys_b = snapshot_b.get_keys_by_prefix(b"").await.unwrap();

    assert_eq!(keys_a.len(), (N * 2) as usize);
    assert_eq!(keys_a, keys_b);

    for i in 0..N {
        assert_eq!(snapshot_a.get(format!("a{i}").as_bytes()).await.unwrap(), Some(format!("va{i}").into_bytes()));
        assert_eq!(snapshot_b.get(format!("a{i}").as_bytes()).await.unwrap(), Some(format!("va{i}").into_bytes()));
    }
}

#[tokio::test]
async fn cloud_erased_recovery_clears_the_local_fingerprint_on_reinit() {
    let cloud = Arc::new(InMemoryCloud::new());
    let config = EngineConfig::new("app", "alice", StorageLocation::Temporary);

    let engine = Engine::start(config, Some(remote(&cloud))).await.unwrap();
    assert!(!engine.device_erased());

    let mut erased_config = EngineConfig::new("app", "alice", StorageLocation::Temporary);
    erased_config.trigger_cloud_erased_for_testing = true;
    let erased_engine = Engine::start(erased_config, Some(remote(&cloud))).await.unwrap();
    assert!(erased_engine.device_erased());

    // host reinitializes onto fresh storage once "cloud-erased" is observed;
    // the freshly opened repository has no persisted fingerprint yet.
    let fresh = ledger::Repository::open(EngineConfig::for_testing("app", "alice")).await.unwrap();
    let (_, is_new) = fresh.local_fingerprint().await.unwrap();
    assert!(is_new, "a reinitialized repository must generate a new fingerprint rather than reuse the erased one");
}

#[tokio::test]
async fn transaction_atomicity_publishes_one_change_event_for_both_keys() {
    let repo = ledger::Repository::open(EngineConfig::for_testing("app", "alice")).await.unwrap();
    let page = repo.create_page().await.unwrap();
    let mut watcher = page.watch();

    let mut txn = page.begin_transaction(1).await.unwrap();
    txn.put("a", b"1".to_vec(), Priority::Eager).await.unwrap();
    txn.put("b", b"2".to_vec(), Priority::Eager).await.unwrap();
    txn.commit(1).await.unwrap();

    let event = watcher.recv().await.unwrap();
    let mut keys: Vec<_> = event.changes.iter().map(|c| c.key.clone()).collect();
    keys.sort();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    assert!(watcher.try_recv().is_err(), "exactly one change event should be published for the whole transaction");
}
