//! The public per-process API for Ledger (spec.md §6 "Client API"):
//! opens repositories and pages, issues transactions, takes snapshots, and
//! registers watchers, wiring `ledger-core` + `ledger-storage-sled` +
//! `ledger-sync` together behind a single-threaded [`engine::Engine`].
//!
//! Application code embeds this crate the way the teacher's downstream
//! consumers embed `ankurah`: open a repository, open or create pages,
//! read through snapshots, write through transactions, subscribe to
//! changes.

pub mod config;
pub mod engine;
pub mod error;
pub mod page;
pub mod repository;
pub mod snapshot;
pub mod supervisor_adapter;
pub mod transaction;
pub mod watch;

pub use config::{EngineConfig, StorageLocation};
pub use engine::Engine;
pub use error::{LedgerError, Result};
pub use page::PageHandle;
pub use repository::Repository;
pub use snapshot::Snapshot;
pub use supervisor_adapter::DeviceFingerprintGuard;
pub use transaction::Transaction;
pub use watch::{Change, ChangeEvent};

pub use ledger_core::PageHealth;
pub use ledger_proto::{CommitId, Fingerprint, ObjectId, PageId, Priority};

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_sync::testkit::InMemoryCloud;
    use std::sync::Arc;

    #[tokio::test]
    async fn end_to_end_put_get_through_a_fresh_page() {
        let repo = Repository::open(EngineConfig::for_testing("app", "alice")).await.unwrap();
        let page = repo.create_page().await.unwrap();
        page.put("greeting", b"hello".to_vec(), Priority::Eager, 1).await.unwrap();
        let snap = page.snapshot(2).await.unwrap();
        assert_eq!(snap.get(b"greeting").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn engine_without_network_skips_sync_passes() {
        let engine = Engine::start(EngineConfig::for_testing("app", "alice"), None).await.unwrap();
        let page = engine.repository.create_page().await.unwrap();
        assert_eq!(engine.upload_pass(&page).await.unwrap(), 0);
        assert!(!engine.device_erased());
    }

    #[tokio::test]
    async fn engine_with_network_registers_the_device_on_first_run() {
        let cloud: Arc<InMemoryCloud> = Arc::new(InMemoryCloud::new());
        let remote = Some((cloud.clone() as Arc<dyn ledger_sync::DocumentService>, cloud.clone() as Arc<dyn ledger_sync::BlobService>));
        let engine = Engine::start(EngineConfig::new("app", "alice", StorageLocation::Temporary), remote).await.unwrap();
        assert!(!engine.device_erased());
    }
}
