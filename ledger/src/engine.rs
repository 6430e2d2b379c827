//! The single-threaded engine loop (spec.md §5): owns the
//! [`ledger_core::runtime::Runtime`] every coroutine runs on, the
//! [`Repository`], and — when networking is enabled — the per-page sync
//! engines and the user-sync supervisor.
//!
//! Grounded on the teacher's `Node` (owns storage + connections, exposes a
//! `Context` for operations) generalized to this domain's single-process,
//! single-threaded model: one `Engine` per process, one `Runtime` driving
//! every page's upload/download coroutines plus the device-fingerprint
//! watch.

use std::sync::Arc;

use ledger_core::runtime::Runtime;
use ledger_proto::PageId;
use ledger_sync::{Aggregator, BlobService, DocumentService, DownloadEngine, SyncState, UploadEngine};
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::page::PageHandle;
use crate::repository::Repository;
use crate::supervisor_adapter::DeviceFingerprintGuard;

pub struct Engine {
    pub repository: Repository,
    runtime: Runtime,
    aggregator: Aggregator,
    remote: Option<(Arc<dyn DocumentService>, Arc<dyn BlobService>)>,
    fingerprint_guard: Option<DeviceFingerprintGuard>,
}

impl Engine {
    /// Opens the repository and, unless `config.network_enabled` is false
    /// (spec.md §6 `--no_network_for_testing`), registers or verifies the
    /// local device fingerprint against the remote devices map (spec.md
    /// §4.9) before returning.
    pub async fn start(config: EngineConfig, remote: Option<(Arc<dyn DocumentService>, Arc<dyn BlobService>)>) -> Result<Self> {
        let network_enabled = config.network_enabled && remote.is_some();
        let repository = Repository::open(config).await?;
        let fingerprint_guard = if network_enabled {
            let (document, _) = remote.as_ref().expect("checked above");
            Some(DeviceFingerprintGuard::establish(&repository, document.clone()).await?)
        } else {
            None
        };
        Ok(Engine { repository, runtime: Runtime::new(), aggregator: Aggregator::new().0, remote, fingerprint_guard })
    }

    pub fn runtime(&self) -> &Runtime { &self.runtime }

    pub fn sync_state(&self) -> SyncState { self.aggregator.current() }

    pub fn subscribe_sync_state(&self) -> watch::Receiver<SyncState> { self.aggregator.subscribe() }

    pub fn device_erased(&self) -> bool { self.fingerprint_guard.as_ref().map(|g| g.erased()).unwrap_or(false) }

    /// Run one upload pass for `page`. A no-op (returns `Ok(0)`) if
    /// networking is disabled for this engine.
    pub async fn upload_pass(&self, page: &PageHandle) -> Result<usize> {
        let Some((document, blob)) = &self.remote else { return Ok(0) };
        let mut upload = UploadEngine::new(
            self.repository.config.app.clone(),
            page.id(),
            page.core().store(),
            page.core().dag(),
            page.kv(),
            document.clone(),
            blob.clone(),
        );
        Ok(upload.run_pass(&self.aggregator, None).await?)
    }

    /// Drain one watch event into `page`'s download engine. Callers loop
    /// this against `DocumentService::watch`'s receiver; see
    /// `ledger-cli` for the production driving loop.
    pub async fn download_event(&self, page: &PageHandle, event: ledger_sync::WatchEvent) -> Result<usize> {
        let Some((_, blob)) = &self.remote else { return Ok(0) };
        let mut download = DownloadEngine::new(self.repository.config.app.clone(), page.id(), page.core().store(), page.core().dag(), page.kv(), blob.clone());
        Ok(download.handle_event(event).await?)
    }

    pub fn commits_watch_path(&self, page: PageId) -> Option<String> {
        self.remote.as_ref().map(|_| ledger_sync::document::commits_prefix(&self.repository.config.app, &page.to_base64()))
    }

    /// Ask every outstanding coroutine to wind down (spec.md §5
    /// "Cancellation"). Safe to call from the "terminate" command path.
    pub fn shutdown(&self) { self.runtime.interrupt(); }
}
