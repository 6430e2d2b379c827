//! The user-sync supervisor (spec.md §4.9): on first run, registers this
//! device's fingerprint under the user's cloud metadata; on every
//! subsequent run, verifies it's still there before enabling upload; while
//! running, watches the same path so a fingerprint that disappears (the
//! cloud account was erased) downgrades sync rather than uploading into a
//! stale remote state.
//!
//! Grounded on `cloud_device_set_impl.cc`'s `CheckFingerprint` (absence of
//! the value means `Status::ERASED`, not merely "not found") /
//! `SetFingerprint` / `OnPut` (a watch callback that treats a null value
//! the same way), and on `user_sync_impl.cc`'s `CheckCloudVersion` retrying
//! itself with `backoff_->GetNext()` on a network error rather than giving
//! up immediately.

use std::sync::Arc;

use ledger_proto::Fingerprint;

use crate::backoff::Backoff;
use crate::document::{device_path, DocumentService, WatchEvent};
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The fingerprint is present; sync upload may proceed.
    Ok,
    /// The fingerprint is absent where it should be registered — the cloud
    /// account was wiped or this device was removed from it. Upload must
    /// stay disabled until an operator resolves this (spec.md §4.9).
    Erased,
    NetworkError(String),
}

pub struct UserSyncSupervisor {
    user: String,
    fingerprint: Fingerprint,
    document: Arc<dyn DocumentService>,
    backoff: Backoff,
}

impl UserSyncSupervisor {
    pub fn new(user: impl Into<String>, fingerprint: Fingerprint, document: Arc<dyn DocumentService>) -> Self {
        UserSyncSupervisor { user: user.into(), fingerprint, document, backoff: Backoff::default_policy() }
    }

    pub fn path(&self) -> String { device_path(&self.user, self.fingerprint) }

    /// First-run registration (spec.md §4.9 "registered in remote
    /// per-user devices map on first start").
    pub async fn register(&self) -> Result<(), SyncError> { self.document.put(&self.path(), serde_json::json!(true)).await }

    /// A single, un-retried check of whether the fingerprint is still
    /// registered.
    pub async fn verify(&self) -> Result<DeviceStatus, SyncError> {
        match self.document.get(&self.path()).await {
            Ok(Some(value)) if !value.is_null() => Ok(DeviceStatus::Ok),
            Ok(_) => Ok(DeviceStatus::Erased),
            Err(err) if err.is_transient() => Ok(DeviceStatus::NetworkError(err.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Verify with retry-with-backoff on transient network errors,
    /// mirroring `CheckCloudVersion`'s self-repost via `backoff_->GetNext()`
    /// rather than surfacing a network blip as a permanent failure.
    pub async fn verify_with_retry(&mut self, max_attempts: u32) -> Result<DeviceStatus, SyncError> {
        for attempt in 0..max_attempts.max(1) {
            match self.verify().await? {
                DeviceStatus::NetworkError(reason) => {
                    tracing::warn!(attempt, %reason, "device fingerprint check failed, retrying");
                    tokio::time::sleep(self.backoff.next()).await;
                }
                status => {
                    self.backoff.reset();
                    return Ok(status);
                }
            }
        }
        Ok(DeviceStatus::NetworkError("exceeded retry attempts checking device fingerprint".into()))
    }

    /// Begin watching this device's entry for as long as sync runs. Feed
    /// each event through [`UserSyncSupervisor::interpret`].
    pub async fn watch(&self) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, SyncError> { self.document.watch(&self.path()).await }

    /// Translate one watch event into a [`DeviceStatus`], matching
    /// `CloudDeviceSetImpl::OnPut`'s null-means-erased rule and
    /// `OnConnectionError`/`OnAuthRevoked`'s network-error downgrade.
    pub fn interpret(event: WatchEvent) -> DeviceStatus {
        match event {
            WatchEvent::Put { value, .. } if !value.is_null() => DeviceStatus::Ok,
            WatchEvent::Put { .. } => DeviceStatus::Erased,
            WatchEvent::Delete { .. } => DeviceStatus::Erased,
            WatchEvent::Error(reason) => DeviceStatus::NetworkError(reason),
        }
    }
}
