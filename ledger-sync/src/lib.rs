//! Cloud sync for Ledger pages (spec.md §4.8, §4.9): the remote service
//! contracts, a per-page upload worker and download engine, multi-page
//! sync-state aggregation, and the user-level device-fingerprint
//! supervisor.
//!
//! Like `ledger-core`, this crate knows nothing about a concrete transport
//! — it depends only on [`document::DocumentService`] and
//! [`document::BlobService`], so the same upload/download engines run
//! against a real cloud connector or the in-process [`testkit`] double.

pub mod aggregator;
pub mod backoff;
pub mod document;
pub mod download;
pub mod error;
pub mod supervisor;
pub mod upload;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use aggregator::{Aggregator, DownloadState, SyncState, UploadState};
pub use backoff::Backoff;
pub use document::{BlobService, CommitEnvelope, DocumentService, WatchEvent};
pub use download::DownloadEngine;
pub use error::SyncError;
pub use supervisor::{DeviceStatus, UserSyncSupervisor};
pub use upload::UploadEngine;
