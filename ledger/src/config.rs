//! Programmatic configuration for an embedded [`crate::Engine`].
//!
//! `SPEC_FULL.md` §2 resolves spec.md §9's note that global state must be
//! "injected at construction" by giving embedders a plain struct rather than
//! process-wide statics or environment lookups; `ledger-cli` is the only
//! place that turns command-line flags into one of these.

use std::path::PathBuf;

use ledger_proto::Fingerprint;

/// Where a repository's sled database lives on disk.
#[derive(Debug, Clone)]
pub enum StorageLocation {
    Path(PathBuf),
    /// An ephemeral, on-disk-but-temporary database, for tests and
    /// `--no_persisted_config` runs.
    Temporary,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub app: String,
    pub user: String,
    pub storage: StorageLocation,
    /// When `false`, no sync engines are started for any page opened under
    /// this config (spec.md §6 `--no_network_for_testing`).
    pub network_enabled: bool,
    /// Forces [`crate::supervisor`]-driven verification to report
    /// `cloud erased` on the next check, regardless of what the remote
    /// actually holds (spec.md §6 `--trigger_cloud_erased_for_testing`).
    pub trigger_cloud_erased_for_testing: bool,
    /// Device fingerprint to use instead of generating/loading one. Tests
    /// wire this in directly; real embedders leave it `None` and let
    /// [`crate::repository::Repository::open`] persist a generated one.
    pub fingerprint_override: Option<Fingerprint>,
}

impl EngineConfig {
    pub fn new(app: impl Into<String>, user: impl Into<String>, storage: StorageLocation) -> Self {
        EngineConfig { app: app.into(), user: user.into(), storage, network_enabled: true, trigger_cloud_erased_for_testing: false, fingerprint_override: None }
    }

    pub fn for_testing(app: impl Into<String>, user: impl Into<String>) -> Self {
        let mut config = Self::new(app, user, StorageLocation::Temporary);
        config.network_enabled = false;
        config
    }
}
