//! Bridges [`ledger_sync::UserSyncSupervisor`] to the locally persisted
//! fingerprint (spec.md §4.9): register on first run, verify on every
//! subsequent one, and remember whether the remote reported "erased" so
//! [`crate::Engine::device_erased`] can signal the host to clear local
//! state.

use std::sync::Arc;

use ledger_sync::{DeviceStatus, DocumentService, UserSyncSupervisor};

use crate::error::Result;
use crate::repository::Repository;

pub struct DeviceFingerprintGuard {
    status: DeviceStatus,
}

impl DeviceFingerprintGuard {
    pub async fn establish(repository: &Repository, document: Arc<dyn DocumentService>) -> Result<Self> {
        let (fingerprint, is_new) = repository.local_fingerprint().await?;
        let mut supervisor = UserSyncSupervisor::new(repository.config.user.clone(), fingerprint, document);

        let status = if repository.config.trigger_cloud_erased_for_testing {
            DeviceStatus::Erased
        } else if is_new {
            supervisor.register().await?;
            DeviceStatus::Ok
        } else {
            supervisor.verify_with_retry(5).await?
        };
        Ok(DeviceFingerprintGuard { status })
    }

    pub fn erased(&self) -> bool { matches!(self.status, DeviceStatus::Erased) }

    pub fn status(&self) -> &DeviceStatus { &self.status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use ledger_sync::testkit::InMemoryCloud;

    #[tokio::test]
    async fn first_run_registers_and_reports_ok() {
        let repo = Repository::open(EngineConfig::for_testing("app", "alice")).await.unwrap();
        let cloud = Arc::new(InMemoryCloud::new());
        let guard = DeviceFingerprintGuard::establish(&repo, cloud).await.unwrap();
        assert!(!guard.erased());
    }

    #[tokio::test]
    async fn trigger_cloud_erased_for_testing_forces_erased() {
        let mut config = EngineConfig::for_testing("app", "alice");
        config.trigger_cloud_erased_for_testing = true;
        let repo = Repository::open(config).await.unwrap();
        let cloud = Arc::new(InMemoryCloud::new());
        let guard = DeviceFingerprintGuard::establish(&repo, cloud).await.unwrap();
        assert!(guard.erased());
    }
}
