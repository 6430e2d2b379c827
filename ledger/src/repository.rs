//! Opens pages against one [`ledger_core::kv::KvEngine`] (spec.md §6 "opens
//! repositories and pages"). Also owns the local device fingerprint: loaded
//! from a dedicated metadata bucket on first access, generated and
//! persisted if absent, per spec.md §4.9.

use std::collections::HashMap;
use std::sync::Arc;

use ledger_core::kv::{keys, KvDatabase, KvEngine};
use ledger_proto::{Fingerprint, PageId};
use tokio::sync::Mutex;

use crate::config::{EngineConfig, StorageLocation};
use crate::error::Result;
use crate::page::PageHandle;

const META_BUCKET: &str = "__meta";

pub struct Repository {
    pub(crate) config: EngineConfig,
    pub(crate) engine: Arc<dyn KvEngine>,
    meta: Arc<dyn KvDatabase>,
    pages: Mutex<HashMap<PageId, Arc<PageHandle>>>,
}

impl Repository {
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let engine: Arc<dyn KvEngine> = match &config.storage {
            StorageLocation::Path(path) => Arc::new(ledger_storage_sled::SledKvEngine::with_path(path.clone())?),
            StorageLocation::Temporary => Arc::new(ledger_storage_sled::SledKvEngine::new_test()?),
        };
        let meta = engine.bucket(META_BUCKET).await?;
        Ok(Repository { config, engine, meta, pages: Mutex::new(HashMap::new()) })
    }

    #[cfg(any(test, feature = "testkit"))]
    pub fn from_engine(config: EngineConfig, engine: Arc<dyn KvEngine>, meta: Arc<dyn KvDatabase>) -> Self {
        Repository { config, engine, meta, pages: Mutex::new(HashMap::new()) }
    }

    /// Loads the locally persisted device fingerprint, generating and
    /// persisting one on first run (spec.md §4.9 "on first start, generate
    /// a random fingerprint, persist locally"). The bool is `true` only
    /// when a fingerprint was just generated — callers use it to decide
    /// "register" versus "verify" against the remote devices map.
    pub async fn local_fingerprint(&self) -> Result<(Fingerprint, bool)> {
        if let Some(fingerprint) = &self.config.fingerprint_override {
            return Ok((*fingerprint, false));
        }
        if let Some(bytes) = self.meta.get(keys::FINGERPRINT).await? {
            let array: [u8; 16] = bytes.try_into().map_err(|_| anyhow::anyhow!("corrupt persisted fingerprint"))?;
            return Ok((Fingerprint(array), false));
        }
        let fingerprint = Fingerprint::generate();
        let mut batch = self.meta.start_batch();
        batch.put(keys::FINGERPRINT.to_vec(), fingerprint.0.to_vec());
        batch.execute().await?;
        Ok((fingerprint, true))
    }

    /// Opens (creating the underlying KV bucket on first use) a page by
    /// id, caching the handle so repeated calls share one [`PageHandle`]
    /// and therefore one watcher broadcast.
    pub async fn open_page(&self, id: PageId) -> Result<Arc<PageHandle>> {
        let mut pages = self.pages.lock().await;
        if let Some(existing) = pages.get(&id) {
            return Ok(existing.clone());
        }
        let core = ledger_core::Page::open(&*self.engine, id).await?;
        let kv = self.engine.bucket(&id.to_base64()).await?;
        let handle = Arc::new(PageHandle::new(core, kv));
        pages.insert(id, handle.clone());
        Ok(handle)
    }

    /// Opens a freshly-minted page.
    pub async fn create_page(&self) -> Result<Arc<PageHandle>> { self.open_page(PageId::new()).await }

    pub async fn open_pages(&self) -> Vec<Arc<PageHandle>> { self.pages.lock().await.values().cloned().collect() }
}
