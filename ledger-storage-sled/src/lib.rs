//! A [`ledger_core::kv::KvEngine`] backed by [`sled`]: one `sled::Tree`
//! per bucket. Grounded directly on the teacher's `SledStorageEngine` /
//! `SledStorageCollection` (one tree per collection, `spawn_blocking`
//! around every call since sled's API is synchronous).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task;

use ledger_core::error::{Internal, KvError};
use ledger_core::kv::{KvBatch, KvDatabase, KvEngine};

fn sled_err(context: &'static str, err: sled::Error) -> KvError { KvError::Backend(Internal::new(context, err)) }

fn join_err(err: tokio::task::JoinError) -> KvError { KvError::Backend(Internal::new("sled worker task panicked", err)) }

pub struct SledKvEngine {
    db: sled::Db,
}

impl SledKvEngine {
    pub fn with_path(path: PathBuf) -> Result<Self, KvError> {
        std::fs::create_dir_all(&path).map_err(|e| KvError::Backend(Internal::new("creating ledger data directory", e)))?;
        let db = sled::open(path.join("sled")).map_err(|e| sled_err("opening sled database", e))?;
        Ok(SledKvEngine { db })
    }

    pub fn with_homedir_folder(folder_name: &str) -> Result<Self, KvError> {
        let dir = dirs::home_dir()
            .ok_or_else(|| KvError::Backend(Internal::new("resolving home directory", std::io::Error::other("no home directory"))))?
            .join(folder_name);
        Self::with_path(dir)
    }

    /// An ephemeral, in-memory database for tests — never persisted to
    /// disk, dropped on close.
    pub fn new_test() -> Result<Self, KvError> {
        let db = sled::Config::new().temporary(true).flush_every_ms(None).open().map_err(|e| sled_err("opening temporary sled database", e))?;
        Ok(SledKvEngine { db })
    }
}

#[async_trait]
impl KvEngine for SledKvEngine {
    async fn bucket(&self, name: &str) -> Result<Arc<dyn KvDatabase>, KvError> {
        let db = self.db.clone();
        let name = name.to_string();
        let tree = task::spawn_blocking(move || db.open_tree(name)).await.map_err(join_err)?.map_err(|e| sled_err("opening bucket", e))?;
        Ok(Arc::new(SledKvDatabase { tree }))
    }
}

struct SledKvDatabase {
    tree: sled::Tree,
}

#[async_trait]
impl KvDatabase for SledKvDatabase {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let tree = self.tree.clone();
        let key = key.to_vec();
        let result = task::spawn_blocking(move || tree.get(key)).await.map_err(join_err)?.map_err(|e| sled_err("reading key", e))?;
        Ok(result.map(|ivec| ivec.to_vec()))
    }

    async fn get_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let tree = self.tree.clone();
        let prefix = prefix.to_vec();
        task::spawn_blocking(move || -> Result<Vec<(Vec<u8>, Vec<u8>)>, sled::Error> {
            tree.scan_prefix(&prefix).map(|item| item.map(|(k, v)| (k.to_vec(), v.to_vec()))).collect()
        })
        .await
        .map_err(join_err)?
        .map_err(|e| sled_err("scanning prefix", e))
    }

    fn start_batch(&self) -> Box<dyn KvBatch> { Box::new(SledKvBatch { tree: self.tree.clone(), batch: sled::Batch::default(), prefix_deletes: Vec::new() }) }
}

struct SledKvBatch {
    tree: sled::Tree,
    batch: sled::Batch,
    /// Sled batches can't express "delete everything under this prefix"
    /// directly; we resolve these against a live scan at `execute` time,
    /// immediately before folding them into the same atomic batch.
    prefix_deletes: Vec<Vec<u8>>,
}

#[async_trait]
impl KvBatch for SledKvBatch {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) { self.batch.insert(key, value); }
    fn delete(&mut self, key: Vec<u8>) { self.batch.remove(key); }
    fn delete_by_prefix(&mut self, prefix: Vec<u8>) { self.prefix_deletes.push(prefix); }

    async fn execute(self: Box<Self>) -> Result<(), KvError> {
        let SledKvBatch { tree, mut batch, prefix_deletes } = *self;
        task::spawn_blocking(move || -> Result<(), sled::Error> {
            for prefix in &prefix_deletes {
                for item in tree.scan_prefix(prefix) {
                    let (key, _) = item?;
                    batch.remove(key);
                }
            }
            tree.apply_batch(batch)
        })
        .await
        .map_err(join_err)?
        .map_err(|e| sled_err("applying batch", e))
    }
}
