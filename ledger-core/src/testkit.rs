//! An in-memory [`KvDatabase`] / [`KvEngine`] used by this crate's own unit
//! tests and exported (behind the `testkit` feature) for downstream crates
//! that need a fast fake KV backend without pulling in `ledger-storage-sled`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::KvError;
use crate::kv::{KvBatch, KvDatabase, KvEngine};

pub struct MemoryKv {
    rows: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl Default for MemoryKv {
    fn default() -> Self { MemoryKv { rows: Arc::new(Mutex::new(BTreeMap::new())) } }
}

impl MemoryKv {
    pub fn new() -> Self { MemoryKv::default() }
}

#[async_trait]
impl KvDatabase for MemoryKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> { Ok(self.rows.lock().unwrap().get(key).cloned()) }

    async fn get_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        Ok(self.rows.lock().unwrap().range(prefix.to_vec()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn start_batch(&self) -> Box<dyn KvBatch> { Box::new(MemoryBatch { target: Some(self.rows.clone()), ops: Vec::new() }) }
}

enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    DeleteByPrefix(Vec<u8>),
}

struct MemoryBatch {
    target: Option<Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>>,
    ops: Vec<Op>,
}

#[async_trait]
impl KvBatch for MemoryBatch {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) { self.ops.push(Op::Put(key, value)); }
    fn delete(&mut self, key: Vec<u8>) { self.ops.push(Op::Delete(key)); }
    fn delete_by_prefix(&mut self, prefix: Vec<u8>) { self.ops.push(Op::DeleteByPrefix(prefix)); }

    async fn execute(self: Box<Self>) -> Result<(), KvError> {
        let Some(target) = self.target else { return Ok(()) };
        let mut rows = target.lock().unwrap();
        for op in self.ops {
            match op {
                Op::Put(k, v) => {
                    rows.insert(k, v);
                }
                Op::Delete(k) => {
                    rows.remove(&k);
                }
                Op::DeleteByPrefix(prefix) => {
                    rows.retain(|k, _| !k.starts_with(&prefix));
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKvEngine {
    buckets: Mutex<std::collections::HashMap<String, Arc<MemoryKv>>>,
}

impl MemoryKvEngine {
    pub fn new() -> Self { MemoryKvEngine::default() }
}

#[async_trait]
impl KvEngine for MemoryKvEngine {
    async fn bucket(&self, name: &str) -> Result<Arc<dyn KvDatabase>, KvError> {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(name.to_string()).or_insert_with(|| Arc::new(MemoryKv::new())).clone();
        Ok(bucket)
    }
}
