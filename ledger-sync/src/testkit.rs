//! An in-process double for the remote document/blob services, used by
//! `ledger-sync`'s own tests and available to `ledger`'s integration tests
//! behind the `testkit` feature. Grounded on the teacher's
//! `LocalProcessConnection`/`LocalProcessSender`
//! (`core/src/connector/local_process.rs`): wire two peers together with
//! channels instead of a real transport, but keep the same trait surface
//! real code runs against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::document::{BlobService, DocumentService, WatchEvent};
use crate::error::SyncError;

struct Watcher {
    prefix: String,
    sender: mpsc::Sender<WatchEvent>,
}

/// A single-process stand-in for both the document service and the blob
/// service, backed by plain maps behind a mutex. `put`/`patch` assign a
/// monotonically increasing fake server timestamp so tests can exercise
/// batch ordering without depending on wall-clock time.
pub struct InMemoryCloud {
    documents: Mutex<HashMap<String, serde_json::Value>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    watchers: Mutex<Vec<Watcher>>,
    reject: bool,
    clock: AtomicU64,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        InMemoryCloud { documents: Mutex::new(HashMap::new()), blobs: Mutex::new(HashMap::new()), watchers: Mutex::new(Vec::new()), reject: false, clock: AtomicU64::new(1) }
    }

    /// A double that rejects every write with a permanent error, for
    /// exercising the upload worker's unsyncable path.
    pub fn rejecting() -> Self { InMemoryCloud { reject: true, ..InMemoryCloud::new() } }

    fn notify(&self, path: &str, value: &serde_json::Value) {
        let watchers = self.watchers.lock().expect("cloud mutex poisoned");
        for watcher in watchers.iter() {
            if path.starts_with(&watcher.prefix) {
                let _ = watcher.sender.try_send(WatchEvent::Put { path: path.to_string(), value: value.clone() });
            }
        }
    }
}

impl Default for InMemoryCloud {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl DocumentService for InMemoryCloud {
    async fn get(&self, path: &str) -> Result<Option<serde_json::Value>, SyncError> {
        Ok(self.documents.lock().expect("cloud mutex poisoned").get(path).cloned())
    }

    async fn put(&self, path: &str, mut value: serde_json::Value) -> Result<(), SyncError> {
        if self.reject {
            return Err(SyncError::Permanent("test double configured to reject writes".into()));
        }
        if let Some(obj) = value.as_object_mut() {
            let assigned = self.clock.fetch_add(1, Ordering::SeqCst);
            obj.insert("timestamp_micros".to_string(), serde_json::json!(assigned));
        }
        self.documents.lock().expect("cloud mutex poisoned").insert(path.to_string(), value.clone());
        self.notify(path, &value);
        Ok(())
    }

    async fn patch(&self, path: &str, value: serde_json::Value) -> Result<(), SyncError> {
        if self.reject {
            return Err(SyncError::Permanent("test double configured to reject writes".into()));
        }
        let mut documents = self.documents.lock().expect("cloud mutex poisoned");
        let merged = match (documents.get(path).cloned(), value.as_object()) {
            (Some(serde_json::Value::Object(mut existing)), Some(patch)) => {
                for (k, v) in patch {
                    existing.insert(k.clone(), v.clone());
                }
                serde_json::Value::Object(existing)
            }
            _ => value,
        };
        documents.insert(path.to_string(), merged.clone());
        drop(documents);
        self.notify(path, &merged);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        self.documents.lock().expect("cloud mutex poisoned").remove(path);
        let watchers = self.watchers.lock().expect("cloud mutex poisoned");
        for watcher in watchers.iter() {
            if path.starts_with(&watcher.prefix) {
                let _ = watcher.sender.try_send(WatchEvent::Delete { path: path.to_string() });
            }
        }
        Ok(())
    }

    async fn watch(&self, path: &str) -> Result<mpsc::Receiver<WatchEvent>, SyncError> {
        let (tx, rx) = mpsc::channel(100);
        self.watchers.lock().expect("cloud mutex poisoned").push(Watcher { prefix: path.to_string(), sender: tx });
        Ok(rx)
    }
}

#[async_trait]
impl BlobService for InMemoryCloud {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        if self.reject {
            return Err(SyncError::Permanent("test double configured to reject writes".into()));
        }
        // if-none-match semantics: first write wins, repeats are a no-op success.
        self.blobs.lock().expect("cloud mutex poisoned").entry(key.to_string()).or_insert(bytes);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        self.blobs.lock().expect("cloud mutex poisoned").get(key).cloned().ok_or(SyncError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cloud = InMemoryCloud::new();
        cloud.put("a/b", serde_json::json!({"x": 1})).await.unwrap();
        let value = cloud.get("a/b").await.unwrap().unwrap();
        assert_eq!(value["x"], 1);
    }

    #[tokio::test]
    async fn watch_receives_puts_under_its_prefix() {
        let cloud = InMemoryCloud::new();
        let mut rx = cloud.watch("a/").await.unwrap();
        cloud.put("a/b", serde_json::json!({"x": 1})).await.unwrap();
        cloud.put("z/b", serde_json::json!({"x": 2})).await.unwrap();
        let event = rx.recv().await.unwrap();
        match event {
            WatchEvent::Put { path, .. } => assert_eq!(path, "a/b"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "the z/b put should not match the a/ watch");
    }

    #[tokio::test]
    async fn blob_upload_is_idempotent_first_write_wins() {
        let cloud = InMemoryCloud::new();
        cloud.upload("k", b"first".to_vec()).await.unwrap();
        cloud.upload("k", b"second".to_vec()).await.unwrap();
        assert_eq!(cloud.download("k").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn rejecting_double_fails_every_write() {
        let cloud = InMemoryCloud::rejecting();
        assert!(cloud.put("a", serde_json::json!({})).await.is_err());
        assert!(cloud.upload("k", vec![]).await.is_err());
    }
}
