//! The key-value database contract (spec.md §4.2). `ledger-core` depends
//! only on this trait; `ledger-storage-sled` is the concrete backend.
//!
//! Keys are opaque bytes. Lexicographic order is relied on to colocate
//! related rows under shared prefixes per the schema in spec.md §6:
//! `O/`, `C/`, `H/`, `S/`, `DW/`, `UW/`, `META/`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::KvError;

/// Opens or creates a named, independently-keyed bucket within the
/// underlying store — one per page, so that one page's rows never collide
/// with another's despite sharing the flat schema in spec.md §6.
#[async_trait]
pub trait KvEngine: Send + Sync {
    async fn bucket(&self, name: &str) -> Result<Arc<dyn KvDatabase>, KvError>;
}

/// An ordered, transactional bytewise store.
#[async_trait]
pub trait KvDatabase: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    async fn has(&self, key: &[u8]) -> Result<bool, KvError> { Ok(self.get(key).await?.is_some()) }

    /// All rows whose key starts with `prefix`, in key order. Used for
    /// enumerating heads (`H/`), unsynced commits (`S/`), and the startup
    /// scan in spec.md §4.8.
    async fn get_with_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Open a new batch. A batch that is dropped without `execute` is a
    /// no-op (spec.md §4.2).
    fn start_batch(&self) -> Box<dyn KvBatch>;
}

/// A set of writes applied atomically by [`KvBatch::execute`].
#[async_trait]
pub trait KvBatch: Send {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: Vec<u8>);
    fn delete_by_prefix(&mut self, prefix: Vec<u8>);

    /// Apply every buffered write atomically. Consumes the batch so it
    /// cannot be executed twice.
    async fn execute(self: Box<Self>) -> Result<(), KvError>;
}

pub mod keys {
    //! Row-prefix schema (spec.md §6).

    pub const OBJECT: &[u8] = b"O/";
    pub const COMMIT: &[u8] = b"C/";
    pub const HEAD: &[u8] = b"H/";
    pub const SYNC_STATE: &[u8] = b"S/";
    pub const DOWNLOAD_WATERMARK: &[u8] = b"DW/";
    pub const UPLOAD_WATERMARK: &[u8] = b"UW/";
    pub const FINGERPRINT: &[u8] = b"META/fingerprint";

    pub fn object_key(id: &ledger_proto::ObjectId) -> Vec<u8> { concat(OBJECT, id.as_bytes()) }
    pub fn commit_key(id: &ledger_proto::CommitId) -> Vec<u8> { concat(COMMIT, id.as_bytes()) }
    pub fn head_key(id: &ledger_proto::CommitId) -> Vec<u8> { concat(HEAD, id.as_bytes()) }
    pub fn sync_state_key(id: &ledger_proto::CommitId) -> Vec<u8> { concat(SYNC_STATE, id.as_bytes()) }
    pub fn download_watermark_key(page: &ledger_proto::PageId) -> Vec<u8> { concat(DOWNLOAD_WATERMARK, &page.to_bytes()) }
    pub fn upload_watermark_key(page: &ledger_proto::PageId) -> Vec<u8> { concat(UPLOAD_WATERMARK, &page.to_bytes()) }

    fn concat(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(prefix.len() + suffix.len());
        out.extend_from_slice(prefix);
        out.extend_from_slice(suffix);
        out
    }
}
