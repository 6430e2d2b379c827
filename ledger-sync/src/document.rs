//! The remote service contracts (spec.md §6 "Remote document service",
//! "Remote blob service"). `ledger-sync`'s engines depend only on these two
//! traits, so they run unchanged against the in-process [`crate::testkit`]
//! double in tests and against a real cloud connector in production —
//! mirroring how the teacher's sync code depends only on its own
//! `PeerSender`/connector traits rather than a concrete transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ledger_proto::{CommitId, ObjectId};

use crate::error::SyncError;

/// A commit as it travels over the document service (spec.md §6): `content`
/// is the commit's encoded bytes run through
/// [`ledger_proto::encode_document_value`], `objects` lists every object id
/// the commit's tree transitively references so the downloading peer knows
/// what to fetch. `timestamp_micros` is server-assigned on upload —
/// whatever the uploader puts there is advisory only until the service
/// echoes back its own value on download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEnvelope {
    pub id: CommitId,
    pub content: String,
    pub objects: Vec<ObjectId>,
    pub timestamp_micros: u64,
    pub batch_position: u32,
    pub batch_size: u32,
}

/// One change observed on a watched path.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put { path: String, value: serde_json::Value },
    Delete { path: String },
    /// The watch itself failed (connection dropped, auth revoked, ...);
    /// the receiving engine must re-establish it.
    Error(String),
}

/// The JSON document store a Ledger page syncs commits through (spec.md
/// §6). Paths are `<app>/<page>/commits/<commit-id>`,
/// `<app>/<page>/objects/<object-id>`, and
/// `<user>/__metadata/devices/<fingerprint>`.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<serde_json::Value>, SyncError>;
    async fn put(&self, path: &str, value: serde_json::Value) -> Result<(), SyncError>;
    async fn patch(&self, path: &str, value: serde_json::Value) -> Result<(), SyncError>;
    async fn delete(&self, path: &str) -> Result<(), SyncError>;

    /// Subscribe to changes under `path`. Returns a receiver fed by a
    /// background task owned by the service; dropping the receiver ends the
    /// subscription.
    async fn watch(&self, path: &str) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, SyncError>;
}

/// The content-addressed blob store objects are uploaded to (spec.md §6).
/// `upload` is idempotent: uploading an already-present key under the same
/// content is a no-op success (if-none-match semantics), so the upload
/// worker never needs to check existence first.
#[async_trait]
pub trait BlobService: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<(), SyncError>;
    async fn download(&self, key: &str) -> Result<Vec<u8>, SyncError>;
}

pub fn commit_path(app: &str, page: &str, commit: CommitId) -> String { format!("{app}/{page}/commits/{}", commit.to_base64()) }

pub fn commits_prefix(app: &str, page: &str) -> String { format!("{app}/{page}/commits/") }

pub fn object_key(app: &str, page: &str, object: ObjectId) -> String { format!("{app}/{page}/objects/{}", object.to_base64()) }

pub fn device_path(user: &str, fingerprint: ledger_proto::Fingerprint) -> String { format!("{user}/__metadata/devices/{}", fingerprint.to_base64()) }
