//! Error types for the page storage engine.
//!
//! One `thiserror` enum per subsystem, matching the error kinds named in
//! spec.md §7. A single internal `Internal` variant on each enum carries
//! errors that originate below the subsystem boundary (e.g. a KV backend
//! failure surfacing through the object store) without forcing every crate
//! in the workspace onto one flat error type.

use std::fmt;

use ledger_proto::DecodeError;

/// A boxed lower-level error plus the context under which it was wrapped.
/// Playing the role the teacher's `error_stack::Report` plays, scaled down
/// to a single hop since none of our subsystems re-wrap more than once.
pub struct Internal {
    context: &'static str,
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl Internal {
    pub fn new(context: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Internal { context, source: Box::new(source) }
    }
}

impl fmt::Debug for Internal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}: {}", self.context, self.source) }
}
impl fmt::Display for Internal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}: {}", self.context, self.source) }
}
impl std::error::Error for Internal {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(self.source.as_ref()) }
}

/// Failures from the KV-database contract (spec.md §4.2). This is the
/// error type every `KvDatabase` / `KvBatch` implementation returns;
/// concrete backends (e.g. `ledger-storage-sled`) wrap their own error type
/// in `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("underlying key-value store failure")]
    Backend(#[from] Internal),
}

/// Failures from the object store (spec.md §4.3, §7).
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(ledger_proto::ObjectId),

    #[error("data integrity error: declared id {declared} does not match computed digest {computed}")]
    DataIntegrity { declared: ledger_proto::ObjectId, computed: ledger_proto::ObjectId },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("cancelled")]
    Cancelled,
}

/// Failures from B-tree operations (spec.md §4.4).
#[derive(Debug, thiserror::Error)]
pub enum BTreeError {
    #[error("node not found: {0}")]
    NodeNotFound(ledger_proto::ObjectId),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error("corrupt node: {0}")]
    CorruptNode(String),
}

/// Failures from commit DAG operations (spec.md §4.5).
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("commit not found: {0}")]
    NotFound(ledger_proto::CommitId),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("lowest common ancestor search exceeded its generation budget")]
    BudgetExceeded,
}

/// Failures from the journal / mutation builder (spec.md §4.6).
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal already closed")]
    Closed,

    #[error("no nested transaction is open")]
    NoNestedTransaction,

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    BTree(#[from] BTreeError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error("cancelled")]
    Cancelled,
}

/// Whether a page is safe to keep using. Set to `Unhealthy` the moment a
/// data-integrity error surfaces anywhere in the page's storage stack
/// (spec.md §7); there is deliberately no automatic recovery path back to
/// `Healthy` — that requires operator intervention (re-sync from the
/// cloud, or discarding the page), matching the original's behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageHealth {
    Healthy,
    Unhealthy { reason: String },
}

impl PageHealth {
    pub fn is_healthy(&self) -> bool { matches!(self, PageHealth::Healthy) }
}

/// Failures from the merge resolver (spec.md §4.7).
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(transparent)]
    BTree(#[from] BTreeError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("lowest common ancestor search exceeded its generation budget")]
    BudgetExceeded,
}
