//! Failures from the remote document/blob services and the engines built
//! on top of them. [`SyncError::Transient`] drives [`crate::backoff::Backoff`]
//! retry; [`SyncError::Permanent`] marks a commit unsyncable (spec.md §4.8
//! "upload worker... marks the commit unsyncable and surfaces a sync
//! error").

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote document/blob service unavailable: {0}")]
    Transient(String),

    #[error("remote service rejected the request: {0}")]
    Permanent(String),

    #[error("no document at this path")]
    NotFound,

    #[error(transparent)]
    ObjectStore(#[from] ledger_core::error::ObjectStoreError),

    #[error(transparent)]
    BTree(#[from] ledger_core::error::BTreeError),

    #[error(transparent)]
    Commit(#[from] ledger_core::error::CommitError),

    #[error(transparent)]
    Kv(#[from] ledger_core::error::KvError),

    #[error("malformed commit envelope: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_transient(&self) -> bool { matches!(self, SyncError::Transient(_)) }
}
