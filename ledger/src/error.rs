//! Facade-level error type. Per `SPEC_FULL.md` §2, `anyhow` is used at this
//! outer edge to glue the typed subsystem errors together without forcing
//! one giant enum — the teacher does the same at its `core`/connector
//! boundary rather than in the storage engine itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Page(#[from] ledger_core::PageError),
    #[error(transparent)]
    Kv(#[from] ledger_core::error::KvError),
    #[error(transparent)]
    Journal(#[from] ledger_core::error::JournalError),
    #[error(transparent)]
    Sync(#[from] ledger_sync::SyncError),
    #[error(transparent)]
    ObjectStore(#[from] ledger_core::error::ObjectStoreError),
    #[error(transparent)]
    BTree(#[from] ledger_core::error::BTreeError),
    #[error(transparent)]
    Commit(#[from] ledger_core::error::CommitError),
    #[error("no such page is open")]
    PageNotOpen,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
