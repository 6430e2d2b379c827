//! Wire types shared by every Ledger crate: content-addressed identifiers,
//! the commit binary encoding, and the document-service value encoding.
//!
//! This crate has no I/O and no async — it is pure data and pure functions,
//! so it can be depended on by the storage backend, the sync engine, and
//! the public API crate without pulling any of their concerns along.

pub mod encoding;
pub mod error;
pub mod ids;

pub use encoding::{decode_document_value, encode_document_value, CommitRecord, DocumentEncoding};
pub use error::DecodeError;
pub use ids::{CommitId, Digest, Fingerprint, ObjectId, PageId, Priority};
