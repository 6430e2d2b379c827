//! Binary encodings shared by the object store, the page B-tree, and the
//! commit DAG. Kept free of any storage or I/O concerns — pure bytes in,
//! typed values out.

use base64::{engine::general_purpose, Engine as _};

use crate::error::DecodeError;
use crate::ids::{CommitId, ObjectId};

/// Write an unsigned LEB128 varint.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

/// Read an unsigned LEB128 varint, advancing `pos`.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*pos).ok_or(DecodeError::Truncated)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::MalformedVarint);
        }
    }
}

const COMMIT_MAGIC: [u8; 4] = *b"LCMT";
const COMMIT_VERSION: u8 = 1;

/// The on-disk/wire encoding of a commit record (spec.md §4.5). The
/// commit's id is `ObjectId::of(&encoded_bytes)` reinterpreted as a
/// `CommitId` — see [`CommitRecord::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub root_tree: ObjectId,
    /// 0 parents for a page's genesis commit, otherwise 1 or 2, always
    /// stored in sorted (canonical) order so that two independently-
    /// constructed records of the same logical commit encode identically
    /// (spec.md §4.5, §9 "fix deterministically").
    pub parents: Vec<CommitId>,
    /// Microseconds since the Unix epoch. Server-assigned when synced,
    /// local clock otherwise (spec.md §3).
    pub timestamp_micros: u64,
    /// `max(parents.generation) + 1`; 0 for the root commit of a page.
    pub generation: u64,
}

impl CommitRecord {
    pub fn new_root(root_tree: ObjectId, timestamp_micros: u64) -> Self {
        CommitRecord { root_tree, parents: Vec::new(), timestamp_micros, generation: 0 }
    }

    pub fn new_child(root_tree: ObjectId, mut parents: Vec<CommitId>, parent_generations: &[u64], timestamp_micros: u64) -> Self {
        parents.sort();
        let generation = parent_generations.iter().copied().max().map(|g| g + 1).unwrap_or(0);
        CommitRecord { root_tree, parents, timestamp_micros, generation }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&COMMIT_MAGIC);
        out.push(COMMIT_VERSION);
        out.extend_from_slice(self.root_tree.as_bytes());
        write_varint(&mut out, self.parents.len() as u64);
        for parent in &self.parents {
            out.extend_from_slice(parent.as_bytes());
        }
        write_varint(&mut out, self.timestamp_micros);
        write_varint(&mut out, self.generation);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut pos = 0usize;
        let magic = buf.get(0..4).ok_or(DecodeError::Truncated)?;
        if magic != COMMIT_MAGIC {
            return Err(DecodeError::BadMagic);
        }
        pos += 4;
        let version = *buf.get(pos).ok_or(DecodeError::Truncated)?;
        pos += 1;
        if version != COMMIT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let root_tree = read_object_id(buf, &mut pos)?;
        let parent_count = read_varint(buf, &mut pos)? as usize;
        if parent_count > 2 {
            return Err(DecodeError::InvalidParentCount(parent_count));
        }
        let mut parents = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            parents.push(CommitId(read_object_id(buf, &mut pos)?.0));
        }
        let timestamp_micros = read_varint(buf, &mut pos)?;
        let generation = read_varint(buf, &mut pos)?;
        if pos != buf.len() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(CommitRecord { root_tree, parents, timestamp_micros, generation })
    }

    /// The commit's content-addressed identity: the digest of its own
    /// encoding (spec.md §4.5). A root commit (no parents) is still well
    /// defined: `parents` encodes as a zero count, distinguishing it from
    /// any non-root commit.
    pub fn id(&self) -> CommitId { CommitId::of(&self.encode()) }
}

fn read_object_id(buf: &[u8], pos: &mut usize) -> Result<ObjectId, DecodeError> {
    let bytes = buf.get(*pos..*pos + 32).ok_or(DecodeError::Truncated)?;
    *pos += 32;
    let arr: [u8; 32] = bytes.try_into().expect("slice length checked above");
    Ok(ObjectId::from_bytes(arr))
}

/// The document-service value encoding (spec.md §6, §9 Open Question 1).
/// The remote document service is JSON-shaped; arbitrary key/value bytes
/// that would violate its character set are base64url-encoded and tagged
/// with a trailing marker byte so the reader knows which form it received.
/// This is a deliberate stop-gap preserved for bit-compatible
/// interoperation rather than replaced with a structural wrapper, per the
/// resolution of that Open Question in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEncoding {
    /// `V`: the value was safe to carry as-is (valid UTF-8 respecting the
    /// document service's character set).
    Verbatim,
    /// `B`: the value was base64url-encoded before transmission.
    Base64,
}

const TRAILER_VERBATIM: u8 = b'V';
const TRAILER_BASE64: u8 = b'B';

/// Encode `bytes` for the document service: emit it verbatim with a `V`
/// trailer if it is valid UTF-8 free of control characters, otherwise
/// base64url-encode it with a `B` trailer.
pub fn encode_document_value(bytes: &[u8]) -> String {
    if is_safe_verbatim(bytes) {
        let mut s = String::with_capacity(bytes.len() + 1);
        // SAFETY: `is_safe_verbatim` already confirmed valid UTF-8.
        s.push_str(std::str::from_utf8(bytes).expect("checked by is_safe_verbatim"));
        s.push(TRAILER_VERBATIM as char);
        s
    } else {
        let mut s = general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        s.push(TRAILER_BASE64 as char);
        s
    }
}

/// Inverse of [`encode_document_value`].
pub fn decode_document_value(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let mut chars = encoded.chars();
    let trailer = chars.next_back().ok_or(DecodeError::Truncated)?;
    let body = chars.as_str();
    match trailer as u32 {
        t if t == TRAILER_VERBATIM as u32 => Ok(body.as_bytes().to_vec()),
        t if t == TRAILER_BASE64 as u32 => {
            general_purpose::URL_SAFE_NO_PAD.decode(body).map_err(|e| DecodeError::InvalidBase64(e.to_string()))
        }
        _ => Err(DecodeError::BadMagic),
    }
}

fn is_safe_verbatim(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.chars().all(|c| !c.is_control() || c == '\n' || c == '\t'),
        Err(_) => false,
    }
}
