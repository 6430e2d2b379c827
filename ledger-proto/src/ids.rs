use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::error::DecodeError;

/// A 32-byte content digest. `ObjectId` and `CommitId` both wrap one — an
/// object's id is the digest of its bytes (spec.md invariant 1); a commit's
/// id is the digest of its own encoding (spec.md §4.5), since a commit is
/// itself an object whose bytes encode a commit record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self { Digest(*blake3::hash(bytes).as_bytes()) }

    pub fn from_bytes(bytes: [u8; 32]) -> Self { Digest(bytes) }

    pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

    pub fn to_base64(&self) -> String { general_purpose::URL_SAFE_NO_PAD.encode(self.0) }

    pub fn from_base64<T: AsRef<[u8]>>(input: T) -> Result<Self, DecodeError> {
        let decoded = general_purpose::URL_SAFE_NO_PAD.decode(input).map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| DecodeError::InvalidLength { expected: 32, got: v.len() })?;
        Ok(Digest(bytes))
    }

    pub fn to_base64_short(&self) -> String {
        let full = self.to_base64();
        full[full.len() - 8..].to_string()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_base64_short()) }
}
impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_base64()) }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: serde::Serializer {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base64())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: serde::Deserializer<'de> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Digest::from_base64(s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; 32]>::deserialize(deserializer)?;
            Ok(Digest(bytes))
        }
    }
}

macro_rules! digest_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Digest);

        impl $name {
            pub fn of(bytes: &[u8]) -> Self { $name(Digest::of(bytes)) }
            pub fn from_bytes(bytes: [u8; 32]) -> Self { $name(Digest::from_bytes(bytes)) }
            pub fn as_bytes(&self) -> &[u8; 32] { self.0.as_bytes() }
            pub fn to_base64(&self) -> String { self.0.to_base64() }
            pub fn from_base64<T: AsRef<[u8]>>(input: T) -> Result<Self, DecodeError> { Ok($name(Digest::from_base64(input)?)) }
            pub fn to_base64_short(&self) -> String { self.0.to_base64_short() }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, concat!(stringify!($name), "({:?})"), self.0) }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }

        impl TryFrom<&str> for $name {
            type Error = DecodeError;
            fn try_from(s: &str) -> Result<Self, Self::Error> { Self::from_base64(s) }
        }
    };
}

digest_id!(ObjectId, "Content address of an object stored in the object store.");
digest_id!(CommitId, "Content address of a commit record (digest of its encoding).");

/// A page's identity. Random at creation time, not content-addressed —
/// pages are mutable containers (heads move), unlike objects and commits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub Ulid);

impl PageId {
    pub fn new() -> Self { PageId(Ulid::new()) }
    pub fn from_bytes(bytes: [u8; 16]) -> Self { PageId(Ulid::from_bytes(bytes)) }
    pub fn to_bytes(&self) -> [u8; 16] { self.0.to_bytes() }
    pub fn to_base64(&self) -> String { general_purpose::URL_SAFE_NO_PAD.encode(self.to_bytes()) }
    pub fn from_base64<T: AsRef<[u8]>>(input: T) -> Result<Self, DecodeError> {
        let decoded = general_purpose::URL_SAFE_NO_PAD.decode(input).map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
        let bytes: [u8; 16] = decoded.try_into().map_err(|v: Vec<u8>| DecodeError::InvalidLength { expected: 16, got: v.len() })?;
        Ok(PageId::from_bytes(bytes))
    }
}

impl Default for PageId {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "PageId({})", self.to_base64()) }
}
impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_base64()) }
}

/// A random, per-device-install 128-bit identifier (spec.md §4.9). Unlike
/// `PageId` this is never sorted or used as a DAG node, so it is not a
/// ULID — just 16 random bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Fingerprint(bytes)
    }

    pub fn to_base64(&self) -> String { general_purpose::URL_SAFE_NO_PAD.encode(self.0) }

    pub fn from_base64<T: AsRef<[u8]>>(input: T) -> Result<Self, DecodeError> {
        let decoded = general_purpose::URL_SAFE_NO_PAD.decode(input).map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
        let bytes: [u8; 16] = decoded.try_into().map_err(|v: Vec<u8>| DecodeError::InvalidLength { expected: 16, got: v.len() })?;
        Ok(Fingerprint(bytes))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Fingerprint({})", self.to_base64()) }
}
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_base64()) }
}

/// Whether a value's object should be fetched proactively during sync
/// (`Eager`) or lazily on first read (`Lazy`). See spec.md §3, §4.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Eager = 0,
    Lazy = 1,
}

impl Priority {
    pub fn to_byte(self) -> u8 {
        match self {
            Priority::Eager => 0,
            Priority::Lazy => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            0 => Ok(Priority::Eager),
            1 => Ok(Priority::Lazy),
            other => Err(DecodeError::InvalidPriority(other)),
        }
    }
}
