use thiserror::Error;

/// Errors raised while decoding bytes received from storage or the network
/// back into typed wire values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    #[error("bad magic number")]
    BadMagic,

    #[error("unsupported encoding version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed varint")]
    MalformedVarint,

    #[error("truncated encoding")]
    Truncated,

    #[error("trailing bytes after decoding")]
    TrailingBytes,

    #[error("invalid priority tag {0}")]
    InvalidPriority(u8),

    #[error("commit must have at most 2 parents, got {0}")]
    InvalidParentCount(usize),
}
