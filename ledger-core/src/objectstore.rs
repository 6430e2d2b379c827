//! Content-addressed object store (spec.md §4.3).
//!
//! Objects are arbitrary byte strings keyed by the digest of their
//! content. Values larger than [`MAX_CHUNK_SIZE`] are split into
//! fixed-size chunks — themselves objects — referenced by an index chunk;
//! the object's id is the digest of that index chunk's encoding. This
//! keeps both ingestion and retrieval memory bounded regardless of value
//! size (spec.md §5 "Resource bounds").

use std::sync::Arc;

use async_trait::async_trait;
use ledger_proto::ObjectId;

use crate::error::ObjectStoreError;
use crate::kv::{keys, KvDatabase};

/// Upper bound on a single chunk's size (spec.md §5: "≤64 KiB").
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// A lazy source of bytes, read in chunks so the object store never needs
/// the whole value resident at once (spec.md §4.3 "lazy chunked data
/// source").
#[async_trait]
pub trait DataSource: Send {
    /// Returns the next chunk, or `None` once exhausted. Chunks may be any
    /// non-zero size up to [`MAX_CHUNK_SIZE`]; the object store re-chunks
    /// internally if a source yields larger pieces.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ObjectStoreError>;
}

/// A [`DataSource`] over an in-memory buffer, re-chunked to
/// `MAX_CHUNK_SIZE`. Covers the common case of writing a value that's
/// already fully materialized in the caller's process.
pub struct BytesSource {
    buf: Vec<u8>,
    offset: usize,
}

impl BytesSource {
    pub fn new(buf: Vec<u8>) -> Self { BytesSource { buf, offset: 0 } }
}

#[async_trait]
impl DataSource for BytesSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        if self.offset >= self.buf.len() {
            return Ok(None);
        }
        let end = (self.offset + MAX_CHUNK_SIZE).min(self.buf.len());
        let chunk = self.buf[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }
}

const INDEX_MAGIC: [u8; 4] = *b"LIDX";

/// How an object's bytes are laid out on disk.
enum Layout {
    /// The value fit in a single chunk; stored verbatim under its own id.
    Raw,
    /// The value was split; `chunks` are the child object ids in order and
    /// `total_len` is the sum of their lengths.
    Chunked { chunks: Vec<ObjectId>, total_len: u64 },
}

fn encode_index(chunks: &[ObjectId], total_len: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 1 + 8 + chunks.len() * 32);
    out.extend_from_slice(&INDEX_MAGIC);
    ledger_proto::encoding::write_varint(&mut out, total_len);
    ledger_proto::encoding::write_varint(&mut out, chunks.len() as u64);
    for id in chunks {
        out.extend_from_slice(id.as_bytes());
    }
    out
}

fn decode_index(buf: &[u8]) -> Result<(Vec<ObjectId>, u64), ledger_proto::DecodeError> {
    use ledger_proto::DecodeError;
    let magic = buf.get(0..4).ok_or(DecodeError::Truncated)?;
    if magic != INDEX_MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let mut pos = 4;
    let total_len = ledger_proto::encoding::read_varint(buf, &mut pos)?;
    let count = ledger_proto::encoding::read_varint(buf, &mut pos)? as usize;
    let mut chunks = Vec::with_capacity(count);
    for _ in 0..count {
        let bytes = buf.get(pos..pos + 32).ok_or(DecodeError::Truncated)?;
        pos += 32;
        let arr: [u8; 32] = bytes.try_into().expect("checked length");
        chunks.push(ObjectId::from_bytes(arr));
    }
    if pos != buf.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok((chunks, total_len))
}

/// The object store for one page. Backed by that page's KV bucket.
pub struct ObjectStore {
    kv: Arc<dyn KvDatabase>,
}

impl ObjectStore {
    pub fn new(kv: Arc<dyn KvDatabase>) -> Self { ObjectStore { kv } }

    /// Drain `source`, storing chunks (and an index chunk if more than
    /// one) as new objects. Always succeeds in producing *some* id — the
    /// digest of whatever was actually written — there is no expected id
    /// to validate against, unlike [`ObjectStore::put_verified`].
    pub async fn add_from_source(&self, source: impl DataSource) -> Result<ObjectId, ObjectStoreError> {
        let ingest = self.ingest(source).await?;
        self.commit(&ingest).await?;
        Ok(ingest.id)
    }

    /// Drain `source` and only persist it if its content digests to
    /// `declared`. Used when ingesting objects whose id was asserted by a
    /// remote peer (spec.md §4.3 "mismatched source is rejected").
    pub async fn put_verified(&self, declared: ObjectId, source: impl DataSource) -> Result<(), ObjectStoreError> {
        let ingest = self.ingest(source).await?;
        if ingest.id != declared {
            return Err(ObjectStoreError::DataIntegrity { declared, computed: ingest.id });
        }
        self.commit(&ingest).await
    }

    pub async fn contains(&self, id: ObjectId) -> Result<bool, ObjectStoreError> {
        Ok(self.kv.has(&keys::object_key(&id)).await?)
    }

    /// Open a streaming reader over a stored object. Errors with
    /// `NotFound` if the top-level id is absent.
    pub async fn get_object(&self, id: ObjectId) -> Result<ObjectReader, ObjectStoreError> {
        let bytes = self.kv.get(&keys::object_key(&id)).await?.ok_or(ObjectStoreError::NotFound(id))?;
        match decode_index(&bytes) {
            Ok((chunks, total_len)) => Ok(ObjectReader { kv: self.kv.clone(), remaining: chunks.into(), total_len, position: 0 }),
            Err(_) => {
                // Not an index — it's the raw value itself (a single chunk).
                let total_len = bytes.len() as u64;
                Ok(ObjectReader { kv: self.kv.clone(), remaining: std::collections::VecDeque::from([id]), total_len, position: 0 })
            }
        }
    }

    /// Convenience for small objects: materialize the whole value.
    pub async fn read_to_end(&self, id: ObjectId) -> Result<Vec<u8>, ObjectStoreError> {
        let mut reader = self.get_object(id).await?;
        let mut out = Vec::with_capacity(reader.total_len as usize);
        while let Some(chunk) = reader.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    async fn ingest(&self, mut source: impl DataSource) -> Result<Ingested, ObjectStoreError> {
        let mut chunks = Vec::new();
        let mut total_len = 0u64;
        while let Some(chunk) = source.next_chunk().await? {
            if chunk.is_empty() {
                continue;
            }
            // A source may hand us oversized chunks; re-split defensively
            // so the on-disk bound always holds.
            for piece in chunk.chunks(MAX_CHUNK_SIZE) {
                total_len += piece.len() as u64;
                let id = ObjectId::of(piece);
                chunks.push((id, piece.to_vec()));
            }
        }
        if chunks.len() <= 1 {
            let (id, bytes) = chunks.into_iter().next().unwrap_or_else(|| (ObjectId::of(b""), Vec::new()));
            Ok(Ingested { id, layout: Layout::Raw, raw: bytes, chunk_bodies: Vec::new() })
        } else {
            let ids: Vec<ObjectId> = chunks.iter().map(|(id, _)| *id).collect();
            let index_bytes = encode_index(&ids, total_len);
            let index_id = ObjectId::of(&index_bytes);
            Ok(Ingested { id: index_id, layout: Layout::Chunked { chunks: ids, total_len }, raw: index_bytes, chunk_bodies: chunks })
        }
    }

    async fn commit(&self, ingested: &Ingested) -> Result<(), ObjectStoreError> {
        let mut batch = self.kv.start_batch();
        match &ingested.layout {
            Layout::Raw => {
                if !self.kv.has(&keys::object_key(&ingested.id)).await? {
                    batch.put(keys::object_key(&ingested.id), ingested.raw.clone());
                }
            }
            Layout::Chunked { .. } => {
                for (chunk_id, bytes) in &ingested.chunk_bodies {
                    if !self.kv.has(&keys::object_key(chunk_id)).await? {
                        batch.put(keys::object_key(chunk_id), bytes.clone());
                    }
                }
                if !self.kv.has(&keys::object_key(&ingested.id)).await? {
                    batch.put(keys::object_key(&ingested.id), ingested.raw.clone());
                }
            }
        }
        batch.execute().await?;
        Ok(())
    }
}

struct Ingested {
    id: ObjectId,
    layout: Layout,
    /// The bytes stored under `id` itself (the raw value, or the index).
    raw: Vec<u8>,
    /// Only populated for `Layout::Chunked`: the child chunk bodies.
    chunk_bodies: Vec<(ObjectId, Vec<u8>)>,
}

/// Streams an object's bytes one chunk at a time.
pub struct ObjectReader {
    kv: Arc<dyn KvDatabase>,
    remaining: std::collections::VecDeque<ObjectId>,
    total_len: u64,
    position: u64,
}

impl ObjectReader {
    pub fn total_len(&self) -> u64 { self.total_len }

    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let Some(chunk_id) = self.remaining.pop_front() else {
            return Ok(None);
        };
        let bytes = self.kv.get(&keys::object_key(&chunk_id)).await?.ok_or(ObjectStoreError::NotFound(chunk_id))?;
        self.position += bytes.len() as u64;
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MemoryKv;

    fn store() -> ObjectStore { ObjectStore::new(Arc::new(MemoryKv::new())) }

    #[tokio::test]
    async fn small_value_round_trips() {
        let store = store();
        let id = store.add_from_source(BytesSource::new(b"hello ledger".to_vec())).await.unwrap();
        assert!(store.contains(id).await.unwrap());
        let bytes = store.read_to_end(id).await.unwrap();
        assert_eq!(bytes, b"hello ledger");
    }

    #[tokio::test]
    async fn large_value_is_chunked_and_round_trips() {
        let store = store();
        let payload: Vec<u8> = (0..MAX_CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let id = store.add_from_source(BytesSource::new(payload.clone())).await.unwrap();
        let round_tripped = store.read_to_end(id).await.unwrap();
        assert_eq!(round_tripped, payload);
    }

    #[tokio::test]
    async fn duplicate_writes_are_idempotent() {
        let store = store();
        let id1 = store.add_from_source(BytesSource::new(b"same bytes".to_vec())).await.unwrap();
        let id2 = store.add_from_source(BytesSource::new(b"same bytes".to_vec())).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn get_object_missing_is_not_found() {
        let store = store();
        let bogus = ObjectId::of(b"never written");
        assert!(matches!(store.get_object(bogus).await, Err(ObjectStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn put_verified_rejects_digest_mismatch() {
        let store = store();
        let declared = ObjectId::of(b"what the sender claimed");
        let err = store.put_verified(declared, BytesSource::new(b"what actually arrived".to_vec())).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::DataIntegrity { .. }));
        // No row written under the declared id.
        assert!(!store.contains(declared).await.unwrap());
    }

    #[tokio::test]
    async fn put_verified_accepts_matching_digest() {
        let store = store();
        let bytes = b"matching payload".to_vec();
        let declared = ObjectId::of(&bytes);
        store.put_verified(declared, BytesSource::new(bytes.clone())).await.unwrap();
        assert_eq!(store.read_to_end(declared).await.unwrap(), bytes);
    }
}
