//! The page B-tree (spec.md §4.4): an immutable, copy-on-write, balanced
//! tree mapping user keys to `(value object id, priority)` pairs. Nodes are
//! themselves objects in the [`ObjectStore`], so two trees that agree on a
//! subtree automatically share storage for it — content addressing means
//! an unchanged subtree re-encodes to the exact bytes it had before, hence
//! the same [`ObjectId`], hence the object store's at-most-once-write drops
//! the duplicate. See `DESIGN.md` for why `apply` is implemented as a
//! bottom-up rebuild from the merged, sorted entry set rather than
//! classic in-place node splitting: it gets the content-addressed sharing
//! invariant "for free" and is far simpler to get right, at the cost of
//! doing O(n) work per `apply` instead of O(log n).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;

use ledger_proto::{ObjectId, Priority};
use serde::{Deserialize, Serialize};

use crate::error::BTreeError;
use crate::objectstore::{BytesSource, ObjectStore};

/// Target number of entries per leaf node. Spec.md says "branching factor
/// chosen so average node size is ~4 KiB"; we approximate that with a flat
/// entry-count bound rather than measuring encoded size, since keys here
/// are typically short.
pub const LEAF_FANOUT: usize = 64;
pub const INTERNAL_FANOUT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: ObjectId,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// 0 at leaves, increasing toward the root.
    pub level: u8,
    /// Strictly ordered by `key` (spec.md invariant 6).
    pub entries: Vec<Entry>,
    /// Empty at leaves; `entries.len() + 1` at internal nodes.
    pub children: Vec<ObjectId>,
}

impl Node {
    pub fn is_leaf(&self) -> bool { self.level == 0 }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.level);
        ledger_proto::encoding::write_varint(&mut out, self.entries.len() as u64);
        for entry in &self.entries {
            ledger_proto::encoding::write_varint(&mut out, entry.key.len() as u64);
            out.extend_from_slice(&entry.key);
            out.extend_from_slice(entry.value.as_bytes());
            out.push(entry.priority.to_byte());
        }
        if !self.is_leaf() {
            for child in &self.children {
                out.extend_from_slice(child.as_bytes());
            }
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ledger_proto::DecodeError> {
        use ledger_proto::DecodeError;
        let level = *buf.first().ok_or(DecodeError::Truncated)?;
        let mut pos = 1usize;
        let count = ledger_proto::encoding::read_varint(buf, &mut pos)? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key_len = ledger_proto::encoding::read_varint(buf, &mut pos)? as usize;
            let key = buf.get(pos..pos + key_len).ok_or(DecodeError::Truncated)?.to_vec();
            pos += key_len;
            let id_bytes = buf.get(pos..pos + 32).ok_or(DecodeError::Truncated)?;
            pos += 32;
            let value = ObjectId::from_bytes(id_bytes.try_into().expect("checked length"));
            let priority = Priority::from_byte(*buf.get(pos).ok_or(DecodeError::Truncated)?)?;
            pos += 1;
            entries.push(Entry { key, value, priority });
        }
        let mut children = Vec::new();
        if level != 0 {
            let child_count = count + 1;
            for _ in 0..child_count {
                let bytes = buf.get(pos..pos + 32).ok_or(DecodeError::Truncated)?;
                pos += 32;
                children.push(ObjectId::from_bytes(bytes.try_into().expect("checked length")));
            }
        }
        if pos != buf.len() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Node { level, entries, children })
    }
}

async fn load_node(store: &ObjectStore, id: ObjectId) -> Result<Node, BTreeError> {
    let bytes = store.read_to_end(id).await?;
    Ok(Node::decode(&bytes)?)
}

async fn store_node(store: &ObjectStore, node: &Node) -> Result<ObjectId, BTreeError> {
    Ok(store.add_from_source(BytesSource::new(node.encode())).await?)
}

/// An empty tree's root: a leaf node with no entries. Every page starts
/// here.
pub async fn empty_root(store: &ObjectStore) -> Result<ObjectId, BTreeError> {
    store_node(store, &Node { level: 0, entries: Vec::new(), children: Vec::new() }).await
}

/// A single edit against the tree. `edits` passed to [`apply`] is an
/// ordered sequence; duplicate keys resolve last-write-wins (spec.md
/// Testable Property 4).
#[derive(Debug, Clone)]
pub enum EditOp {
    Put(ObjectId, Priority),
    Delete,
}

fn child_index_for_key(entries: &[Entry], key: &[u8]) -> usize { entries.partition_point(|e| e.key.as_slice() <= key) }

pub async fn lookup(store: &ObjectStore, root: ObjectId, key: &[u8]) -> Result<Option<(ObjectId, Priority)>, BTreeError> {
    let mut current = root;
    loop {
        let node = load_node(store, current).await?;
        if node.is_leaf() {
            return Ok(match node.entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
                Ok(i) => Some((node.entries[i].value, node.entries[i].priority)),
                Err(_) => None,
            });
        }
        let idx = child_index_for_key(&node.entries, key);
        current = *node.children.get(idx).ok_or_else(|| BTreeError::CorruptNode("internal node missing child".into()))?;
    }
}

/// In-order traversal of every `(key, value, priority)` in the tree,
/// starting at `from_key` (inclusive) if given.
pub async fn iterate(store: &ObjectStore, root: ObjectId, from_key: Option<&[u8]>) -> Result<Vec<Entry>, BTreeError> {
    let mut out = Vec::new();
    flatten_into(store, root, &mut out).await?;
    if let Some(from_key) = from_key {
        out.retain(|e| e.key.as_slice() >= from_key);
    }
    Ok(out)
}

fn flatten_into<'a>(
    store: &'a ObjectStore,
    root: ObjectId,
    out: &'a mut Vec<Entry>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), BTreeError>> + 'a>> {
    Box::pin(async move {
        let node = load_node(store, root).await?;
        if node.is_leaf() {
            out.extend(node.entries.into_iter());
        } else {
            for child in node.children {
                flatten_into(store, child, out).await?;
            }
        }
        Ok(())
    })
}

/// Apply `edits` to `root`, returning the new root. Unaffected subtrees
/// re-encode to identical bytes and are therefore not rewritten in the
/// object store (see module docs).
pub async fn apply(store: &ObjectStore, root: ObjectId, edits: &[(Vec<u8>, EditOp)]) -> Result<ObjectId, BTreeError> {
    let existing = iterate(store, root, None).await?;
    let mut merged: BTreeMap<Vec<u8>, Option<(ObjectId, Priority)>> =
        existing.into_iter().map(|e| (e.key, Some((e.value, e.priority)))).collect();
    for (key, op) in edits {
        match op {
            EditOp::Put(id, priority) => {
                merged.insert(key.clone(), Some((*id, *priority)));
            }
            EditOp::Delete => {
                merged.insert(key.clone(), None);
            }
        }
    }
    let final_entries: Vec<Entry> =
        merged.into_iter().filter_map(|(key, v)| v.map(|(value, priority)| Entry { key, value, priority })).collect();
    build_tree(store, final_entries).await
}

async fn build_tree(store: &ObjectStore, entries: Vec<Entry>) -> Result<ObjectId, BTreeError> {
    if entries.is_empty() {
        return empty_root(store).await;
    }
    let mut level_nodes: Vec<(ObjectId, Vec<u8>)> = Vec::new();
    for chunk in entries.chunks(LEAF_FANOUT) {
        let node = Node { level: 0, entries: chunk.to_vec(), children: Vec::new() };
        let first_key = chunk[0].key.clone();
        let id = store_node(store, &node).await?;
        level_nodes.push((id, first_key));
    }
    let mut level: u8 = 1;
    while level_nodes.len() > 1 {
        let mut next_level = Vec::with_capacity(level_nodes.len() / INTERNAL_FANOUT + 1);
        for chunk in level_nodes.chunks(INTERNAL_FANOUT) {
            let children: Vec<ObjectId> = chunk.iter().map(|(id, _)| *id).collect();
            let node_entries: Vec<Entry> = chunk[1..]
                .iter()
                .map(|(_, first_key)| Entry { key: first_key.clone(), value: ObjectId::of(first_key), priority: Priority::Eager })
                .collect();
            let first_key = chunk[0].1.clone();
            let node = Node { level, entries: node_entries, children };
            let id = store_node(store, &node).await?;
            next_level.push((id, first_key));
        }
        level_nodes = next_level;
        level = level.saturating_add(1);
    }
    Ok(level_nodes[0].0)
}

/// Which side(s) a key's state differs on between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSide {
    OnlyA,
    OnlyB,
    BothDiffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub key: Vec<u8>,
    pub side: DiffSide,
    pub a: Option<(ObjectId, Priority)>,
    pub b: Option<(ObjectId, Priority)>,
}

/// A two-way diff: every key whose state differs between `root_a` and
/// `root_b`, in key order. Identical trees (by id — shared-subtree pruning
/// at the root) produce no work at all (spec.md Testable Property 5).
///
/// Descends both trees together, skipping a subtree entirely whenever
/// both sides reference the same node id (spec.md §4.4 shared-subtree
/// pruning), and recursing child-by-child whenever two internal nodes
/// share the same separator keys so their children line up position for
/// position. When the two sides' shapes diverge (different height, or a
/// fanout split landed differently) the mismatched subtrees are flattened
/// and merged directly — always correct, just without pruning for that
/// pair.
pub async fn diff(store: &ObjectStore, root_a: ObjectId, root_b: ObjectId) -> Result<Vec<DiffEntry>, BTreeError> {
    let mut out = Vec::new();
    diff_into(store, root_a, root_b, &mut out).await?;
    Ok(out)
}

fn diff_into<'a>(
    store: &'a ObjectStore,
    root_a: ObjectId,
    root_b: ObjectId,
    out: &'a mut Vec<DiffEntry>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), BTreeError>> + 'a>> {
    Box::pin(async move {
        if root_a == root_b {
            return Ok(());
        }
        let node_a = load_node(store, root_a).await?;
        let node_b = load_node(store, root_b).await?;

        if node_a.is_leaf() && node_b.is_leaf() {
            diff_entries(&node_a.entries, &node_b.entries, out);
            return Ok(());
        }

        if !node_a.is_leaf() && !node_b.is_leaf() && node_a.entries == node_b.entries {
            for (child_a, child_b) in node_a.children.iter().zip(node_b.children.iter()) {
                diff_into(store, *child_a, *child_b, out).await?;
            }
            return Ok(());
        }

        let entries_a = iterate(store, root_a, None).await?;
        let entries_b = iterate(store, root_b, None).await?;
        diff_entries(&entries_a, &entries_b, out);
        Ok(())
    })
}

fn diff_entries(a: &[Entry], b: &[Entry], out: &mut Vec<DiffEntry>) {
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        match (a.get(i), b.get(j)) {
            (Some(ea), Some(eb)) => match ea.key.cmp(&eb.key) {
                CmpOrdering::Less => {
                    out.push(DiffEntry { key: ea.key.clone(), side: DiffSide::OnlyA, a: Some((ea.value, ea.priority)), b: None });
                    i += 1;
                }
                CmpOrdering::Greater => {
                    out.push(DiffEntry { key: eb.key.clone(), side: DiffSide::OnlyB, a: None, b: Some((eb.value, eb.priority)) });
                    j += 1;
                }
                CmpOrdering::Equal => {
                    if ea.value != eb.value || ea.priority != eb.priority {
                        out.push(DiffEntry {
                            key: ea.key.clone(),
                            side: DiffSide::BothDiffer,
                            a: Some((ea.value, ea.priority)),
                            b: Some((eb.value, eb.priority)),
                        });
                    }
                    i += 1;
                    j += 1;
                }
            },
            (Some(ea), None) => {
                out.push(DiffEntry { key: ea.key.clone(), side: DiffSide::OnlyA, a: Some((ea.value, ea.priority)), b: None });
                i += 1;
            }
            (None, Some(eb)) => {
                out.push(DiffEntry { key: eb.key.clone(), side: DiffSide::OnlyB, a: None, b: Some((eb.value, eb.priority)) });
                j += 1;
            }
            (None, None) => unreachable!(),
        }
    }
}

/// Every object id a tree transitively references: its own nodes (internal
/// and leaf) plus every leaf entry's value. Used by the sync engine to
/// compute the upload closure for a commit (spec.md §4.8 "objects").
pub async fn collect_object_ids(store: &ObjectStore, root: ObjectId) -> Result<Vec<ObjectId>, BTreeError> {
    let mut out = Vec::new();
    collect_into(store, root, &mut out).await?;
    Ok(out)
}

fn collect_into<'a>(
    store: &'a ObjectStore,
    root: ObjectId,
    out: &'a mut Vec<ObjectId>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), BTreeError>> + 'a>> {
    Box::pin(async move {
        out.push(root);
        let node = load_node(store, root).await?;
        if node.is_leaf() {
            out.extend(node.entries.iter().map(|e| e.value));
        } else {
            for child in node.children.clone() {
                collect_into(store, child, out).await?;
            }
        }
        Ok(())
    })
}
