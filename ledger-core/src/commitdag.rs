//! The commit DAG (spec.md §4.5): an append-only history of
//! [`CommitRecord`]s per page, plus the set of current heads (an
//! antichain — no head is an ancestor of another) and lowest-common-
//! ancestor search used by the merge resolver.
//!
//! Commits live directly in a page's KV bucket under the `C/` prefix
//! (spec.md §6), not in the object store: unlike B-tree nodes, nothing
//! ever needs to stream a commit's bytes incrementally, so the extra
//! chunking machinery would be pure overhead.

use std::collections::HashMap;
use std::sync::Arc;

use ledger_proto::{CommitId, CommitRecord};

use crate::error::CommitError;
use crate::kv::{keys, KvDatabase};

pub struct CommitDag {
    kv: Arc<dyn KvDatabase>,
}

impl CommitDag {
    pub fn new(kv: Arc<dyn KvDatabase>) -> Self { CommitDag { kv } }

    pub async fn get(&self, id: CommitId) -> Result<CommitRecord, CommitError> {
        let bytes = self.kv.get(&keys::commit_key(&id)).await?.ok_or(CommitError::NotFound(id))?;
        Ok(CommitRecord::decode(&bytes)?)
    }

    pub async fn contains(&self, id: CommitId) -> Result<bool, CommitError> { Ok(self.kv.has(&keys::commit_key(&id)).await?) }

    /// Write `commit` and fold it into the head set: its parents (if
    /// present) stop being heads, and it becomes one. Assumes `commit`'s
    /// parents are themselves already heads, which holds for every commit
    /// produced by the journal or merge resolver (spec.md invariant 7).
    pub async fn add_commit(&self, commit: &CommitRecord) -> Result<CommitId, CommitError> {
        let id = commit.id();
        let mut batch = self.kv.start_batch();
        batch.put(keys::commit_key(&id), commit.encode());
        for parent in &commit.parents {
            batch.delete(keys::head_key(parent));
        }
        batch.put(keys::head_key(&id), Vec::new());
        batch.execute().await?;
        Ok(id)
    }

    /// The current heads, in no particular order.
    pub async fn heads(&self) -> Result<Vec<CommitId>, CommitError> {
        let rows = self.kv.get_with_prefix(keys::HEAD).await?;
        rows.into_iter()
            .map(|(key, _)| {
                let raw = &key[keys::HEAD.len()..];
                let arr: [u8; 32] = raw.try_into().map_err(|_| CommitError::DataIntegrity("malformed head key".into()))?;
                Ok(CommitId::from_bytes(arr))
            })
            .collect()
    }

    /// Every ancestor of `start` (including itself) mapped to its
    /// generation, stopping once more than `max_commits` distinct commits
    /// have been visited (spec.md §5 "bounded history walks").
    async fn ancestor_generations(&self, start: CommitId, max_commits: usize) -> Result<HashMap<CommitId, u64>, CommitError> {
        let mut visited = HashMap::new();
        let mut frontier = vec![start];
        while let Some(id) = frontier.pop() {
            if visited.contains_key(&id) {
                continue;
            }
            if visited.len() >= max_commits {
                return Err(CommitError::BudgetExceeded);
            }
            let commit = self.get(id).await?;
            visited.insert(id, commit.generation);
            frontier.extend(commit.parents.iter().copied());
        }
        Ok(visited)
    }

    /// The lowest common ancestor of `a` and `b`: the shared ancestor with
    /// the highest generation number. Well-defined whenever `a` and `b`
    /// share any ancestor, since generation strictly increases away from
    /// the root (spec.md §4.5).
    pub async fn lowest_common_ancestor(&self, a: CommitId, b: CommitId, max_commits: usize) -> Result<Option<CommitId>, CommitError> {
        if a == b {
            return Ok(Some(a));
        }
        let ancestors_a = self.ancestor_generations(a, max_commits).await?;
        let ancestors_b = self.ancestor_generations(b, max_commits).await?;
        let best = ancestors_a.iter().filter_map(|(id, gen)| ancestors_b.get(id).map(|_| (*gen, *id))).max_by_key(|(gen, _)| *gen);
        Ok(best.map(|(_, id)| id))
    }

    /// Whether `ancestor` is reachable from `descendant` by following
    /// parent links, bounded the same way as [`Self::lowest_common_ancestor`].
    pub async fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId, max_commits: usize) -> Result<bool, CommitError> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.ancestor_generations(descendant, max_commits).await?.contains_key(&ancestor))
    }
}
