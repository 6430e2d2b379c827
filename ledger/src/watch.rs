//! Ordered change-event broadcast for a page (spec.md §6 "registers
//! watchers that receive ordered change events"; spec.md §5 "Commits on a
//! single page are totally ordered ... client observers see them in that
//! order").
//!
//! Grounded on the teacher's subscription surface (`Context::subscribe` in
//! `ankurah/src/lib.rs`: register a callback, receive a stream of changes)
//! but realized with a `tokio::sync::broadcast` channel rather than a
//! predicate-filtered signal graph, since this domain's "subscription" is
//! "every committed diff for this page", not a per-query live view.

use ledger_core::btree::{DiffEntry, DiffSide};
use ledger_proto::CommitId;
use tokio::sync::broadcast;

/// One key's before/after state across a commit, exactly as
/// [`ledger_core::btree::diff`] reports it.
#[derive(Debug, Clone)]
pub struct Change {
    pub key: Vec<u8>,
    pub side: DiffSide,
}

impl From<DiffEntry> for Change {
    fn from(entry: DiffEntry) -> Self { Change { key: entry.key, side: entry.side } }
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub commit: CommitId,
    pub changes: Vec<Change>,
}

/// Default ring buffer size for a page's change broadcast. A slow watcher
/// that falls this far behind starts missing events (spec.md doesn't
/// require an unbounded backlog; `tokio::sync::broadcast::Receiver::recv`
/// surfaces `Lagged` so callers can detect and resubscribe).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub struct WatchSource {
    sender: broadcast::Sender<ChangeEvent>,
}

impl WatchSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        WatchSource { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> { self.sender.subscribe() }

    /// Best-effort publish — no receivers is not an error (spec.md's
    /// watcher registration is optional; most commits have none).
    pub(crate) fn publish(&self, event: ChangeEvent) { let _ = self.sender.send(event); }
}

impl Default for WatchSource {
    fn default() -> Self { Self::new() }
}
