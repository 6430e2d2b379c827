//! Multi-page sync-state aggregation (spec.md §4.8 "sync state reported as
//! (download, upload) ... aggregated across pages via a monotone
//! worst-of merge").
//!
//! Grounded on `cloud_sync/impl/aggregator.{h,cc}`'s `Aggregator`/`Listener`
//! pattern (each page gets a `Listener` that reports into a shared
//! aggregate, recomputed and pushed to a base watcher on every change) and
//! on `sync_state_watcher.cc`'s `SyncStateContainer::Merge`, which takes
//! `max()` per axis. The C++ original wires this with observer objects;
//! here it's expressed with a `tokio::sync::watch` channel, since that's
//! the idiom the teacher reaches for anywhere it needs "latest value,
//! broadcast to whoever's listening" (see `runtime.rs`'s shutdown
//! `Notify`).

use std::collections::HashMap;
use std::sync::Mutex;

use ledger_proto::PageId;
use tokio::sync::watch;

/// Download-side sync state for one page, ordered by severity as spec.md
/// §4.8 lists it: idle < pending < in-progress < error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DownloadState {
    #[default]
    Idle,
    Pending,
    InProgress,
    Error,
}

/// Upload-side sync state for one page (spec.md §4.8's listed order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum UploadState {
    #[default]
    Idle,
    Pending,
    InProgress,
    Error,
    WaitingForRemote,
}

/// A page's (or the whole engine's aggregate) sync state. `merge` is the
/// monotone "worst-of" reduction: each axis independently takes the higher
/// of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncState {
    pub download: DownloadState,
    pub upload: UploadState,
}

impl SyncState {
    pub fn merge(&mut self, other: SyncState) {
        if other.download > self.download {
            self.download = other.download;
        }
        if other.upload > self.upload {
            self.upload = other.upload;
        }
    }
}

/// Combines every page's reported [`SyncState`] into one aggregate,
/// recomputed and pushed to subscribers each time a page reports a change.
pub struct Aggregator {
    states: Mutex<HashMap<PageId, SyncState>>,
    sender: watch::Sender<SyncState>,
}

impl Aggregator {
    pub fn new() -> (Self, watch::Receiver<SyncState>) {
        let (sender, receiver) = watch::channel(SyncState::default());
        (Aggregator { states: Mutex::new(HashMap::new()), sender }, receiver)
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> { self.sender.subscribe() }

    /// A page reports its current state. Recomputes and broadcasts the
    /// aggregate if it changed.
    pub fn report(&self, page: PageId, state: SyncState) {
        let mut states = self.states.lock().expect("aggregator mutex poisoned");
        states.insert(page, state);
        let merged = states.values().fold(SyncState::default(), |mut acc, s| {
            acc.merge(*s);
            acc
        });
        drop(states);
        self.sender.send_if_modified(|current| {
            if *current != merged {
                *current = merged;
                true
            } else {
                false
            }
        });
    }

    /// A page stops syncing (e.g. closed); drop its contribution to the
    /// aggregate.
    pub fn remove_page(&self, page: &PageId) {
        let mut states = self.states.lock().expect("aggregator mutex poisoned");
        states.remove(page);
        let merged = states.values().fold(SyncState::default(), |mut acc, s| {
            acc.merge(*s);
            acc
        });
        drop(states);
        self.sender.send_if_modified(|current| {
            if *current != merged {
                *current = merged;
                true
            } else {
                false
            }
        });
    }

    pub fn current(&self) -> SyncState { *self.sender.borrow() }
}

impl Default for Aggregator {
    fn default() -> Self { Self::new().0 }
}
