//! Cooperative "coroutine" runtime (spec.md §4.1).
//!
//! Storage code wants to write `let bytes = store.read(id).await?;` and have
//! that compose straight-line with the rest of a transaction, suspending
//! only at I/O. Rust's `async`/`await` already gives us exactly the
//! continuation-passing shape spec.md §9's design note calls out as an
//! acceptable substitute for native stackful coroutines, so this module is
//! a thin `Runtime` wrapping a single-threaded `tokio::task::LocalSet`
//! rather than a hand-rolled stack-switching implementation.
//!
//! What the contract in spec.md §4.1 asks for and how it maps here:
//!
//! - `start(body)` → [`Runtime::start`], spawning `body` onto the `LocalSet`.
//! - a bounded pool of reusable stacks (≤25) → a `tokio::sync::Semaphore`
//!   with 25 permits; a coroutine holds a permit for its lifetime, so at
//!   most 25 run concurrently and the 26th waits for one to finish, exactly
//!   as a fixed stack pool would block a new coroutine until a stack frees.
//! - `yield()` returning whether the runtime is shutting down →
//!   [`CoroutineContext::yield_now`].
//! - `continue(interrupt?)` resuming a suspended coroutine → has no
//!   explicit analog: the `tokio` scheduler resumes a suspended task
//!   whenever its waker fires, which is what `continue` did explicitly in
//!   the stack-switching model.
//! - the runtime's destructor interrupting every outstanding coroutine →
//!   [`Runtime`]'s `Drop` impl.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tokio::task::LocalSet;

/// Default size of the coroutine "stack pool" (spec.md §5 resource bounds).
pub const DEFAULT_MAX_CONCURRENT: usize = 25;

struct Shared {
    permits: Semaphore,
    interrupted: AtomicBool,
    shutdown: Notify,
}

/// The single-threaded coroutine scheduler. Owned by `ledger::Engine`; all
/// storage-engine state lives on the thread that drives this runtime's
/// `LocalSet`.
pub struct Runtime {
    local: LocalSet,
    shared: Arc<Shared>,
}

impl Runtime {
    pub fn new() -> Self { Self::with_max_concurrent(DEFAULT_MAX_CONCURRENT) }

    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Runtime {
            local: LocalSet::new(),
            shared: Arc::new(Shared { permits: Semaphore::new(max_concurrent), interrupted: AtomicBool::new(false), shutdown: Notify::new() }),
        }
    }

    /// Launch a coroutine. `body` receives a [`CoroutineContext`] it can
    /// use to yield at suspension points. Coroutines beyond the stack pool
    /// bound queue for a permit before `body` starts running, mirroring a
    /// fixed-size stack pool blocking a new coroutine until one frees.
    pub fn start<F, Fut>(&self, body: F) -> CoroutineHandle
    where
        F: FnOnce(CoroutineContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let shared = self.shared.clone();
        let done = Rc::new(Cell::new(false));
        let done_for_task = done.clone();
        let task = self.local.spawn_local(async move {
            let _permit = shared.permits.acquire().await.expect("semaphore never closed");
            let cx = CoroutineContext { shared: shared.clone() };
            body(cx).await;
            done_for_task.set(true);
        });
        CoroutineHandle { task, done }
    }

    /// Drive `fut` (and any coroutines it transitively spawns) to
    /// completion on this runtime's thread. This is the "synchronous task"
    /// helper named in `SPEC_FULL.md` §3.2 for driving a coroutine to
    /// completion outside of coroutine-shaped code (e.g. from a test or
    /// from `ledger-cli`'s command loop).
    pub async fn block_on<F: Future>(&self, fut: F) -> F::Output { self.local.run_until(fut).await }

    /// True once [`Runtime::interrupt`] (or `Drop`) has fired.
    pub fn is_interrupted(&self) -> bool { self.shared.interrupted.load(Ordering::Acquire) }

    /// Ask every outstanding coroutine to wind down. Coroutines observe
    /// this the next time they call `yield_now`.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
        self.shared.shutdown.notify_waiters();
    }
}

impl Default for Runtime {
    fn default() -> Self { Self::new() }
}

impl Drop for Runtime {
    fn drop(&mut self) { self.interrupt(); }
}

/// Handle to a spawned coroutine. Dropping it does not cancel the
/// coroutine (cancellation is advisory per spec.md §5) — use
/// [`Runtime::interrupt`] for that.
pub struct CoroutineHandle {
    task: tokio::task::JoinHandle<()>,
    done: Rc<Cell<bool>>,
}

impl CoroutineHandle {
    pub fn is_finished(&self) -> bool { self.done.get() || self.task.is_finished() }

    pub fn abort(&self) { self.task.abort(); }
}

/// Passed into a coroutine body so it can yield at suspension points.
#[derive(Clone)]
pub struct CoroutineContext {
    shared: Arc<Shared>,
}

impl CoroutineContext {
    /// Suspend until the scheduler resumes this coroutine. Returns `true`
    /// if the runtime has been asked to interrupt — callers must unwind
    /// cleanly, releasing owned scoped resources, rather than continue
    /// (spec.md §5 "Cancellation").
    pub async fn yield_now(&self) -> bool {
        tokio::task::yield_now().await;
        self.shared.interrupted.load(Ordering::Acquire)
    }

    /// Suspend until either `fut` completes or the runtime interrupts,
    /// whichever comes first. Used by I/O-bound suspension points (spec.md
    /// §5: "any I/O-returning call ... may suspend") so a shutdown during a
    /// long KV batch or network fetch unblocks promptly instead of waiting
    /// out the I/O.
    pub async fn race_interrupt<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if self.shared.interrupted.load(Ordering::Acquire) {
            return Err(Interrupted);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.shared.shutdown.notified() => Err(Interrupted),
        }
    }

    pub fn is_interrupted(&self) -> bool { self.shared.interrupted.load(Ordering::Acquire) }
}

/// The runtime was interrupted while this coroutine was suspended on I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "coroutine interrupted during shutdown") }
}
impl std::error::Error for Interrupted {}
