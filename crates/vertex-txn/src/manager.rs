//! Thread-affine transaction lifecycle management.
//!
//! The manager's contract mirrors classic enterprise transaction managers:
//! at most one transaction is *current* on a given thread, and commit,
//! rollback and lock registration implicitly target that current
//! transaction. A transaction must be explicitly suspended before another
//! thread may resume it.
//!
//! # Transaction states
//!
//! ```text
//! ┌───────┐  begin()   ┌─────────┐   suspend()    ┌───────────┐
//! │ Start │───────────▶│  Bound  │───────────────▶│ Suspended │
//! └───────┘            └─────────┘◀───────────────└───────────┘
//!                           │         resume()
//!                 commit() / rollback()
//!                           │
//!                           ▼
//!                     ┌──────────┐
//!                     │ Finished │
//!                     └──────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::tracker::LockTracker;

/// Identity of a local transaction.
///
/// Assigned by [`TxManager::begin`] and used as the lock-owner identity
/// throughout the lock manager and wait-for graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct LocalTxId(u64);

impl LocalTxId {
    /// Creates a local transaction id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LocalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalTxId({})", self.0)
    }
}

impl fmt::Display for LocalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// The lifecycle state of a local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Current on the given thread.
    Bound(ThreadId),
    /// Detached; any thread may resume it.
    Suspended,
    /// Committed or rolled back; cannot be resumed.
    Finished,
}

impl TxState {
    /// Returns true if the transaction has ended.
    pub fn is_finished(&self) -> bool {
        *self == TxState::Finished
    }
}

struct TxInner {
    id: LocalTxId,
    state: Mutex<TxState>,
}

/// A handle to a local transaction.
///
/// Handles are cheap to clone and compare by transaction identity.
#[derive(Clone)]
pub struct TxHandle {
    inner: Arc<TxInner>,
}

impl TxHandle {
    /// Returns the transaction's identity.
    pub fn id(&self) -> LocalTxId {
        self.inner.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TxState {
        *self.inner.state.lock()
    }

    /// Returns true if this transaction has committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }
}

impl PartialEq for TxHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TxHandle {}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Errors from transaction lifecycle operations.
#[derive(Debug, Error)]
pub enum TxError {
    /// The calling thread already has a current transaction.
    #[error("calling thread already has a current transaction")]
    AlreadyInTransaction,

    /// The calling thread has no current transaction.
    #[error("no transaction is bound to the calling thread")]
    NotInTransaction,

    /// The transaction is current on some thread and cannot be resumed.
    #[error("{id} is not suspended; it is active on another thread")]
    NotSuspended {
        /// The transaction that could not be resumed.
        id: LocalTxId,
    },

    /// The transaction has already committed or rolled back.
    #[error("{id} has already finished")]
    Finished {
        /// The finished transaction.
        id: LocalTxId,
    },
}

/// Result type for transaction operations.
pub type TxResult<T> = Result<T, TxError>;

/// Statistics about the transaction manager.
#[derive(Debug, Default)]
pub struct TxStats {
    /// Total transactions begun.
    pub begun: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions rolled back.
    pub rolled_back: AtomicU64,
    /// Currently live (bound or suspended) transactions.
    pub active: AtomicU64,
}

impl TxStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The thread-affine transaction manager.
///
/// Every operation targets the calling thread's current transaction. The
/// HA master multiplexes many remote sessions over a worker pool by
/// suspending and resuming handles around each request.
pub struct TxManager {
    /// Current transaction per thread.
    current: Mutex<HashMap<ThreadId, TxHandle>>,
    /// All live transactions, for leak accounting.
    live: Mutex<HashMap<LocalTxId, TxHandle>>,
    /// Lock bookkeeping, drained at commit/rollback.
    tracker: Arc<LockTracker>,
    /// Next transaction id.
    next_id: AtomicU64,
    /// Statistics.
    stats: TxStats,
}

impl TxManager {
    /// Creates a new transaction manager releasing locks through `tracker`.
    pub fn new(tracker: Arc<LockTracker>) -> Self {
        Self {
            current: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            tracker,
            next_id: AtomicU64::new(1),
            stats: TxStats::new(),
        }
    }

    /// Begins a new transaction bound to the calling thread.
    pub fn begin(&self) -> TxResult<TxHandle> {
        let thread_id = thread::current().id();
        let mut current = self.current.lock();
        if current.contains_key(&thread_id) {
            return Err(TxError::AlreadyInTransaction);
        }

        let id = LocalTxId::new(self.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        let handle = TxHandle {
            inner: Arc::new(TxInner {
                id,
                state: Mutex::new(TxState::Bound(thread_id)),
            }),
        };

        current.insert(thread_id, handle.clone());
        drop(current);
        self.live.lock().insert(id, handle.clone());

        self.stats.begun.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats.active.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(%id, "began transaction");

        Ok(handle)
    }

    /// Returns the calling thread's current transaction, if any.
    pub fn current(&self) -> Option<TxHandle> {
        self.current.lock().get(&thread::current().id()).cloned()
    }

    /// Detaches and returns the calling thread's current transaction.
    ///
    /// Returns `None` when the thread has no current transaction.
    pub fn suspend(&self) -> Option<TxHandle> {
        let handle = self.current.lock().remove(&thread::current().id())?;
        *handle.inner.state.lock() = TxState::Suspended;
        Some(handle)
    }

    /// Resumes a suspended transaction on the calling thread.
    pub fn resume(&self, handle: &TxHandle) -> TxResult<()> {
        let thread_id = thread::current().id();
        let mut current = self.current.lock();
        if current.contains_key(&thread_id) {
            return Err(TxError::AlreadyInTransaction);
        }

        let mut state = handle.inner.state.lock();
        match *state {
            TxState::Suspended => {
                *state = TxState::Bound(thread_id);
                current.insert(thread_id, handle.clone());
                Ok(())
            }
            TxState::Bound(_) => Err(TxError::NotSuspended { id: handle.id() }),
            TxState::Finished => Err(TxError::Finished { id: handle.id() }),
        }
    }

    /// Commits the calling thread's current transaction.
    ///
    /// Releases every lock the transaction holds.
    pub fn commit(&self) -> TxResult<()> {
        let handle = self.finish()?;
        self.stats.committed.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(id = %handle.id(), "committed transaction");
        Ok(())
    }

    /// Rolls back the calling thread's current transaction.
    ///
    /// Releases every lock the transaction holds.
    pub fn rollback(&self) -> TxResult<()> {
        let handle = self.finish()?;
        self.stats.rolled_back.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(id = %handle.id(), "rolled back transaction");
        Ok(())
    }

    fn finish(&self) -> TxResult<TxHandle> {
        let handle = self
            .current
            .lock()
            .remove(&thread::current().id())
            .ok_or(TxError::NotInTransaction)?;

        *handle.inner.state.lock() = TxState::Finished;
        self.live.lock().remove(&handle.id());
        self.tracker.release_all(handle.id());
        self.stats.active.fetch_sub(1, AtomicOrdering::Relaxed);
        Ok(handle)
    }

    /// Returns the number of live (bound or suspended) transactions.
    pub fn active_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Returns statistics.
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// Returns the lock tracker.
    pub fn tracker(&self) -> &Arc<LockTracker> {
        &self.tracker
    }
}

impl fmt::Debug for TxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxManager")
            .field("active_count", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;

    fn create_manager() -> TxManager {
        let locks = Arc::new(LockManager::new());
        TxManager::new(Arc::new(LockTracker::new(locks)))
    }

    #[test]
    fn test_begin_commit() {
        let tm = create_manager();

        let handle = tm.begin().unwrap();
        assert_eq!(tm.active_count(), 1);
        assert_eq!(tm.current(), Some(handle.clone()));

        tm.commit().unwrap();
        assert_eq!(tm.active_count(), 0);
        assert!(tm.current().is_none());
        assert!(handle.is_finished());
    }

    #[test]
    fn test_begin_twice_fails() {
        let tm = create_manager();

        tm.begin().unwrap();
        assert!(matches!(tm.begin(), Err(TxError::AlreadyInTransaction)));

        tm.rollback().unwrap();
    }

    #[test]
    fn test_commit_without_transaction_fails() {
        let tm = create_manager();
        assert!(matches!(tm.commit(), Err(TxError::NotInTransaction)));
    }

    #[test]
    fn test_suspend_resume() {
        let tm = create_manager();

        let handle = tm.begin().unwrap();
        let suspended = tm.suspend().expect("current transaction");
        assert_eq!(suspended, handle);
        assert!(tm.current().is_none());
        assert_eq!(suspended.state(), TxState::Suspended);

        tm.resume(&suspended).unwrap();
        assert_eq!(tm.current(), Some(handle));

        tm.rollback().unwrap();
    }

    #[test]
    fn test_suspend_without_transaction() {
        let tm = create_manager();
        assert!(tm.suspend().is_none());
    }

    #[test]
    fn test_resume_finished_fails() {
        let tm = create_manager();

        tm.begin().unwrap();
        let handle = tm.suspend().unwrap();
        tm.resume(&handle).unwrap();
        tm.commit().unwrap();

        assert!(matches!(tm.resume(&handle), Err(TxError::Finished { .. })));
    }

    #[test]
    fn test_resume_bound_elsewhere_fails() {
        let tm = Arc::new(create_manager());

        let handle = tm.begin().unwrap();

        // The transaction is bound to this thread, so another thread
        // cannot resume it.
        let tm2 = Arc::clone(&tm);
        let handle2 = handle.clone();
        let result = thread::spawn(move || tm2.resume(&handle2)).join().unwrap();
        assert!(matches!(result, Err(TxError::NotSuspended { .. })));

        tm.rollback().unwrap();
    }

    #[test]
    fn test_handoff_between_threads() {
        let tm = Arc::new(create_manager());

        tm.begin().unwrap();
        let handle = tm.suspend().unwrap();

        let tm2 = Arc::clone(&tm);
        thread::spawn(move || {
            tm2.resume(&handle).unwrap();
            tm2.commit().unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(tm.active_count(), 0);
        assert_eq!(tm.stats().committed.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_stats() {
        let tm = create_manager();

        tm.begin().unwrap();
        tm.commit().unwrap();
        tm.begin().unwrap();
        tm.rollback().unwrap();

        assert_eq!(tm.stats().begun.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(tm.stats().committed.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(tm.stats().rolled_back.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(tm.stats().active.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn test_handle_identity() {
        let tm = create_manager();

        let a = tm.begin().unwrap();
        let b = tm.current().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());

        tm.rollback().unwrap();
    }
}
