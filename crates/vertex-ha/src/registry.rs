//! The registry of live slave transactions.
//!
//! One entry per slave session: the local transaction handle plus the
//! moment the session last released a worker thread. A `last_activity` of
//! zero means the session is executing a request right now (possibly
//! blocked on a lock) and must not be reaped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use vertex_txn::TxHandle;

use crate::context::SlaveContext;

/// Timestamp value meaning "currently executing; do not reap".
pub const EXECUTING: u64 = 0;

/// One live slave transaction.
pub struct SessionEntry {
    handle: TxHandle,
    /// Millis of the last request completion, or [`EXECUTING`].
    last_activity: AtomicU64,
}

impl SessionEntry {
    /// Creates an entry in the executing state.
    pub fn new(handle: TxHandle) -> Self {
        Self {
            handle,
            last_activity: AtomicU64::new(EXECUTING),
        }
    }

    /// Returns the session's local transaction handle.
    pub fn handle(&self) -> TxHandle {
        self.handle.clone()
    }

    /// Marks the session as executing, disarming the reaper for it.
    pub fn mark_executing(&self) {
        self.last_activity.store(EXECUTING, Ordering::SeqCst);
    }

    /// Marks the session idle as of `now_millis`, arming the reaper.
    pub fn mark_idle(&self, now_millis: u64) {
        // 0 is reserved for the executing sentinel.
        self.last_activity.store(now_millis.max(1), Ordering::SeqCst);
    }

    /// Returns the last-activity timestamp ([`EXECUTING`] while a request
    /// runs).
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("handle", &self.handle)
            .field("last_activity", &self.last_activity())
            .finish()
    }
}

/// Mapping from slave context to its live transaction.
///
/// All access synchronizes on the whole map; iteration always goes through
/// [`TxRegistry::snapshot`] so no caller holds the map lock across
/// transaction-manager calls.
pub struct TxRegistry {
    sessions: Mutex<HashMap<SlaveContext, Arc<SessionEntry>>>,
}

impl TxRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a session. Called only when a transaction is begun.
    pub fn insert(&self, context: SlaveContext, entry: SessionEntry) -> Arc<SessionEntry> {
        let entry = Arc::new(entry);
        self.sessions.lock().insert(context, Arc::clone(&entry));
        entry
    }

    /// Looks up a session.
    pub fn get(&self, context: &SlaveContext) -> Option<Arc<SessionEntry>> {
        self.sessions.lock().get(context).cloned()
    }

    /// Removes a session. Called only when its transaction finishes.
    pub fn remove(&self, context: &SlaveContext) -> Option<Arc<SessionEntry>> {
        self.sessions.lock().remove(context)
    }

    /// Returns true when the context has a live session.
    pub fn contains(&self, context: &SlaveContext) -> bool {
        self.sessions.lock().contains_key(context)
    }

    /// Copies the current entries out for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<(SlaveContext, Arc<SessionEntry>)> {
        self.sessions
            .lock()
            .iter()
            .map(|(context, entry)| (context.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns true when no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TxRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
