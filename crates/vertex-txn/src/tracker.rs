//! Per-transaction lock bookkeeping.
//!
//! The master acquires locks on behalf of remote transactions; every grant
//! is recorded here so that commit or rollback releases the full set in one
//! sweep, whichever thread performs it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::lock::{LockManager, LockMode, Lockable};
use crate::manager::LocalTxId;

/// Records which locks each transaction holds.
pub struct LockTracker {
    /// The lock manager the recorded locks live in.
    lock_manager: Arc<LockManager>,
    /// One entry per successful acquisition, in acquisition order.
    held: Mutex<HashMap<LocalTxId, Vec<(Lockable, LockMode)>>>,
}

impl LockTracker {
    /// Creates a tracker releasing through `lock_manager`.
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Records a lock against a transaction for release at finish time.
    pub fn add_lock_to_transaction(&self, resource: Lockable, mode: LockMode, tx: LocalTxId) {
        self.held.lock().entry(tx).or_default().push((resource, mode));
    }

    /// Releases every lock recorded for `tx`. Returns how many were
    /// released.
    pub fn release_all(&self, tx: LocalTxId) -> usize {
        let entries = match self.held.lock().remove(&tx) {
            Some(entries) => entries,
            None => return 0,
        };

        let count = entries.len();
        for (resource, mode) in entries {
            self.lock_manager.release(&resource, mode, tx);
        }
        trace!(%tx, count, "released transaction locks");
        count
    }

    /// Returns how many acquisitions are recorded for `tx`.
    pub fn locks_held(&self, tx: LocalTxId) -> usize {
        self.held.lock().get(&tx).map_or(0, Vec::len)
    }

    /// Returns the lock manager.
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }
}

impl fmt::Debug for LockTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTracker")
            .field("transactions", &self.held.lock().len())
            .finish()
    }
}
