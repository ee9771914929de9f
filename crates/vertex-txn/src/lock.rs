//! Lock management over graph resources.
//!
//! This module implements the master-side lock table:
//! - Resource-level locking with shared (S) and exclusive (X) modes
//! - Reentrant acquisition per owning transaction
//! - Blocking waits with wait-for-graph deadlock detection
//!
//! # Lock Compatibility
//!
//! ```text
//!          │ S  │ X  │
//! ─────────┼────┼────┤
//!     S    │ ✓  │ ✗  │
//!     X    │ ✗  │ ✗  │
//! ```
//!
//! A transaction that already holds the exclusive lock may take the shared
//! lock (and vice versa does not downgrade anything); re-acquiring a held
//! mode increments a reentrancy count and releases symmetrically.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::deadlock::WaitForGraph;
use crate::manager::LocalTxId;

/// How long a waiter sleeps between grant attempts.
const RETRY_INTERVAL: Duration = Duration::from_micros(100);

/// Lock mode for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock (read lock).
    Shared,
    /// Exclusive lock (write lock).
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "S"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

/// A lockable graph resource.
///
/// Pure value identity: two requests naming the same node id produce equal
/// lock keys regardless of where the requests came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lockable {
    /// A node, by record id.
    Node(u64),
    /// A relationship, by record id.
    Relationship(u64),
    /// The graph-wide property container.
    GraphProps,
    /// An index entry, by index name and key.
    Index {
        /// Index name.
        index: String,
        /// Key within the index.
        key: String,
    },
}

impl fmt::Display for Lockable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lockable::Node(id) => write!(f, "Node({id})"),
            Lockable::Relationship(id) => write!(f, "Relationship({id})"),
            Lockable::GraphProps => write!(f, "GraphProps"),
            Lockable::Index { index, key } => write!(f, "Index({index}/{key})"),
        }
    }
}

/// Errors from lock acquisition.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Granting the lock would close a wait cycle; the requester aborts.
    #[error("deadlock detected: {message}")]
    DeadlockDetected {
        /// Human-readable description of the cycle.
        message: String,
    },

    /// The resource cannot be locked.
    #[error("not a lockable resource: {resource}")]
    IllegalResource {
        /// Description of the offending resource.
        resource: String,
    },

    /// The configured wait cap elapsed before the lock could be granted.
    #[error("gave up waiting for {mode} lock on {resource} after {waited_ms} ms")]
    WaitTimeout {
        /// The contended resource.
        resource: String,
        /// The requested mode.
        mode: LockMode,
        /// How long the requester waited.
        waited_ms: u64,
    },
}

/// One resource's lock state.
#[derive(Default)]
struct LockSlot {
    /// Reentrancy count per reader.
    readers: HashMap<LocalTxId, usize>,
    /// The writer and its reentrancy count.
    writer: Option<(LocalTxId, usize)>,
}

impl LockSlot {
    fn can_read(&self, owner: LocalTxId) -> bool {
        match self.writer {
            None => true,
            Some((writer, _)) => writer == owner,
        }
    }

    fn can_write(&self, owner: LocalTxId) -> bool {
        let writer_ok = match self.writer {
            None => true,
            Some((writer, _)) => writer == owner,
        };
        writer_ok && self.readers.keys().all(|reader| *reader == owner)
    }

    fn grant(&mut self, owner: LocalTxId, mode: LockMode) {
        match mode {
            LockMode::Shared => *self.readers.entry(owner).or_insert(0) += 1,
            LockMode::Exclusive => match &mut self.writer {
                Some((_, count)) => *count += 1,
                None => self.writer = Some((owner, 1)),
            },
        }
    }

    fn release(&mut self, owner: LocalTxId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => {
                if let Some(count) = self.readers.get_mut(&owner) {
                    *count -= 1;
                    if *count == 0 {
                        self.readers.remove(&owner);
                    }
                    return true;
                }
                false
            }
            LockMode::Exclusive => {
                if let Some((writer, count)) = &mut self.writer {
                    if *writer == owner {
                        *count -= 1;
                        if *count == 0 {
                            self.writer = None;
                        }
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Transactions currently preventing `owner` from taking `mode`.
    fn blockers(&self, owner: LocalTxId, mode: LockMode) -> Vec<LocalTxId> {
        let mut blocking = Vec::new();
        if let Some((writer, _)) = self.writer {
            if writer != owner {
                blocking.push(writer);
            }
        }
        if mode == LockMode::Exclusive {
            blocking.extend(self.readers.keys().copied().filter(|r| *r != owner));
        }
        blocking
    }

    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

/// Statistics about the lock manager.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Total lock acquisitions.
    pub acquisitions: AtomicU64,
    /// Total lock releases.
    pub releases: AtomicU64,
    /// Total lock waits.
    pub waits: AtomicU64,
    /// Total deadlocks detected.
    pub deadlocks: AtomicU64,
    /// Total wait timeouts.
    pub timeouts: AtomicU64,
}

impl LockStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Configuration for the lock manager.
#[derive(Debug, Clone, Default)]
pub struct LockManagerConfig {
    /// Optional cap on how long one acquisition may wait. `None` waits
    /// until granted or deadlocked.
    pub wait_timeout: Option<Duration>,
}

/// The lock manager.
///
/// Waiters spin-park; every round they publish their wait edges and check
/// the wait-for graph, so a cycle aborts the requester promptly while the
/// established holders keep their locks.
pub struct LockManager {
    /// All lock slots, keyed by resource.
    slots: Mutex<HashMap<Lockable, LockSlot>>,
    /// Wait-for graph for deadlock detection.
    wfg: WaitForGraph,
    /// Configuration.
    config: LockManagerConfig,
    /// Statistics.
    stats: LockStats,
}

impl LockManager {
    /// Creates a new lock manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    /// Creates a lock manager with custom configuration.
    pub fn with_config(config: LockManagerConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            wfg: WaitForGraph::new(),
            config,
            stats: LockStats::new(),
        }
    }

    /// Acquires the shared lock on `resource`, blocking until granted.
    pub fn get_read_lock(&self, resource: &Lockable, owner: LocalTxId) -> Result<(), LockError> {
        self.acquire(resource, LockMode::Shared, owner)
    }

    /// Acquires the exclusive lock on `resource`, blocking until granted.
    pub fn get_write_lock(&self, resource: &Lockable, owner: LocalTxId) -> Result<(), LockError> {
        self.acquire(resource, LockMode::Exclusive, owner)
    }

    fn acquire(
        &self,
        resource: &Lockable,
        mode: LockMode,
        owner: LocalTxId,
    ) -> Result<(), LockError> {
        validate(resource)?;

        let start = Instant::now();
        let mut waiting = false;
        loop {
            {
                let mut slots = self.slots.lock();
                let slot = slots.entry(resource.clone()).or_default();
                let grantable = match mode {
                    LockMode::Shared => slot.can_read(owner),
                    LockMode::Exclusive => slot.can_write(owner),
                };
                if grantable {
                    slot.grant(owner, mode);
                    drop(slots);
                    if waiting {
                        self.wfg.clear_waits(owner);
                    }
                    self.stats
                        .acquisitions
                        .fetch_add(1, AtomicOrdering::Relaxed);
                    trace!(%owner, %resource, %mode, "lock granted");
                    return Ok(());
                }
                for holder in slot.blockers(owner, mode) {
                    self.wfg.add_wait(owner, holder);
                }
            }

            if !waiting {
                waiting = true;
                self.stats.waits.fetch_add(1, AtomicOrdering::Relaxed);
            }

            if let Some(cycle) = self.wfg.detect_cycle(owner) {
                self.wfg.clear_waits(owner);
                self.stats.deadlocks.fetch_add(1, AtomicOrdering::Relaxed);
                return Err(LockError::DeadlockDetected {
                    message: deadlock_message(owner, resource, mode, &cycle),
                });
            }

            if let Some(cap) = self.config.wait_timeout {
                if start.elapsed() >= cap {
                    self.wfg.clear_waits(owner);
                    self.stats.timeouts.fetch_add(1, AtomicOrdering::Relaxed);
                    return Err(LockError::WaitTimeout {
                        resource: resource.to_string(),
                        mode,
                        waited_ms: start.elapsed().as_millis() as u64,
                    });
                }
            }

            thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Releases one acquisition of `mode` on `resource` by `owner`.
    ///
    /// Returns false when the owner held no such lock.
    pub fn release(&self, resource: &Lockable, mode: LockMode, owner: LocalTxId) -> bool {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(resource) {
            if slot.release(owner, mode) {
                if slot.is_free() {
                    slots.remove(resource);
                }
                self.stats.releases.fetch_add(1, AtomicOrdering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Returns true if `owner` holds `mode` on `resource`.
    pub fn holds(&self, resource: &Lockable, mode: LockMode, owner: LocalTxId) -> bool {
        let slots = self.slots.lock();
        match slots.get(resource) {
            None => false,
            Some(slot) => match mode {
                LockMode::Shared => slot.readers.contains_key(&owner),
                LockMode::Exclusive => matches!(slot.writer, Some((w, _)) if w == owner),
            },
        }
    }

    /// Returns the number of resources with live lock state.
    pub fn lock_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns the wait-for graph.
    pub fn wait_for_graph(&self) -> &WaitForGraph {
        &self.wfg
    }

    /// Returns statistics.
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

fn validate(resource: &Lockable) -> Result<(), LockError> {
    if let Lockable::Index { index, key } = resource {
        if index.is_empty() || key.is_empty() {
            return Err(LockError::IllegalResource {
                resource: resource.to_string(),
            });
        }
    }
    Ok(())
}

fn deadlock_message(
    owner: LocalTxId,
    resource: &Lockable,
    mode: LockMode,
    cycle: &[LocalTxId],
) -> String {
    let chain = cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ");
    format!("{owner} waiting for {mode} lock on {resource}; wait cycle: {chain}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tx(id: u64) -> LocalTxId {
        LocalTxId::new(id)
    }

    #[test]
    fn test_read_locks_are_shared() {
        let lm = LockManager::new();
        let node = Lockable::Node(1);

        lm.get_read_lock(&node, tx(1)).unwrap();
        lm.get_read_lock(&node, tx(2)).unwrap();

        assert!(lm.holds(&node, LockMode::Shared, tx(1)));
        assert!(lm.holds(&node, LockMode::Shared, tx(2)));
        assert_eq!(lm.lock_count(), 1);
    }

    #[test]
    fn test_write_lock_reentrant() {
        let lm = LockManager::new();
        let node = Lockable::Node(1);

        lm.get_write_lock(&node, tx(1)).unwrap();
        lm.get_write_lock(&node, tx(1)).unwrap();
        assert!(lm.holds(&node, LockMode::Exclusive, tx(1)));

        // Two acquisitions need two releases.
        assert!(lm.release(&node, LockMode::Exclusive, tx(1)));
        assert!(lm.holds(&node, LockMode::Exclusive, tx(1)));
        assert!(lm.release(&node, LockMode::Exclusive, tx(1)));
        assert!(!lm.holds(&node, LockMode::Exclusive, tx(1)));
        assert_eq!(lm.lock_count(), 0);
    }

    #[test]
    fn test_read_under_own_write() {
        let lm = LockManager::new();
        let node = Lockable::Node(7);

        lm.get_write_lock(&node, tx(1)).unwrap();
        lm.get_read_lock(&node, tx(1)).unwrap();

        assert!(lm.holds(&node, LockMode::Shared, tx(1)));
        assert!(lm.holds(&node, LockMode::Exclusive, tx(1)));
    }

    #[test]
    fn test_release_without_hold() {
        let lm = LockManager::new();
        assert!(!lm.release(&Lockable::Node(1), LockMode::Shared, tx(1)));
    }

    #[test]
    fn test_writer_blocks_reader_until_released() {
        let lm = Arc::new(LockManager::new());
        let node = Lockable::Node(1);

        lm.get_write_lock(&node, tx(1)).unwrap();

        let lm2 = Arc::clone(&lm);
        let node2 = node.clone();
        let waiter = std::thread::spawn(move || lm2.get_read_lock(&node2, tx(2)));

        // Give the waiter a moment to start spinning, then release.
        std::thread::sleep(Duration::from_millis(20));
        assert!(lm.release(&node, LockMode::Exclusive, tx(1)));

        waiter.join().unwrap().unwrap();
        assert!(lm.holds(&node, LockMode::Shared, tx(2)));
    }

    #[test]
    fn test_deadlock_aborts_requester() {
        let lm = Arc::new(LockManager::new());
        let a = Lockable::Node(1);
        let b = Lockable::Node(2);

        // tx1 holds a, tx2 holds b.
        lm.get_write_lock(&a, tx(1)).unwrap();
        lm.get_write_lock(&b, tx(2)).unwrap();

        // tx2 waits for a on another thread.
        let lm2 = Arc::clone(&lm);
        let a2 = a.clone();
        let blocked = std::thread::spawn(move || lm2.get_write_lock(&a2, tx(2)));

        std::thread::sleep(Duration::from_millis(20));

        // tx1 asking for b closes the cycle and must be aborted.
        let result = lm.get_write_lock(&b, tx(1));
        let err = result.expect_err("deadlock expected");
        assert!(matches!(err, LockError::DeadlockDetected { .. }));
        assert!(err.to_string().contains("wait cycle"));

        // Unblock tx2. While the cycle existed tx2 may have witnessed it
        // from its own side as well, in which case its request also aborts;
        // both outcomes leave the lock table consistent.
        assert!(lm.release(&a, LockMode::Exclusive, tx(1)));
        match blocked.join().unwrap() {
            Ok(()) => assert!(lm.holds(&a, LockMode::Exclusive, tx(2))),
            Err(err) => assert!(matches!(err, LockError::DeadlockDetected { .. })),
        }
    }

    #[test]
    fn test_wait_timeout_when_configured() {
        let lm = LockManager::with_config(LockManagerConfig {
            wait_timeout: Some(Duration::from_millis(30)),
        });
        let node = Lockable::Node(1);

        lm.get_write_lock(&node, tx(1)).unwrap();
        let result = lm.get_write_lock(&node, tx(2));
        assert!(matches!(result, Err(LockError::WaitTimeout { .. })));
    }

    #[test]
    fn test_illegal_index_resource() {
        let lm = LockManager::new();
        let bad = Lockable::Index {
            index: String::new(),
            key: "name".to_string(),
        };
        let result = lm.get_read_lock(&bad, tx(1));
        assert!(matches!(result, Err(LockError::IllegalResource { .. })));
    }

    #[test]
    fn test_lockable_value_identity() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Lockable::Node(42));
        assert!(set.contains(&Lockable::Node(42)));
        assert!(!set.contains(&Lockable::Relationship(42)));

        assert_eq!(
            Lockable::Index {
                index: "people".into(),
                key: "name".into()
            },
            Lockable::Index {
                index: "people".into(),
                key: "name".into()
            }
        );
    }

    #[test]
    fn test_stats() {
        let lm = LockManager::new();
        let node = Lockable::Node(1);

        lm.get_read_lock(&node, tx(1)).unwrap();
        assert_eq!(lm.stats().acquisitions.load(AtomicOrdering::Relaxed), 1);

        lm.release(&node, LockMode::Shared, tx(1));
        assert_eq!(lm.stats().releases.load(AtomicOrdering::Relaxed), 1);
    }
}
