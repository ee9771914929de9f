//! Deadlock detection using wait-for graph analysis.
//!
//! The wait-for graph (WFG) tracks which transactions are waiting for
//! which:
//!
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T3:  T2 -> T3
//! T3 waits for T1:  T3 -> T1 (cycle = deadlock!)
//! ```
//!
//! Resolution policy: the transaction whose lock request closes the cycle
//! is aborted. The remote caller receives a structured deadlock reply and
//! retries, so there is no need for victim selection among the older
//! holders.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use crate::manager::LocalTxId;

/// Statistics about deadlock detection.
#[derive(Debug, Default)]
pub struct DeadlockStats {
    /// Number of detection checks performed.
    pub checks: AtomicU64,
    /// Number of deadlocks found.
    pub deadlocks_found: AtomicU64,
}

impl DeadlockStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The wait-for graph for deadlock detection.
pub struct WaitForGraph {
    /// Edges: waiter -> set of holders it's waiting for.
    edges: RwLock<HashMap<LocalTxId, HashSet<LocalTxId>>>,
    /// Statistics.
    stats: DeadlockStats,
}

impl WaitForGraph {
    /// Creates a new empty wait-for graph.
    pub fn new() -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            stats: DeadlockStats::new(),
        }
    }

    /// Adds a wait-for edge: `waiter` is waiting for `holder`.
    pub fn add_wait(&self, waiter: LocalTxId, holder: LocalTxId) {
        if waiter == holder {
            return;
        }
        let mut edges = self.edges.write();
        edges.entry(waiter).or_default().insert(holder);
    }

    /// Removes a single wait-for edge.
    pub fn remove_wait(&self, waiter: LocalTxId, holder: LocalTxId) {
        let mut edges = self.edges.write();
        if let Some(holders) = edges.get_mut(&waiter) {
            holders.remove(&holder);
            if holders.is_empty() {
                edges.remove(&waiter);
            }
        }
    }

    /// Clears all waits registered by a transaction.
    pub fn clear_waits(&self, waiter: LocalTxId) {
        self.edges.write().remove(&waiter);
    }

    /// Detects a cycle reachable from `start`.
    ///
    /// Returns the cycle as a path beginning and ending with `start`
    /// (e.g. `[T1, T2, T1]`), or `None` when `start` cannot reach itself.
    pub fn detect_cycle(&self, start: LocalTxId) -> Option<Vec<LocalTxId>> {
        self.stats.checks.fetch_add(1, AtomicOrdering::Relaxed);

        let edges = self.edges.read();
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        if Self::dfs_find_cycle(start, start, &edges, &mut visited, &mut path) {
            self.stats
                .deadlocks_found
                .fetch_add(1, AtomicOrdering::Relaxed);
            Some(path)
        } else {
            None
        }
    }

    /// DFS from `current` looking for a path back to `start`.
    fn dfs_find_cycle(
        start: LocalTxId,
        current: LocalTxId,
        edges: &HashMap<LocalTxId, HashSet<LocalTxId>>,
        visited: &mut HashSet<LocalTxId>,
        path: &mut Vec<LocalTxId>,
    ) -> bool {
        if !path.is_empty() && current == start {
            path.push(current);
            return true;
        }

        if !visited.insert(current) {
            return false;
        }

        path.push(current);

        if let Some(holders) = edges.get(&current) {
            for &holder in holders {
                if Self::dfs_find_cycle(start, holder, edges, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }

    /// Returns what a transaction is waiting for.
    pub fn waits_of(&self, waiter: LocalTxId) -> Vec<LocalTxId> {
        self.edges
            .read()
            .get(&waiter)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Checks if a transaction has registered waits.
    pub fn is_waiting(&self, waiter: LocalTxId) -> bool {
        self.edges.read().contains_key(&waiter)
    }

    /// Returns the number of wait edges.
    pub fn edge_count(&self) -> usize {
        self.edges.read().values().map(HashSet::len).sum()
    }

    /// Returns statistics.
    pub fn stats(&self) -> &DeadlockStats {
        &self.stats
    }
}

impl Default for WaitForGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitForGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForGraph")
            .field("edge_count", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: u64) -> LocalTxId {
        LocalTxId::new(id)
    }

    #[test]
    fn test_add_remove_edges() {
        let wfg = WaitForGraph::new();

        wfg.add_wait(tx(1), tx(2));
        assert_eq!(wfg.edge_count(), 1);
        assert!(wfg.is_waiting(tx(1)));

        wfg.remove_wait(tx(1), tx(2));
        assert_eq!(wfg.edge_count(), 0);
        assert!(!wfg.is_waiting(tx(1)));
    }

    #[test]
    fn test_self_edge_ignored() {
        let wfg = WaitForGraph::new();
        wfg.add_wait(tx(1), tx(1));
        assert_eq!(wfg.edge_count(), 0);
    }

    #[test]
    fn test_no_cycle() {
        let wfg = WaitForGraph::new();

        // T1 -> T2 -> T3 (no cycle)
        wfg.add_wait(tx(1), tx(2));
        wfg.add_wait(tx(2), tx(3));

        assert!(wfg.detect_cycle(tx(1)).is_none());
        assert!(wfg.detect_cycle(tx(2)).is_none());
    }

    #[test]
    fn test_simple_cycle() {
        let wfg = WaitForGraph::new();

        // T1 -> T2 -> T1
        wfg.add_wait(tx(1), tx(2));
        wfg.add_wait(tx(2), tx(1));

        let cycle = wfg.detect_cycle(tx(1)).expect("cycle expected");
        assert_eq!(cycle.first(), Some(&tx(1)));
        assert_eq!(cycle.last(), Some(&tx(1)));
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn test_three_way_cycle() {
        let wfg = WaitForGraph::new();

        wfg.add_wait(tx(1), tx(2));
        wfg.add_wait(tx(2), tx(3));
        wfg.add_wait(tx(3), tx(1));

        let cycle = wfg.detect_cycle(tx(1)).expect("cycle expected");
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_cycle_not_involving_start() {
        let wfg = WaitForGraph::new();

        // T2 <-> T3 deadlock, T1 only waits in
        wfg.add_wait(tx(1), tx(2));
        wfg.add_wait(tx(2), tx(3));
        wfg.add_wait(tx(3), tx(2));

        // T1 itself is not part of a cycle
        assert!(wfg.detect_cycle(tx(1)).is_none());
        assert!(wfg.detect_cycle(tx(2)).is_some());
    }

    #[test]
    fn test_clear_waits() {
        let wfg = WaitForGraph::new();

        wfg.add_wait(tx(1), tx(2));
        wfg.add_wait(tx(1), tx(3));
        assert_eq!(wfg.waits_of(tx(1)).len(), 2);

        wfg.clear_waits(tx(1));
        assert!(wfg.waits_of(tx(1)).is_empty());
    }

    #[test]
    fn test_stats() {
        let wfg = WaitForGraph::new();

        wfg.add_wait(tx(1), tx(2));
        wfg.add_wait(tx(2), tx(1));
        wfg.detect_cycle(tx(1));

        assert_eq!(wfg.stats().checks.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(wfg.stats().deadlocks_found.load(AtomicOrdering::Relaxed), 1);
    }
}
