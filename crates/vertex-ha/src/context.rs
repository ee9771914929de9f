//! Slave session identity.
//!
//! Every request a slave sends carries a `SlaveContext`: which machine is
//! asking, under which session and event, and how far that slave has
//! already ingested each data source's transaction stream. Identity is
//! pure value equality; any two contexts with equal fields denote the same
//! remote transaction.

use std::fmt;

use vertex_common::types::{MachineId, TxId};

/// Identity of one remote transaction and its replication watermarks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlaveContext {
    machine_id: MachineId,
    session_id: u64,
    event_identifier: u64,
    /// Per data source: the last tx id the slave has applied. Sorted by
    /// name so equality and hashing are canonical.
    last_applied: Vec<(String, TxId)>,
}

impl SlaveContext {
    /// Creates a context. Watermarks are sorted by data source name.
    pub fn new(
        machine_id: MachineId,
        session_id: u64,
        event_identifier: u64,
        mut last_applied: Vec<(String, TxId)>,
    ) -> Self {
        last_applied.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            machine_id,
            session_id,
            event_identifier,
            last_applied,
        }
    }

    /// The stateless context used by calls with no session of their own.
    pub fn empty() -> Self {
        Self {
            machine_id: MachineId::INVALID,
            session_id: 0,
            event_identifier: 0,
            last_applied: Vec::new(),
        }
    }

    /// Returns the slave's machine id.
    pub fn machine_id(&self) -> MachineId {
        self.machine_id
    }

    /// Returns the slave's session nonce.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Returns the event identifier within the session.
    pub fn event_identifier(&self) -> u64 {
        self.event_identifier
    }

    /// Returns the slave's watermarks.
    pub fn last_applied(&self) -> &[(String, TxId)] {
        &self.last_applied
    }

    /// Returns the watermark for a data source, or [`TxId::INVALID`] when
    /// the slave has reported none.
    pub fn watermark_for(&self, data_source: &str) -> TxId {
        self.last_applied
            .iter()
            .find(|(name, _)| name == data_source)
            .map_or(TxId::INVALID, |(_, tx)| *tx)
    }
}

impl fmt::Display for SlaveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SlaveContext[machine={}, session={}, event={}]",
            self.machine_id, self.session_id, self.event_identifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(machine: u32, session: u64, event: u64) -> SlaveContext {
        SlaveContext::new(MachineId::new(machine), session, event, Vec::new())
    }

    #[test]
    fn test_value_equality() {
        let a = SlaveContext::new(
            MachineId::new(2),
            10,
            3,
            vec![("vertexstore".into(), TxId::new(5))],
        );
        let b = SlaveContext::new(
            MachineId::new(2),
            10,
            3,
            vec![("vertexstore".into(), TxId::new(5))],
        );
        assert_eq!(a, b);

        assert_ne!(a, ctx(2, 10, 4));
        assert_ne!(a, ctx(2, 10, 3)); // differing watermarks
    }

    #[test]
    fn test_watermarks_canonical_order() {
        let a = SlaveContext::new(
            MachineId::new(1),
            1,
            1,
            vec![
                ("b".into(), TxId::new(2)),
                ("a".into(), TxId::new(1)),
            ],
        );
        let b = SlaveContext::new(
            MachineId::new(1),
            1,
            1,
            vec![
                ("a".into(), TxId::new(1)),
                ("b".into(), TxId::new(2)),
            ],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_watermark_lookup() {
        let context = SlaveContext::new(
            MachineId::new(1),
            1,
            1,
            vec![("vertexstore".into(), TxId::new(9))],
        );
        assert_eq!(context.watermark_for("vertexstore"), TxId::new(9));
        assert_eq!(context.watermark_for("sidelog"), TxId::INVALID);
    }

    #[test]
    fn test_empty() {
        let empty = SlaveContext::empty();
        assert_eq!(empty.machine_id(), MachineId::INVALID);
        assert!(empty.last_applied().is_empty());
        assert_eq!(SlaveContext::empty(), SlaveContext::empty());
    }

    #[test]
    fn test_display() {
        let context = ctx(2, 10, 3);
        assert_eq!(
            context.to_string(),
            "SlaveContext[machine=2, session=10, event=3]"
        );
    }
}
