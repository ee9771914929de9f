//! Core identifier types for VertexDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Committed transaction identifier within one data source.
///
/// Transaction ids are assigned by the master when a prepared transaction is
/// applied to a data source's commit log. They are strictly monotone per
/// data source and are what slaves track as watermarks.
///
/// # Example
///
/// ```rust
/// use vertex_common::types::TxId;
///
/// let tx = TxId::new(42);
/// assert!(tx.is_valid());
/// assert_eq!(tx.next().as_u64(), 43);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxId(u64);

impl TxId {
    /// Invalid transaction id, used as a sentinel and as the "nothing
    /// applied yet" watermark.
    pub const INVALID: Self = Self(0);

    /// First transaction id a fresh data source hands out.
    pub const FIRST: Self = Self(1);

    /// Creates a new `TxId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid transaction id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TxId(INVALID)")
        } else {
            write!(f, "TxId({})", self.0)
        }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<TxId> for u64 {
    #[inline]
    fn from(id: TxId) -> Self {
        id.0
    }
}

/// Cluster-wide identity of a participating machine (master or slave).
///
/// Machine ids are assigned by cluster configuration and remain stable for
/// the lifetime of a node. The master stamps its own machine id on every
/// transaction it applies, so a slave can later resolve which master was
/// authoritative for a historical commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MachineId(u32);

impl MachineId {
    /// Invalid machine id, used as a sentinel (and by stateless contexts).
    pub const INVALID: Self = Self(0);

    /// Creates a new `MachineId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a valid machine id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "MachineId(INVALID)")
        } else {
            write!(f, "MachineId({})", self.0)
        }
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MachineId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<MachineId> for u32 {
    #[inline]
    fn from(id: MachineId) -> Self {
        id.0
    }
}

/// Entity id spaces a slave can allocate batches from.
///
/// Every graph entity kind draws its identifiers from its own space; the
/// master hands out disjoint batches per space so slaves can create
/// entities without a round-trip per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    /// Node record ids.
    Node,
    /// Relationship record ids.
    Relationship,
    /// Property record ids.
    Property,
    /// Relationship type token ids.
    RelationshipType,
}

impl IdType {
    /// All id spaces, in stable order.
    pub const ALL: [IdType; 4] = [
        IdType::Node,
        IdType::Relationship,
        IdType::Property,
        IdType::RelationshipType,
    ];
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdType::Node => write!(f, "node"),
            IdType::Relationship => write!(f, "relationship"),
            IdType::Property => write!(f, "property"),
            IdType::RelationshipType => write!(f, "relationship_type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_id() {
        let tx = TxId::new(100);
        assert_eq!(tx.as_u64(), 100);
        assert!(tx.is_valid());
        assert!(!TxId::INVALID.is_valid());

        let next = tx.next();
        assert_eq!(next.as_u64(), 101);
    }

    #[test]
    fn test_machine_id() {
        let machine = MachineId::new(5);
        assert_eq!(machine.as_u32(), 5);
        assert!(machine.is_valid());
        assert!(!MachineId::INVALID.is_valid());
    }

    #[test]
    fn test_ordering() {
        assert!(TxId::new(1) < TxId::new(2));
        assert!(MachineId::new(1) < MachineId::new(2));
        assert!(TxId::INVALID < TxId::FIRST);
    }

    #[test]
    fn test_id_type_display() {
        assert_eq!(format!("{}", IdType::Node), "node");
        assert_eq!(format!("{}", IdType::RelationshipType), "relationship_type");
        assert_eq!(IdType::ALL.len(), 4);
    }
}
