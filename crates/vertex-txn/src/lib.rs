//! # vertex-txn
//!
//! Local transaction management for the VertexDB master.
//!
//! This crate provides:
//!
//! - **Thread-affine transaction lifecycle**: a transaction belongs to the
//!   thread that began it and must be explicitly suspended before another
//!   thread may resume it.
//!
//! - **Lock Management**: read/write locks over graph resources with
//!   per-transaction reentrancy.
//!
//! - **Deadlock Detection**: wait-for graph based cycle detection; the
//!   requester that closes a cycle is aborted with a diagnostic message.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     TxManager                        │
//! │   (current transaction per thread, suspend/resume)   │
//! │                         │                            │
//! │                         ▼                            │
//! │                   ┌───────────┐                      │
//! │                   │LockTracker│                      │
//! │                   └───────────┘                      │
//! │                         │ release on commit/rollback │
//! │                         ▼                            │
//! │   ┌─────────────┐            ┌──────────────┐        │
//! │   │ LockManager │───────────▶│ WaitForGraph │        │
//! │   └─────────────┘  waits     └──────────────┘        │
//! └──────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Transaction lifecycle management.
///
/// This module provides:
/// - [`manager::TxManager`]: the thread-affine transaction manager
/// - [`manager::TxHandle`]: a suspendable transaction handle
/// - [`manager::LocalTxId`]: identity of a local transaction
pub mod manager;

/// Lock table over graph resources.
///
/// This module provides:
/// - [`lock::LockManager`]: manages all locks
/// - [`lock::Lockable`]: identifies lockable graph resources
/// - [`lock::LockMode`]: shared and exclusive modes
pub mod lock;

/// Deadlock detection.
///
/// This module provides:
/// - [`deadlock::WaitForGraph`]: tracks transaction wait dependencies
pub mod deadlock;

/// Per-transaction lock bookkeeping.
///
/// This module provides:
/// - [`tracker::LockTracker`]: records held locks for release at
///   commit/rollback time
pub mod tracker;

pub use deadlock::{DeadlockStats, WaitForGraph};
pub use lock::{LockError, LockManager, LockManagerConfig, LockMode, LockStats, Lockable};
pub use manager::{LocalTxId, TxError, TxHandle, TxManager, TxResult, TxState, TxStats};
pub use tracker::LockTracker;
