//! # vertex-ha
//!
//! Master-side transaction coordination for VertexDB's high-availability
//! clusters.
//!
//! Slave nodes forward lock acquisitions and single-resource commits to
//! one master; the master arbitrates contention, holds locks on the remote
//! participants' behalf and attaches a filtered commit-log tail to every
//! reply so laggards catch up without a separate poll.
//!
//! The communication layer is out of scope here: this crate implements the
//! coordination logic a wire frontend calls into.
//!
//! # Architecture
//!
//! ```text
//!              request (SlaveContext)
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────┐
//! │                   MasterImpl                     │
//! │  enter ─▶ session tx current ─▶ body ─▶ leave    │
//! │                       │                          │
//! │     ┌─────────────────┼───────────────┐          │
//! │     ▼                 ▼               ▼          │
//! │ LockManager     DataSourceSet    IdAllocators    │
//! │     │                 │                          │
//! │     ▼                 ▼                          │
//! │ TxRegistry ◀──── ResponsePacker (commit tail)    │
//! │     ▲                                            │
//! │     └── Reaper (rolls back stale sessions)       │
//! └──────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Wall-clock abstraction for idle-session accounting.
pub mod clock;

/// Slave session identity and replication watermarks.
pub mod context;

/// Master error types.
pub mod error;

/// The coordinator facade and its swap protocol.
pub mod master;

mod reaper;

/// The registry of live slave transactions.
pub mod registry;

/// Response packing with commit-log tails.
pub mod response;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::SlaveContext;
pub use error::{MasterError, MasterResult};
pub use master::{LockResult, MasterContext, MasterImpl};
pub use registry::{SessionEntry, TxRegistry};
pub use response::{Response, ResponsePacker, StreamEntry, TxStream};
