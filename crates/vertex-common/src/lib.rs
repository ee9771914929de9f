//! # vertex-common
//!
//! Common types and configuration for VertexDB.
//!
//! This crate provides the foundational pieces shared by every VertexDB
//! component:
//!
//! - **Types**: core identifiers (`TxId`, `MachineId`) and the `IdType`
//!   enumeration of entity id spaces
//! - **Config**: high-availability configuration (`HaConfig`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod types;

pub use config::HaConfig;
pub use types::{IdType, MachineId, TxId};
