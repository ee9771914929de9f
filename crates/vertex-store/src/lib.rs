//! # vertex-store
//!
//! Storage-facing collaborators of the VertexDB master:
//!
//! - **Data sources**: named append-only commit logs. A prepared
//!   transaction payload is applied to exactly one data source, which
//!   assigns it a strictly monotone transaction id.
//! - **Id allocation**: batched entity-id handout with defragmented-id
//!   reuse.
//! - **Relationship types**: the name-to-token registry.
//! - **Store copy**: rotate-and-stream support for seeding a new slave.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data_source;
pub mod error;
pub mod id_alloc;
pub mod store_copy;
pub mod type_registry;

pub use data_source::{CommitRecord, DataSource, DataSourceSet, StoreId, DEFAULT_DATA_SOURCE};
pub use error::{StoreError, StoreResult};
pub use id_alloc::{IdAllocation, IdAllocator, IdAllocatorSet, IdBatch};
pub use store_copy::StoreWriter;
pub use type_registry::RelationshipTypeRegistry;
