//! Named append-only commit logs.
//!
//! Every resource the master coordinates writes for is a *data source*: an
//! append-only log of committed transaction payloads. The master is the
//! sole applier, which is what makes the per-source commit order total; a
//! slave prepares a transaction locally, serializes its redo payload and
//! ships it here for authoritative application.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vertex_common::types::{MachineId, TxId};

use crate::error::{StoreError, StoreResult};

/// Name of the default graph store data source.
pub const DEFAULT_DATA_SOURCE: &str = "vertexstore";

/// Physical identity of a store.
///
/// A slave may only apply transaction streams from the store its own files
/// were copied from; the id travels with requests that resolve historical
/// commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId {
    random_id: u64,
    creation_time: u64,
}

impl StoreId {
    /// Creates a store id from its parts.
    #[must_use]
    pub const fn new(random_id: u64, creation_time: u64) -> Self {
        Self {
            random_id,
            creation_time,
        }
    }

    /// Generates a fresh store id from the current time.
    #[must_use]
    pub fn generate() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            random_id: now.as_nanos() as u64,
            creation_time: now.as_millis() as u64,
        }
    }

    /// Returns the random component.
    #[must_use]
    pub const fn random_id(self) -> u64 {
        self.random_id
    }

    /// Returns the creation timestamp (millis since epoch).
    #[must_use]
    pub const fn creation_time(self) -> u64 {
        self.creation_time
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId[{:x}/{}]", self.random_id, self.creation_time)
    }
}

/// One committed transaction in a data source's log.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    /// The id assigned at application time.
    pub tx_id: TxId,
    /// The master that applied this transaction.
    pub master_id: MachineId,
    /// The id committed immediately before this one.
    pub previous_tx_id: TxId,
    /// The serialized redo payload.
    pub payload: Bytes,
}

/// A named append-only commit log.
pub struct DataSource {
    name: String,
    master_id: MachineId,
    /// Committed records, ascending and gapless by tx id starting at 1.
    records: RwLock<Vec<CommitRecord>>,
    /// Tx ids at which the log was rotated, latest last.
    rotations: Mutex<Vec<TxId>>,
}

impl DataSource {
    fn new(name: impl Into<String>, master_id: MachineId) -> Self {
        Self {
            name: name.into(),
            master_id,
            records: RwLock::new(Vec::new()),
            rotations: Mutex::new(Vec::new()),
        }
    }

    /// Returns the data source's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies a prepared transaction payload and returns its committed id.
    ///
    /// Appends are serialized by the log itself; ids are strictly monotone.
    pub fn apply_prepared(&self, payload: Bytes) -> StoreResult<TxId> {
        let mut records = self.records.write();
        let previous = records.last().map_or(TxId::INVALID, |r| r.tx_id);
        let tx_id = previous.next();
        records.push(CommitRecord {
            tx_id,
            master_id: self.master_id,
            previous_tx_id: previous,
            payload,
        });
        debug!(data_source = %self.name, %tx_id, "applied prepared transaction");
        Ok(tx_id)
    }

    /// Returns the id of the most recently committed transaction, or
    /// [`TxId::INVALID`] for an empty log.
    pub fn last_committed_tx_id(&self) -> TxId {
        self.records
            .read()
            .last()
            .map_or(TxId::INVALID, |r| r.tx_id)
    }

    /// Resolves the `(master machine, previous tx id)` pair recorded for a
    /// historical commit.
    pub fn master_for_committed_tx(&self, tx_id: TxId) -> StoreResult<(MachineId, TxId)> {
        let records = self.records.read();
        records
            .binary_search_by_key(&tx_id, |r| r.tx_id)
            .map(|idx| (records[idx].master_id, records[idx].previous_tx_id))
            .map_err(|_| StoreError::TxNotFound {
                tx_id,
                data_source: self.name.clone(),
            })
    }

    /// Returns every committed record with id above `watermark` passing
    /// `filter`, in ascending id order.
    pub fn stream_since(
        &self,
        watermark: TxId,
        filter: impl Fn(TxId) -> bool,
    ) -> Vec<CommitRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.tx_id > watermark && filter(r.tx_id))
            .cloned()
            .collect()
    }

    /// Seals the active log and returns the tx id the new log starts after.
    pub fn rotate(&self) -> TxId {
        let last = self.last_committed_tx_id();
        self.rotations.lock().push(last);
        debug!(data_source = %self.name, last_committed = %last, "rotated log");
        last
    }

    /// Returns how many times the log has been rotated.
    pub fn rotation_count(&self) -> usize {
        self.rotations.lock().len()
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("last_committed", &self.last_committed_tx_id())
            .finish()
    }
}

/// The registry of data sources on this master.
pub struct DataSourceSet {
    store_id: StoreId,
    master_id: MachineId,
    sources: RwLock<BTreeMap<String, Arc<DataSource>>>,
}

impl DataSourceSet {
    /// Creates a set with the default graph store source registered.
    pub fn new(master_id: MachineId) -> Self {
        let set = Self {
            store_id: StoreId::generate(),
            master_id,
            sources: RwLock::new(BTreeMap::new()),
        };
        set.register(DEFAULT_DATA_SOURCE);
        set
    }

    /// Registers a data source, returning the existing one if the name is
    /// already taken.
    pub fn register(&self, name: &str) -> Arc<DataSource> {
        let mut sources = self.sources.write();
        Arc::clone(
            sources
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DataSource::new(name, self.master_id))),
        )
    }

    /// Looks up a data source by name.
    pub fn by_name(&self, name: &str) -> StoreResult<Arc<DataSource>> {
        self.sources
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownDataSource {
                name: name.to_string(),
            })
    }

    /// Returns the default graph store data source.
    pub fn default_source(&self) -> Arc<DataSource> {
        self.by_name(DEFAULT_DATA_SOURCE)
            .unwrap_or_else(|_| self.register(DEFAULT_DATA_SOURCE))
    }

    /// Returns all registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.sources.read().keys().cloned().collect()
    }

    /// Returns all registered data sources, sorted by name.
    pub fn all(&self) -> Vec<Arc<DataSource>> {
        self.sources.read().values().cloned().collect()
    }

    /// Returns the physical store identity.
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Returns the last committed tx id per source.
    pub fn last_committed(&self) -> Vec<(String, TxId)> {
        self.sources
            .read()
            .iter()
            .map(|(name, ds)| (name.clone(), ds.last_committed_tx_id()))
            .collect()
    }
}

impl fmt::Debug for DataSourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceSet")
            .field("store_id", &self.store_id)
            .field("sources", &self.names())
            .finish()
    }
}
