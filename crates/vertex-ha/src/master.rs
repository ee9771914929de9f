//! The master-side transaction coordinator.
//!
//! Slaves forward lock acquisitions and single-resource commits here. The
//! local transaction manager is thread-affine, so every request swaps the
//! worker thread onto the session's transaction for the duration of the
//! request body and swaps it back before returning to the pool:
//!
//! ```text
//! worker thread ──enter──▶ session tx current ──body──▶ leave ──▶ prior tx
//! ```
//!
//! While a request executes, the session's registry timestamp is zero,
//! which disarms the reaper; a thread legitimately blocked on a contended
//! lock is never force-rolled-back. The timestamp is re-armed on leave.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use vertex_common::config::HaConfig;
use vertex_common::types::{IdType, MachineId, TxId};
use vertex_store::{
    DataSourceSet, IdAllocation, IdAllocatorSet, RelationshipTypeRegistry, StoreId, StoreWriter,
};
use vertex_txn::{
    LocalTxId, LockError, LockManager, LockManagerConfig, LockMode, LockTracker, Lockable,
    TxHandle, TxManager,
};

use crate::clock::{Clock, SystemClock};
use crate::context::SlaveContext;
use crate::error::{MasterError, MasterResult};
use crate::reaper::Reaper;
use crate::registry::{SessionEntry, TxRegistry};
use crate::response::{Response, ResponsePacker};

/// Outcome of one lock acquisition request, as seen by the slave.
///
/// Deadlocks and unlockable resources are values, not errors: the slave
/// loops on `NotLocked`, surfaces `DeadLocked` as a retryable conflict and
/// takes its matching local lock only on `OkLocked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResult {
    /// The lock is held on the master on the session's behalf.
    OkLocked,
    /// The lock could not be taken; the slave should re-send.
    NotLocked,
    /// Granting would deadlock; the slave surfaces the conflict.
    DeadLocked {
        /// Description of the wait cycle.
        message: String,
    },
}

impl LockResult {
    /// Returns true when the lock is held.
    pub fn is_locked(&self) -> bool {
        matches!(self, LockResult::OkLocked)
    }
}

/// How a request leaves its session's transaction behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Suspend and keep the session for later requests.
    Keep,
    /// Commit and drop the session.
    Commit,
    /// Roll back and drop the session.
    Rollback,
}

/// The collaborators the coordinator works against.
///
/// Everything is explicit and injected; there is no process-global state.
pub struct MasterContext {
    /// The thread-affine local transaction manager.
    pub tx_manager: Arc<TxManager>,
    /// The lock table.
    pub lock_manager: Arc<LockManager>,
    /// Per-transaction lock bookkeeping.
    pub lock_tracker: Arc<LockTracker>,
    /// The named commit logs.
    pub data_sources: Arc<DataSourceSet>,
    /// Entity id allocation.
    pub id_allocators: Arc<IdAllocatorSet>,
    /// Relationship type tokens.
    pub relationship_types: Arc<RelationshipTypeRegistry>,
    /// Wall clock for idle-session accounting.
    pub clock: Arc<dyn Clock>,
    /// HA configuration.
    pub config: HaConfig,
}

impl MasterContext {
    /// Wires up a full set of collaborators for a master with the given
    /// machine id.
    pub fn new(config: HaConfig, master_id: MachineId) -> Self {
        let lock_manager = Arc::new(LockManager::with_config(LockManagerConfig {
            wait_timeout: config.lock_wait_timeout,
        }));
        let lock_tracker = Arc::new(LockTracker::new(Arc::clone(&lock_manager)));
        let tx_manager = Arc::new(TxManager::new(Arc::clone(&lock_tracker)));
        Self {
            tx_manager,
            lock_manager,
            lock_tracker,
            data_sources: Arc::new(DataSourceSet::new(master_id)),
            id_allocators: Arc::new(IdAllocatorSet::new()),
            relationship_types: Arc::new(RelationshipTypeRegistry::new()),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the clock (tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for MasterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterContext")
            .field("cluster_name", &self.config.cluster_name)
            .finish_non_exhaustive()
    }
}

pub(crate) struct MasterInner {
    pub(crate) context: MasterContext,
    pub(crate) registry: TxRegistry,
    pub(crate) packer: ResponsePacker,
}

impl MasterInner {
    /// Suspends whatever transaction is current on this thread and makes
    /// the session's transaction current, beginning it if permitted.
    ///
    /// Returns the prior handle to restore at leave time. A nested
    /// re-entry (the session's transaction is already current) returns
    /// `None` and changes nothing. On failure the prior transaction is
    /// restored before the error propagates.
    pub(crate) fn enter(
        &self,
        context: &SlaveContext,
        allow_begin: bool,
    ) -> MasterResult<Option<TxHandle>> {
        let tm = &self.context.tx_manager;
        let prior = tm.current();
        let target = self.registry.get(context);

        if let (Some(current), Some(entry)) = (&prior, &target) {
            if *current == entry.handle() {
                return Ok(None);
            }
        }

        if prior.is_some() {
            tm.suspend();
        }

        let restore_prior = |tm: &TxManager| {
            if let Some(p) = &prior {
                let _ = tm.resume(p);
            }
        };

        match target {
            Some(entry) => {
                entry.mark_executing();
                if let Err(err) = tm.resume(&entry.handle()) {
                    restore_prior(tm);
                    return Err(err.into());
                }
            }
            None => {
                if !allow_begin {
                    restore_prior(tm);
                    return Err(MasterError::NoSuchSession {
                        context: context.clone(),
                    });
                }
                match tm.begin() {
                    Ok(handle) => {
                        debug!(%context, tx = %handle.id(), "began slave transaction");
                        self.registry
                            .insert(context.clone(), SessionEntry::new(handle));
                    }
                    Err(err) => {
                        restore_prior(tm);
                        return Err(err.into());
                    }
                }
            }
        }

        Ok(prior)
    }

    /// Ends a request's binding: suspends or finishes the session's
    /// transaction and restores the prior one.
    pub(crate) fn leave(
        &self,
        prior: Option<TxHandle>,
        context: &SlaveContext,
        outcome: Outcome,
    ) -> MasterResult<()> {
        let tm = &self.context.tx_manager;

        let result: MasterResult<()> = (|| {
            match outcome {
                Outcome::Keep => {
                    if let Some(entry) = self.registry.get(context) {
                        entry.mark_idle(self.context.clock.now_millis());
                    }
                    tm.suspend();
                }
                Outcome::Commit => {
                    tm.commit()?;
                    self.registry.remove(context);
                    debug!(%context, "committed slave transaction");
                }
                Outcome::Rollback => {
                    tm.rollback()?;
                    self.registry.remove(context);
                    debug!(%context, "rolled back slave transaction");
                }
            }
            Ok(())
        })();

        if let Some(p) = prior {
            if let Err(err) = tm.resume(&p) {
                if result.is_ok() {
                    return Err(err.into());
                }
            }
        }
        result
    }

    /// Runs `body` with the session's transaction current, leaving with
    /// `Keep` on success. On error or unwind the binding is still undone
    /// and the session survives.
    fn in_session<T>(
        &self,
        context: &SlaveContext,
        allow_begin: bool,
        body: impl FnOnce(&MasterInner) -> MasterResult<T>,
    ) -> MasterResult<T> {
        let scope = SessionScope::enter(self, context, allow_begin)?;
        let value = body(self)?;
        scope.finish(Outcome::Keep)?;
        Ok(value)
    }

    fn current_session_tx(&self) -> MasterResult<LocalTxId> {
        self.context
            .tx_manager
            .current()
            .map(|handle| handle.id())
            .ok_or_else(|| MasterError::internal("no transaction bound inside session scope"))
    }
}

impl fmt::Debug for MasterInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterInner")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Scoped thread-to-session binding.
///
/// Normal completion goes through [`SessionScope::finish`]; any other exit
/// path (error return, panic) unbinds in `Drop`, keeping the session and
/// restoring the prior transaction.
struct SessionScope<'a> {
    inner: &'a MasterInner,
    context: &'a SlaveContext,
    prior: Option<TxHandle>,
    done: bool,
}

impl<'a> SessionScope<'a> {
    fn enter(
        inner: &'a MasterInner,
        context: &'a SlaveContext,
        allow_begin: bool,
    ) -> MasterResult<Self> {
        let prior = inner.enter(context, allow_begin)?;
        Ok(Self {
            inner,
            context,
            prior,
            done: false,
        })
    }

    fn finish(mut self, outcome: Outcome) -> MasterResult<()> {
        self.done = true;
        let prior = self.prior.take();
        self.inner.leave(prior, self.context, outcome)
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let tm = &self.inner.context.tx_manager;
        if let Some(entry) = self.inner.registry.get(self.context) {
            entry.mark_idle(self.inner.context.clock.now_millis());
        }
        tm.suspend();
        if let Some(p) = self.prior.take() {
            let _ = tm.resume(&p);
        }
    }
}

/// The coordinator a master exposes to its slaves.
///
/// Construction starts the reaper; [`MasterImpl::shutdown`] (or drop)
/// stops it.
pub struct MasterImpl {
    inner: Arc<MasterInner>,
    reaper: Mutex<Option<Reaper>>,
}

impl MasterImpl {
    /// Creates the coordinator and starts its reaper.
    pub fn new(context: MasterContext) -> MasterResult<Self> {
        context.config.validate().map_err(MasterError::internal)?;

        info!(
            cluster = %context.config.cluster_name,
            read_lock_timeout = ?context.config.read_lock_timeout,
            "starting master coordinator"
        );

        let packer = ResponsePacker::new(Arc::clone(&context.data_sources));
        let inner = Arc::new(MasterInner {
            context,
            registry: TxRegistry::new(),
            packer,
        });
        let reaper = Reaper::start(Arc::clone(&inner))?;
        Ok(Self {
            inner,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Pre-registers a session before its first lock or commit.
    pub fn initialize_tx(&self, context: &SlaveContext) -> MasterResult<Response<()>> {
        self.inner
            .in_session(context, true, |inner| Ok(inner.packer.pack((), context, |_| true)))
    }

    /// Commits or rolls back a session's transaction.
    pub fn finish_tx(&self, context: &SlaveContext, success: bool) -> MasterResult<Response<()>> {
        let scope = SessionScope::enter(&self.inner, context, false)?;
        scope.finish(if success {
            Outcome::Commit
        } else {
            Outcome::Rollback
        })?;
        Ok(self.inner.packer.pack((), context, |_| true))
    }

    /// Acquires read locks on nodes, in the order given.
    pub fn acquire_node_read_lock(
        &self,
        context: &SlaveContext,
        nodes: &[u64],
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(
            context,
            LockMode::Shared,
            nodes.iter().map(|id| Lockable::Node(*id)).collect(),
        )
    }

    /// Acquires write locks on nodes, in the order given.
    pub fn acquire_node_write_lock(
        &self,
        context: &SlaveContext,
        nodes: &[u64],
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(
            context,
            LockMode::Exclusive,
            nodes.iter().map(|id| Lockable::Node(*id)).collect(),
        )
    }

    /// Acquires read locks on relationships, in the order given.
    pub fn acquire_relationship_read_lock(
        &self,
        context: &SlaveContext,
        relationships: &[u64],
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(
            context,
            LockMode::Shared,
            relationships
                .iter()
                .map(|id| Lockable::Relationship(*id))
                .collect(),
        )
    }

    /// Acquires write locks on relationships, in the order given.
    pub fn acquire_relationship_write_lock(
        &self,
        context: &SlaveContext,
        relationships: &[u64],
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(
            context,
            LockMode::Exclusive,
            relationships
                .iter()
                .map(|id| Lockable::Relationship(*id))
                .collect(),
        )
    }

    /// Acquires the read lock on the graph-wide property container.
    pub fn acquire_graph_read_lock(
        &self,
        context: &SlaveContext,
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(context, LockMode::Shared, vec![Lockable::GraphProps])
    }

    /// Acquires the write lock on the graph-wide property container.
    pub fn acquire_graph_write_lock(
        &self,
        context: &SlaveContext,
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(context, LockMode::Exclusive, vec![Lockable::GraphProps])
    }

    /// Acquires the read lock on an index entry.
    pub fn acquire_index_read_lock(
        &self,
        context: &SlaveContext,
        index: &str,
        key: &str,
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(
            context,
            LockMode::Shared,
            vec![Lockable::Index {
                index: index.to_string(),
                key: key.to_string(),
            }],
        )
    }

    /// Acquires the write lock on an index entry.
    pub fn acquire_index_write_lock(
        &self,
        context: &SlaveContext,
        index: &str,
        key: &str,
    ) -> MasterResult<Response<LockResult>> {
        self.acquire_lock(
            context,
            LockMode::Exclusive,
            vec![Lockable::Index {
                index: index.to_string(),
                key: key.to_string(),
            }],
        )
    }

    fn acquire_lock(
        &self,
        context: &SlaveContext,
        mode: LockMode,
        resources: Vec<Lockable>,
    ) -> MasterResult<Response<LockResult>> {
        self.inner.in_session(context, false, |inner| {
            let owner = inner.current_session_tx()?;
            for resource in &resources {
                let acquired = match mode {
                    LockMode::Shared => inner.context.lock_manager.get_read_lock(resource, owner),
                    LockMode::Exclusive => {
                        inner.context.lock_manager.get_write_lock(resource, owner)
                    }
                };
                match acquired {
                    Ok(()) => {
                        inner
                            .context
                            .lock_tracker
                            .add_lock_to_transaction(resource.clone(), mode, owner);
                    }
                    Err(LockError::DeadlockDetected { message }) => {
                        debug!(%context, %resource, "deadlock on slave lock request");
                        return Ok(inner
                            .packer
                            .pack(LockResult::DeadLocked { message }, context, |_| true));
                    }
                    Err(LockError::IllegalResource { .. }) | Err(LockError::WaitTimeout { .. }) => {
                        return Ok(inner.packer.pack(LockResult::NotLocked, context, |_| true));
                    }
                }
            }
            Ok(inner.packer.pack(LockResult::OkLocked, context, |_| true))
        })
    }

    /// Applies a prepared transaction payload to the named data source and
    /// returns its committed id.
    ///
    /// The reply's commit tail is filtered to ids below the one just
    /// committed so the slave never receives an echo of its own write. The
    /// session stays open; the slave finishes it explicitly.
    pub fn commit_single_resource_tx(
        &self,
        context: &SlaveContext,
        resource: &str,
        tx_producer: impl FnOnce() -> Bytes,
    ) -> MasterResult<Response<TxId>> {
        self.inner.in_session(context, false, |inner| {
            let data_source = inner.context.data_sources.by_name(resource)?;
            let tx_id = data_source.apply_prepared(tx_producer())?;
            Ok(inner.packer.pack(tx_id, context, move |item| item < tx_id))
        })
    }

    /// Hands out a batch of entity ids. Needs no session.
    pub fn allocate_ids(&self, id_type: IdType) -> Response<IdAllocation> {
        let allocation = self
            .inner
            .context
            .id_allocators
            .get(id_type)
            .next_id_batch(self.inner.context.config.id_batch_size);
        self.inner.packer.pack_without_stream(allocation)
    }

    /// Registers a relationship type name and returns its token.
    pub fn create_relationship_type(
        &self,
        context: &SlaveContext,
        name: &str,
    ) -> MasterResult<Response<u32>> {
        self.inner.in_session(context, false, |inner| {
            let id = inner.context.relationship_types.get_or_create(name);
            Ok(inner.packer.pack(id, context, |_| true))
        })
    }

    /// No-op request whose only purpose is receiving the commit tail.
    pub fn pull_updates(&self, context: &SlaveContext) -> MasterResult<Response<()>> {
        self.inner
            .in_session(context, false, |inner| Ok(inner.packer.pack((), context, |_| true)))
    }

    /// Resolves which master applied a historical commit and what preceded
    /// it.
    pub fn get_master_id_for_committed_tx(
        &self,
        tx_id: TxId,
        store_id: StoreId,
    ) -> MasterResult<Response<(MachineId, TxId)>> {
        if store_id != self.inner.context.data_sources.store_id() {
            debug!(%store_id, "master lookup from a foreign store copy");
        }
        let pair = self
            .inner
            .context
            .data_sources
            .default_source()
            .master_for_committed_tx(tx_id)?;
        Ok(self.inner.packer.pack_without_stream(pair))
    }

    /// Rotates the logs and streams the store image through `writer`.
    ///
    /// The reply is packed against watermarks rewritten to the rotation
    /// points, so the tail holds exactly the transactions committed since
    /// the image was cut.
    pub fn copy_store(
        &self,
        context: &SlaveContext,
        writer: &mut dyn StoreWriter,
    ) -> MasterResult<Response<()>> {
        let rotated = self.inner.context.data_sources.copy_store(writer)?;
        writer.done()?;
        let context = SlaveContext::new(
            context.machine_id(),
            context.session_id(),
            context.event_identifier(),
            rotated,
        );
        Ok(self.inner.packer.pack((), &context, |_| true))
    }

    /// Live sessions grouped by slave machine. Exposed for admin tooling;
    /// not used on the request path.
    pub fn ongoing_transactions(&self) -> HashMap<MachineId, Vec<SlaveContext>> {
        let mut result: HashMap<MachineId, Vec<SlaveContext>> = HashMap::new();
        for (context, _) in self.inner.registry.snapshot() {
            result.entry(context.machine_id()).or_default().push(context);
        }
        result
    }

    /// Stops the reaper. In-flight requests drain on their own threads.
    pub fn shutdown(&self) {
        if let Some(mut reaper) = self.reaper.lock().take() {
            info!("stopping master coordinator");
            reaper.stop();
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<MasterInner> {
        &self.inner
    }
}

impl Drop for MasterImpl {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MasterImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterImpl")
            .field("inner", &self.inner)
            .finish()
    }
}
