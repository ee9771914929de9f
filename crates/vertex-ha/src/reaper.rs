//! The stale-session reaper.
//!
//! Slaves can die mid-transaction, leaving the master holding their locks
//! forever. A dedicated thread sweeps the registry at a fixed delay and
//! force-rolls-back any session idle longer than the configured threshold.
//!
//! A session whose `last_activity` is zero is executing a request, which
//! includes waiting on a contended lock, and is exempt: only the lock
//! manager's own deadlock detection may break such a wait. The threshold
//! therefore only has to outlast the slowest legitimate idle gap between
//! requests, and a failure to reclaim one entry never stops the sweep.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use vertex_txn::TxError;

use crate::error::MasterError;
use crate::master::{MasterInner, Outcome};
use crate::registry::EXECUTING;

/// Handle to the sweep thread.
pub(crate) struct Reaper {
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawns the sweep thread at the configured fixed delay.
    pub(crate) fn start(inner: Arc<MasterInner>) -> io::Result<Reaper> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let interval = inner.context.config.reaper_interval;

        let handle = std::thread::Builder::new()
            .name("vertex-ha-reaper".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                inner.reap_stale_sessions();
            })?;

        Ok(Reaper {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl MasterInner {
    /// One sweep: roll back every session idle past the threshold.
    ///
    /// Returns how many sessions were reclaimed. Failures are contained
    /// per entry so one stuck session cannot stop the sweep.
    pub(crate) fn reap_stale_sessions(&self) -> usize {
        let threshold_millis = self.context.config.read_lock_timeout.as_millis() as u64;
        let now = self.context.clock.now_millis();

        let mut reaped = 0;
        for (context, entry) in self.registry.snapshot() {
            let last_activity = entry.last_activity();
            if last_activity == EXECUTING {
                continue;
            }
            let idle_millis = now.saturating_sub(last_activity);
            if idle_millis < threshold_millis {
                continue;
            }

            info!(%context, idle_millis, "found stale slave transaction");
            match self.force_rollback(&context) {
                Ok(()) => {
                    reaped += 1;
                    info!(%context, idle_millis, "rolled back stale slave transaction");
                }
                // The session started executing (or finished) between the
                // snapshot and now; it is no longer ours to reclaim.
                Err(MasterError::Tx(TxError::NotSuspended { .. }))
                | Err(MasterError::NoSuchSession { .. }) => {
                    debug!(%context, "session became active during sweep");
                }
                Err(err) => {
                    warn!(%context, error = %err, "unable to roll back stale slave transaction");
                }
            }
        }
        reaped
    }

    fn force_rollback(&self, context: &crate::context::SlaveContext) -> crate::MasterResult<()> {
        let prior = self.enter(context, false)?;
        self.leave(prior, context, Outcome::Rollback)
    }
}
