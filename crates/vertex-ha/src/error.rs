//! Master coordinator error types.

use std::io;
use thiserror::Error;

use vertex_store::StoreError;
use vertex_txn::TxError;

use crate::context::SlaveContext;

/// Result type for master operations.
pub type MasterResult<T> = Result<T, MasterError>;

/// Errors that can cross the master's operation surface.
///
/// Deadlocks and unlockable resources are *not* errors; they flow back as
/// [`crate::master::LockResult`] values so the slave can retry.
#[derive(Debug, Error)]
pub enum MasterError {
    /// The master holds no transaction for the given context. The usual
    /// cause is a master switch after the slave started its transaction;
    /// the state from the previous master is not transferred.
    #[error(
        "transaction for {context} not started on this master; a master \
         switch may have occurred since it began, and it cannot continue here"
    )]
    NoSuchSession {
        /// The unknown session.
        context: SlaveContext,
    },

    /// Storage-layer failure (unknown data source, missing tx, I/O).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transaction lifecycle failure (resume conflicts and the like).
    #[error(transparent)]
    Tx(#[from] TxError),

    /// I/O failure outside the storage layer (store-copy streaming).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A broken internal expectation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MasterError {
    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertex_common::types::MachineId;

    #[test]
    fn test_no_such_session_message() {
        let context = SlaveContext::new(MachineId::new(3), 7, 1, Vec::new());
        let err = MasterError::NoSuchSession { context };
        let message = err.to_string();
        assert!(message.contains("machine=3"));
        assert!(message.contains("master switch"));
    }

    #[test]
    fn test_store_error_conversion() {
        let err: MasterError = StoreError::UnknownDataSource {
            name: "sidelog".into(),
        }
        .into();
        assert!(matches!(err, MasterError::Store(_)));
    }
}
