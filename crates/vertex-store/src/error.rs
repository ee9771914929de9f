//! Store error types.

use std::io;
use thiserror::Error;

use vertex_common::types::TxId;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No data source is registered under the requested name.
    #[error("no data source registered under '{name}'")]
    UnknownDataSource {
        /// The requested name.
        name: String,
    },

    /// The transaction id is not present in the data source's log.
    #[error("transaction {tx_id} not found in data source '{data_source}'")]
    TxNotFound {
        /// The missing transaction id.
        tx_id: TxId,
        /// The data source that was searched.
        data_source: String,
    },

    /// I/O failure while applying or streaming.
    #[error("store I/O error: {source}")]
    Io {
        /// Underlying error.
        #[from]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StoreError::UnknownDataSource {
            name: "sidelog".to_string(),
        };
        assert!(err.to_string().contains("sidelog"));

        let err = StoreError::TxNotFound {
            tx_id: TxId::new(17),
            data_source: "vertexstore".to_string(),
        };
        assert!(err.to_string().contains("17"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
