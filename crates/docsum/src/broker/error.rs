//! Broker error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from broker operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// SQLite error from the backing message store.
    #[error("Broker store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the store directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Publish or consume against a queue that was never declared.
    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),

    /// Message payload could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The store lock was poisoned.
    #[error("Broker lock poisoned")]
    LockPoisoned,
}
