//! Object storage for source documents.
//!
//! The pipeline only needs two operations: fetch a document's bytes by
//! its object key, and delete an object by key. The production object
//! store sits behind this trait; `FsStore` backs local deployments and
//! tests.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub mod fs;

pub use fs::FsStore;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Phrased after the backing store's own error so the retry
    /// classifier treats a missing object as permanent.
    #[error("The specified key does not exist: {0}")]
    NotFound(String),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read/delete access to stored documents.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches the full contents of the object at `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deletes the object at `key`. Deleting a missing object is an
    /// error, matching the backing store's behavior.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
