use thiserror::Error;

use crate::model::{JobStatus, TransitionError};

#[derive(Error, Debug)]
pub enum DocsumError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    #[error("Engine error: {0}")]
    Engine(#[from] crate::engine::EngineError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Illegal transition: {0}")]
    Transition(#[from] TransitionError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Synchronous request-validation failures. These never enter the job
/// pipeline and map to a 4xx at the HTTP boundary.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid mode '{0}': must be simple, structured, multi or qa")]
    InvalidMode(String),

    #[error("Question is required for qa mode")]
    QuestionRequired,

    #[error("Invalid page specification '{spec}': {reason}")]
    InvalidPages { spec: String, reason: String },

    #[error("Document {0} not found")]
    DocumentNotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Corrupt checkpoint on job {job_id}: {source}")]
    Corrupt {
        job_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize checkpoint for job {job_id}: {source}")]
    Serialize {
        job_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Failures from the administrative surface.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Job {0} not found")]
    NotFound(i64),

    #[error("Only failed jobs can be retried (job {id} is {status})")]
    NotRetryable { id: i64, status: JobStatus },

    #[error("Cannot delete job {0} while it is processing")]
    Processing(i64),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Illegal transition: {0}")]
    Transition(#[from] TransitionError),
}

pub type Result<T> = std::result::Result<T, DocsumError>;
