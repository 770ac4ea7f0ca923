pub mod admin;
pub mod audit;
pub mod broker;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod retry;
pub mod sanitize;
pub mod storage;
pub mod worker;

pub use audit::{AuditPublisher, AuditRecord};
pub use broker::{Broker, JobMessage};
pub use config::Config;
pub use db::Database;
pub use dispatch::{JobDispatcher, SummarizeJobRequest};
pub use engine::{HttpEngine, SummarizationEngine};
pub use error::{AdminError, DispatchError, DocsumError, Result};
pub use model::{JobStatus, SummaryMode};
pub use storage::{FsStore, ObjectStore};
pub use worker::{AuditConsumer, JobExecutor, PendingSweep};
