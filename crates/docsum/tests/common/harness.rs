//! Test harness for end-to-end pipeline tests.
//!
//! Wires an in-memory database and broker to the executor, with a
//! scripted engine standing in for the external summarization service
//! and a temp-dir object store holding one sample document.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use docsum::broker::{Broker, JOB_QUEUE};
use docsum::db::document_repo::{self, NewDocument};
use docsum::db::job_repo::{self, JobRow};
use docsum::dispatch::{JobDispatcher, SummarizeJobRequest};
use docsum::engine::{
    EngineError, EngineOutput, EngineResult, SummarizationEngine, SummarizeRequest,
};
use docsum::storage::FsStore;
use docsum::worker::JobExecutor;
use docsum::Database;

/// Engine double returning pre-scripted responses in order.
#[derive(Default)]
pub struct ScriptedEngine {
    responses: Mutex<VecDeque<Result<EngineResult, EngineError>>>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn push_ok(&self, output: EngineOutput) {
        self.push_result(Ok(EngineResult {
            output,
            chunk_info: None,
        }));
    }

    pub fn push_service_error(&self, status: u16, body: &str) {
        self.push_result(Err(EngineError::Service {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_result(&self, result: Result<EngineResult, EngineError>) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SummarizationEngine for ScriptedEngine {
    async fn summarize(&self, _request: SummarizeRequest) -> Result<EngineResult, EngineError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(EngineError::InvalidResponse {
                    reason: "no scripted response left".to_string(),
                })
            })
    }
}

pub struct TestHarness {
    pub db: Database,
    pub broker: Broker,
    pub dispatcher: JobDispatcher,
    pub executor: JobExecutor,
    pub engine: Arc<ScriptedEngine>,
    pub document_id: i64,
    store_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_max_retries(3)
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        let db = Database::open_in_memory().expect("open database");
        let broker = Broker::open_in_memory().expect("open broker");
        broker.declare_standard_queues().expect("declare queues");

        let store_dir = TempDir::new().expect("create store dir");
        std::fs::write(store_dir.path().join("doc.pdf"), b"%PDF-1.4 test document")
            .expect("write sample document");

        let document_id = document_repo::insert(
            &db,
            &NewDocument {
                filename: "doc.pdf".to_string(),
                object_key: "doc.pdf".to_string(),
                size_bytes: 22,
            },
        )
        .expect("insert document");

        let engine = Arc::new(ScriptedEngine::default());
        let store = Arc::new(FsStore::new(store_dir.path()));

        let dispatcher = JobDispatcher::new(db.clone(), broker.clone(), max_retries);
        let executor = JobExecutor::new(
            db.clone(),
            broker.clone(),
            Arc::clone(&engine) as Arc<dyn SummarizationEngine>,
            store,
        );

        Self {
            db,
            broker,
            dispatcher,
            executor,
            engine,
            document_id,
            store_dir,
        }
    }

    /// Dispatches a job for the sample document.
    pub fn dispatch(&self, mode: &str, question: Option<&str>) -> JobRow {
        self.dispatcher
            .dispatch(&SummarizeJobRequest {
                document_id: self.document_id,
                mode: mode.to_string(),
                language: None,
                pages: None,
                question: question.map(|q| q.to_string()),
            })
            .expect("dispatch job")
    }

    /// Processes one delivery from the job queue if there is one.
    pub async fn run_one(&self) -> bool {
        let consumer = self.broker.consumer(JOB_QUEUE);
        match consumer
            .recv_timeout(Duration::from_millis(200))
            .await
            .expect("consume")
        {
            Some(delivery) => {
                self.executor
                    .handle_delivery(delivery)
                    .await
                    .expect("handle delivery");
                true
            }
            None => false,
        }
    }

    /// Reloads a job row.
    pub fn job(&self, id: i64) -> JobRow {
        job_repo::find_by_id(&self.db, id)
            .expect("load job")
            .expect("job exists")
    }
}
