//! Job executor — drives the job state machine off broker deliveries.
//!
//! Per delivery: load the job, load its checkpoint, call the engine,
//! then either persist the summary and ack, or record the failure and
//! nack. The checkpoint is always saved before the disposition is
//! decided, so a crash between the two costs a redelivery, never
//! progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info_span, Instrument};

use crate::broker::{Broker, Delivery, JobMessage, JOB_QUEUE};
use crate::checkpoint::{self, Checkpoint};
use crate::db::job_repo::{self, JobRow};
use crate::db::summary_repo::{self, NewSummary};
use crate::db::{document_repo, now_rfc3339, Database};
use crate::engine::{EngineOutput, EngineResult, SummarizationEngine, SummarizeRequest};
use crate::error::Result;
use crate::model::JobStatus;
use crate::retry::{self, ErrorClass};
use crate::sanitize;
use crate::storage::ObjectStore;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// How a processed delivery is resolved against the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Terminal success, or nothing to do.
    Ack,
    /// Transient failure with budget left: redeliver.
    Requeue,
    /// Permanent failure or exhausted budget: dead-letter.
    DeadLetter,
}

pub struct JobExecutor {
    db: Database,
    broker: Broker,
    engine: Arc<dyn SummarizationEngine>,
    store: Arc<dyn ObjectStore>,
}

impl JobExecutor {
    pub fn new(
        db: Database,
        broker: Broker,
        engine: Arc<dyn SummarizationEngine>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            db,
            broker,
            engine,
            store,
        }
    }

    /// Consume loop. Checks the shutdown flag between bounded waits,
    /// so shutdown is observed within `RECV_TIMEOUT`.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        log::info!("Job executor started, consuming '{}'", JOB_QUEUE);
        let consumer = self.broker.consumer(JOB_QUEUE);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match consumer.recv_timeout(RECV_TIMEOUT).await {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.handle_delivery(delivery).await {
                        log::error!("Job processing error: {}", e);
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Failed to consume from '{}': {}", JOB_QUEUE, e);
                    tokio::time::sleep(RECV_TIMEOUT).await;
                }
            }
        }

        log::info!("Job executor stopped");
    }

    /// Processes one delivery end to end and resolves it.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        let message: JobMessage = match serde_json::from_slice(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed dispatch message: {}", e);
                delivery.nack(false)?;
                return Ok(());
            }
        };

        let span = info_span!("job", job_id = message.job_id);
        self.handle_message(message, delivery).instrument(span).await
    }

    async fn handle_message(&self, message: JobMessage, delivery: Delivery) -> Result<()> {
        // A message without a job row is poison: there is nothing to
        // act on and nothing to retry.
        let Some(mut job) = job_repo::find_by_id(&self.db, message.job_id)? else {
            tracing::info!("no job row for message, dropping");
            delivery.ack()?;
            return Ok(());
        };

        let disposition = self.process(&mut job).await?;
        match disposition {
            Disposition::Ack => delivery.ack()?,
            Disposition::Requeue => delivery.nack(true)?,
            Disposition::DeadLetter => delivery.nack(false)?,
        }
        Ok(())
    }

    async fn process(&self, job: &mut JobRow) -> Result<Disposition> {
        // In this resume path a corrupt checkpoint restarts the job
        // from scratch instead of wedging it.
        let checkpoint = match checkpoint::load(job) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!("unreadable checkpoint, restarting from scratch: {}", e);
                Checkpoint::default()
            }
        };
        if checkpoint.has_progress() {
            if checkpoint.total_chunks > 0 {
                tracing::info!(
                    last_page = checkpoint.last_page,
                    chunk = checkpoint.processed_chunks,
                    total_chunks = checkpoint.total_chunks,
                    "resuming from checkpoint"
                );
            } else {
                tracing::info!(last_page = checkpoint.last_page, "resuming from checkpoint");
            }
        }

        match job.status {
            // Duplicate delivery of finished work (at-least-once): drop it.
            JobStatus::Completed | JobStatus::Failed => {
                tracing::info!(status = %job.status, "job already terminal, dropping duplicate delivery");
                return Ok(Disposition::Ack);
            }
            JobStatus::Pending => job.set_status(JobStatus::Processing)?,
            // A crashed run left the job mid-flight; this redelivery takes over.
            JobStatus::Processing => {
                tracing::warn!("job already marked processing, assuming crashed run");
            }
        }
        job.started_at = Some(now_rfc3339());
        job_repo::update(&self.db, job)?;

        let started = Instant::now();
        let outcome = self.call_engine(job).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => self.complete(job, &checkpoint, result, elapsed),
            Err(error) => self.fail(job, &checkpoint, error),
        }
    }

    /// Fetches the document and calls the engine. Errors collapse to
    /// their display text, which is what the classifier and the job
    /// record both consume.
    async fn call_engine(&self, job: &JobRow) -> std::result::Result<EngineResult, String> {
        let document = document_repo::find_by_id(&self.db, job.document_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("file not found: document {} has no record", job.document_id))?;

        tracing::debug!(
            file = %sanitize::redact_path(std::path::Path::new(&document.object_key)),
            "fetching document"
        );
        let content = self
            .store
            .fetch(&document.object_key)
            .await
            .map_err(|e| e.to_string())?;

        let request = SummarizeRequest {
            filename: document.filename,
            content,
            mode: job.mode,
            language: job.language.clone(),
            pages: job.pages.clone(),
            question: job.question.clone(),
        };
        self.engine
            .summarize(request)
            .await
            .map_err(|e| e.to_string())
    }

    fn complete(
        &self,
        job: &mut JobRow,
        checkpoint: &Checkpoint,
        result: EngineResult,
        elapsed: Duration,
    ) -> Result<Disposition> {
        let mut output = result.output;
        if checkpoint.has_progress() && !checkpoint.partial_results.is_empty() {
            tracing::info!("merging checkpoint partials into result");
            output.merge_partial(&checkpoint.partial_results);
        }

        let summary = build_summary(job, &output, elapsed.as_secs_f64());
        let summary_id = match summary_repo::insert(&self.db, &summary) {
            Ok(id) => id,
            // The engine work succeeded but the result is not durably
            // linked, so the job is failed rather than resurfaced.
            Err(e) => {
                let message = format!("failed to save summary: {}", e);
                tracing::error!("{}", message);
                job.error = Some(message);
                job.set_status(JobStatus::Failed)?;
                job.completed_at = Some(now_rfc3339());
                job_repo::update(&self.db, job)?;
                return Ok(Disposition::DeadLetter);
            }
        };

        checkpoint::clear(&self.db, job)?;
        job.set_status(JobStatus::Completed)?;
        job.completed_at = Some(now_rfc3339());
        job.summary_id = Some(summary_id);
        job_repo::update(&self.db, job)?;

        tracing::info!(summary_id, "job completed");
        Ok(Disposition::Ack)
    }

    fn fail(
        &self,
        job: &mut JobRow,
        checkpoint: &Checkpoint,
        error: String,
    ) -> Result<Disposition> {
        // Save progress before deciding the disposition; a crash after
        // this point costs a redelivery, not the checkpoint.
        if checkpoint.has_progress() {
            if let Err(e) = checkpoint::save(&self.db, job, checkpoint.last_page, HashMap::new()) {
                tracing::warn!("failed to save checkpoint before disposition: {}", e);
            }
        }

        let class = retry::classify(&error);
        job.retry_count += 1;
        job.error = Some(error.clone());

        if class == ErrorClass::Permanent || job.retry_count >= job.max_retries {
            job.set_status(JobStatus::Failed)?;
            job.completed_at = Some(now_rfc3339());
            job_repo::update(&self.db, job)?;

            if class == ErrorClass::Permanent {
                tracing::warn!(error = %error, "permanent error, job failed");
            } else {
                tracing::warn!(
                    retries = job.retry_count,
                    "retry budget exhausted, job failed"
                );
            }
            Ok(Disposition::DeadLetter)
        } else {
            job.set_status(JobStatus::Pending)?;
            job.started_at = None;
            job_repo::update(&self.db, job)?;

            tracing::info!(
                attempt = job.retry_count,
                max_retries = job.max_retries,
                last_page = checkpoint.last_page,
                "transient failure, job reset for retry"
            );
            Ok(Disposition::Requeue)
        }
    }
}

/// Maps a typed engine output into a summary row for the job's mode.
fn build_summary(job: &JobRow, output: &EngineOutput, processing_time: f64) -> NewSummary {
    let mut summary = NewSummary::empty(job.document_id, job.mode, &job.language);
    summary.pages_processed = job.pages.clone();
    summary.processing_time = processing_time;

    match output {
        EngineOutput::Simple { summary: text } => {
            summary.summary_text = Some(text.clone());
        }
        EngineOutput::Structured {
            executive_summary,
            bullets,
            highlights,
        } => {
            summary.executive_summary = Some(executive_summary.clone());
            summary.bullets = Some(serde_json::to_string(bullets).unwrap_or_default());
            summary.highlights = Some(serde_json::to_string(highlights).unwrap_or_default());
        }
        EngineOutput::Multi {
            combined_summary,
            executive_summary,
        } => {
            summary.summary_text = Some(combined_summary.clone());
            summary.executive_summary = executive_summary.clone();
        }
        EngineOutput::Qa { answer } => {
            summary.qa_answer = Some(answer.clone());
            summary.qa_question = job.question.clone();
        }
    }

    summary
}
