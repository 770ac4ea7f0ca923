//! Job dispatcher — turns a validated summarization request into a
//! pending job row plus a dispatch message.
//!
//! Validation failures never enter the pipeline. A failed publish is
//! deliberately not an error: the persisted job survives a broker
//! outage and the reconciliation sweep republishes it later.

use crate::broker::{Broker, JobMessage, JOB_QUEUE};
use crate::db::job_repo::{self, JobRow, NewJob};
use crate::db::{document_repo, Database, DatabaseError};
use crate::error::DispatchError;
use crate::model::SummaryMode;

/// Default language when the request leaves it unset.
const DEFAULT_LANGUAGE: &str = "english";

/// An incoming summarization request, as the HTTP layer hands it over.
#[derive(Debug, Clone)]
pub struct SummarizeJobRequest {
    pub document_id: i64,
    pub mode: String,
    pub language: Option<String>,
    pub pages: Option<String>,
    pub question: Option<String>,
}

pub struct JobDispatcher {
    db: Database,
    broker: Broker,
    max_retries: u32,
}

impl JobDispatcher {
    pub fn new(db: Database, broker: Broker, max_retries: u32) -> Self {
        Self {
            db,
            broker,
            max_retries,
        }
    }

    /// Validates the request, creates a pending job and publishes its
    /// dispatch message. Returns the created job row.
    pub fn dispatch(&self, request: &SummarizeJobRequest) -> Result<JobRow, DispatchError> {
        let mode = SummaryMode::parse(&request.mode)
            .ok_or_else(|| DispatchError::InvalidMode(request.mode.clone()))?;

        if mode == SummaryMode::Qa
            && request
                .question
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(DispatchError::QuestionRequired);
        }

        if let Some(pages) = request.pages.as_deref() {
            validate_page_spec(pages)?;
        }

        if document_repo::find_by_id(&self.db, request.document_id)?.is_none() {
            return Err(DispatchError::DocumentNotFound(request.document_id));
        }

        let language = match request.language.as_deref() {
            Some(l) if !l.trim().is_empty() => l.trim().to_lowercase(),
            _ => DEFAULT_LANGUAGE.to_string(),
        };

        let job_id = job_repo::insert(
            &self.db,
            &NewJob {
                document_id: request.document_id,
                mode,
                language,
                pages: request.pages.clone(),
                question: request.question.clone(),
                max_retries: self.max_retries,
            },
        )?;

        let job = job_repo::find_by_id(&self.db, job_id)?.ok_or(DispatchError::Database(
            DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows),
        ))?;

        // The job row is the source of truth; the message is only transport.
        if let Err(e) = self.broker.publish_json(JOB_QUEUE, &JobMessage { job_id }) {
            log::warn!(
                "Failed to publish job {}: {}; job stays pending until republished",
                job_id,
                e
            );
        } else {
            log::info!("Published job {} to '{}'", job_id, JOB_QUEUE);
        }

        Ok(job)
    }
}

/// Validates a page specification like `1-5,7,9`.
fn validate_page_spec(spec: &str) -> Result<(), DispatchError> {
    let invalid = |reason: &str| DispatchError::InvalidPages {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let tokens: Vec<&str> = spec.split(',').map(str::trim).collect();
    if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
        return Err(invalid("empty page entry"));
    }

    for token in tokens {
        match token.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| invalid("range start is not a number"))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| invalid("range end is not a number"))?;
                if start == 0 || end < start {
                    return Err(invalid("range out of order"));
                }
            }
            None => {
                let page: u32 = token.parse().map_err(|_| invalid("not a number"))?;
                if page == 0 {
                    return Err(invalid("pages are numbered from 1"));
                }
            }
        }
    }
    Ok(())
}
