//! Administrative job operations backing the read/retry/delete HTTP
//! endpoints. The state-machine guards live here: only failed jobs can
//! be retried, processing jobs cannot be deleted.

use crate::broker::{Broker, JobMessage, JOB_QUEUE};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{audit_repo, Database};
use crate::error::AdminError;
use crate::model::JobStatus;

/// Lists jobs with optional status/document filters.
pub fn list_jobs(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), AdminError> {
    Ok(job_repo::query(db, filter)?)
}

/// Fetches one job.
pub fn get_job(db: &Database, id: i64) -> Result<JobRow, AdminError> {
    job_repo::find_by_id(db, id)?.ok_or(AdminError::NotFound(id))
}

/// Manually retries a failed job: resets it to pending and republishes
/// its dispatch message.
///
/// This can race an in-flight redelivery of the same job; both paths
/// write the same fields and the executor re-reads the row at delivery
/// time, so the outcome is duplicate work at worst (last writer wins).
pub fn retry_job(db: &Database, broker: &Broker, id: i64) -> Result<JobRow, AdminError> {
    let mut job = job_repo::find_by_id(db, id)?.ok_or(AdminError::NotFound(id))?;

    if job.status != JobStatus::Failed {
        return Err(AdminError::NotRetryable {
            id,
            status: job.status,
        });
    }

    job.set_status(JobStatus::Pending)?;
    job.error = None;
    job.started_at = None;
    job.completed_at = None;
    job_repo::update(db, &job)?;

    if let Err(e) = broker.publish_json(JOB_QUEUE, &JobMessage { job_id: id }) {
        log::warn!(
            "Failed to republish retried job {}: {}; sweep will pick it up",
            id,
            e
        );
    }

    log::info!("Job {} queued for manual retry", id);
    Ok(job)
}

/// Deletes a job unless it is mid-flight.
pub fn delete_job(db: &Database, id: i64) -> Result<(), AdminError> {
    let job = job_repo::find_by_id(db, id)?.ok_or(AdminError::NotFound(id))?;

    if job.status == JobStatus::Processing {
        return Err(AdminError::Processing(id));
    }

    job_repo::delete(db, id)?;
    Ok(())
}

/// Removes audit records older than `retention_days`. Returns how many
/// rows were deleted.
pub fn cleanup_audit_logs(db: &Database, retention_days: u32) -> Result<usize, AdminError> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days)))
        .to_rfc3339();
    let deleted = audit_repo::delete_older_than(db, &cutoff)?;
    if deleted > 0 {
        log::info!(
            "Audit cleanup removed {} records older than {} days",
            deleted,
            retention_days
        );
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::document_repo::{self, NewDocument};
    use crate::db::job_repo::NewJob;
    use crate::model::SummaryMode;

    fn setup() -> (Database, Broker, i64) {
        let db = Database::open_in_memory().unwrap();
        let broker = Broker::open_in_memory().unwrap();
        broker.declare_standard_queues().unwrap();

        let doc_id = document_repo::insert(
            &db,
            &NewDocument {
                filename: "doc.pdf".to_string(),
                object_key: "doc.pdf".to_string(),
                size_bytes: 10,
            },
        )
        .unwrap();
        let job_id = job_repo::insert(
            &db,
            &NewJob {
                document_id: doc_id,
                mode: SummaryMode::Simple,
                language: "english".to_string(),
                pages: None,
                question: None,
                max_retries: 3,
            },
        )
        .unwrap();
        (db, broker, job_id)
    }

    fn force_status(db: &Database, id: i64, status: JobStatus) {
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_get_job() {
        let (db, _, job_id) = setup();
        assert_eq!(get_job(&db, job_id).unwrap().id, job_id);
        assert!(matches!(get_job(&db, 999), Err(AdminError::NotFound(999))));
    }

    #[test]
    fn test_retry_failed_job() {
        let (db, broker, job_id) = setup();
        force_status(&db, job_id, JobStatus::Failed);

        let job = retry_job(&db, &broker, job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
        assert_eq!(broker.depth(JOB_QUEUE).unwrap(), 1);
    }

    #[test]
    fn test_retry_rejects_non_failed_job() {
        let (db, broker, job_id) = setup();

        let err = retry_job(&db, &broker, job_id).unwrap_err();
        assert!(matches!(
            err,
            AdminError::NotRetryable {
                status: JobStatus::Pending,
                ..
            }
        ));
        assert_eq!(broker.depth(JOB_QUEUE).unwrap(), 0);
    }

    #[test]
    fn test_delete_rejects_processing_job() {
        let (db, _, job_id) = setup();
        force_status(&db, job_id, JobStatus::Processing);

        assert!(matches!(
            delete_job(&db, job_id),
            Err(AdminError::Processing(_))
        ));
        assert!(job_repo::find_by_id(&db, job_id).unwrap().is_some());
    }

    #[test]
    fn test_delete_pending_job() {
        let (db, _, job_id) = setup();
        delete_job(&db, job_id).unwrap();
        assert!(job_repo::find_by_id(&db, job_id).unwrap().is_none());
    }

    #[test]
    fn test_list_jobs_with_filter() {
        let (db, _, job_id) = setup();
        let (rows, total) = list_jobs(
            &db,
            &JobFilter {
                status: Some(JobStatus::Pending),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, job_id);
    }
}
