//! Job repository — CRUD operations for the `jobs` table.

use rusqlite::{params, Row};

use super::{now_rfc3339, Database, DatabaseError};
use crate::model::{JobStatus, SummaryMode, TransitionError};

/// A job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub document_id: i64,
    pub status: JobStatus,
    pub mode: SummaryMode,
    pub language: String,
    pub pages: Option<String>,
    pub question: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub checkpoint: Option<String>,
    pub last_page: Option<i64>,
    pub summary_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            status: row.get("status")?,
            mode: row.get("mode")?,
            language: row.get("language")?,
            pages: row.get("pages")?,
            question: row.get("question")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            error: row.get("error")?,
            checkpoint: row.get("checkpoint")?,
            last_page: row.get("last_page")?,
            summary_id: row.get("summary_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    /// Moves the job to `to`, rejecting transitions outside the table.
    pub fn set_status(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(to)?;
        Ok(())
    }
}

/// Fields needed to create a job. Everything else starts at its
/// pending-state default.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub document_id: i64,
    pub mode: SummaryMode,
    pub language: String,
    pub pages: Option<String>,
    pub question: Option<String>,
    pub max_retries: u32,
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub document_id: Option<i64>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new pending job and returns its id.
pub fn insert(db: &Database, job: &NewJob) -> Result<i64, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (document_id, status, mode, language, pages, question,
             retry_count, max_retries, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?8)",
            params![
                job.document_id,
                JobStatus::Pending,
                job.mode,
                job.language,
                job.pages,
                job.question,
                job.max_retries,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Updates an existing job row. All mutable fields are overwritten and
/// `updated_at` is bumped.
pub fn update(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status=?2, language=?3, pages=?4, question=?5,
             retry_count=?6, max_retries=?7, error=?8, checkpoint=?9, last_page=?10,
             summary_id=?11, updated_at=?12, started_at=?13, completed_at=?14
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.language,
                job.pages,
                job.question,
                job.retry_count,
                job.max_retries,
                job.error,
                job.checkpoint,
                job.last_page,
                job.summary_id,
                now,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status));
        }
        if let Some(document_id) = filter.document_id {
            conditions.push(format!("document_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(document_id));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results, newest first.
        let limit = filter.limit.unwrap_or(50) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Returns ids of pending jobs not touched since `cutoff` (RFC 3339).
/// These are candidates for republish by the reconciliation sweep.
pub fn stale_pending(db: &Database, cutoff: &str) -> Result<Vec<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs WHERE status = 'pending' AND updated_at < ?1 ORDER BY id",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![cutoff], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Bumps `updated_at` without touching anything else (used after a
/// sweep republish so the same job is not republished every tick).
pub fn touch(db: &Database, id: i64) -> Result<(), DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

/// Deletes a job row.
pub fn delete(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(())
    })
}
