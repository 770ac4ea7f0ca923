//! Summary repository — persisted summarization results.

use rusqlite::{params, Row};

use super::{now_rfc3339, Database, DatabaseError};
use crate::model::SummaryMode;

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub id: i64,
    pub document_id: i64,
    pub mode: SummaryMode,
    pub language: String,
    pub pages_processed: Option<String>,
    pub summary_text: Option<String>,
    pub executive_summary: Option<String>,
    /// JSON-serialized list of bullet points.
    pub bullets: Option<String>,
    /// JSON-serialized list of highlights.
    pub highlights: Option<String>,
    pub qa_question: Option<String>,
    pub qa_answer: Option<String>,
    /// Wall-clock engine time in seconds.
    pub processing_time: f64,
    pub created_at: String,
}

impl SummaryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            mode: row.get("mode")?,
            language: row.get("language")?,
            pages_processed: row.get("pages_processed")?,
            summary_text: row.get("summary_text")?,
            executive_summary: row.get("executive_summary")?,
            bullets: row.get("bullets")?,
            highlights: row.get("highlights")?,
            qa_question: row.get("qa_question")?,
            qa_answer: row.get("qa_answer")?,
            processing_time: row.get("processing_time")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A summary ready to persist. `id`/`created_at` are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewSummary {
    pub document_id: i64,
    pub mode: SummaryMode,
    pub language: String,
    pub pages_processed: Option<String>,
    pub summary_text: Option<String>,
    pub executive_summary: Option<String>,
    pub bullets: Option<String>,
    pub highlights: Option<String>,
    pub qa_question: Option<String>,
    pub qa_answer: Option<String>,
    pub processing_time: f64,
}

impl NewSummary {
    /// A summary with no result fields populated yet.
    pub fn empty(document_id: i64, mode: SummaryMode, language: &str) -> Self {
        Self {
            document_id,
            mode,
            language: language.to_string(),
            pages_processed: None,
            summary_text: None,
            executive_summary: None,
            bullets: None,
            highlights: None,
            qa_question: None,
            qa_answer: None,
            processing_time: 0.0,
        }
    }
}

/// Inserts a summary and returns its id.
pub fn insert(db: &Database, summary: &NewSummary) -> Result<i64, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO summaries (document_id, mode, language, pages_processed,
             summary_text, executive_summary, bullets, highlights, qa_question,
             qa_answer, processing_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                summary.document_id,
                summary.mode,
                summary.language,
                summary.pages_processed,
                summary.summary_text,
                summary.executive_summary,
                summary.bullets,
                summary.highlights,
                summary.qa_question,
                summary.qa_answer,
                summary.processing_time,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a summary by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<SummaryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM summaries WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], SummaryRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists summaries for one document, newest first.
pub fn list_by_document(db: &Database, document_id: i64) -> Result<Vec<SummaryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM summaries WHERE document_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows: Vec<SummaryRow> = stmt
            .query_map(params![document_id], SummaryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a summary row.
pub fn delete(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM summaries WHERE id = ?1", params![id])?;
        Ok(())
    })
}
