//! Audit repository — append-only request audit trail.
//!
//! Rows are written by the audit consumer, never updated, and removed
//! only by the bulk retention cleanup.

use rusqlite::{params, Row};

use super::{now_rfc3339, Database, DatabaseError};
use crate::audit::{AuditRecord, AuditStatus};

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub resource: String,
    pub details: String,
    pub client_addr: String,
    pub status: AuditStatus,
    pub duration_ms: i64,
    pub created_at: String,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            action: row.get("action")?,
            resource: row.get("resource")?,
            details: row.get("details")?,
            client_addr: row.get("client_addr")?,
            status: row.get("status")?,
            duration_ms: row.get("duration_ms")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Query filter parameters for audit listing.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    /// Substring match on the action.
    pub action: Option<String>,
    pub status: Option<AuditStatus>,
    /// Substring match on the resource.
    pub resource: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Persists one audit record.
pub fn insert(db: &Database, record: &AuditRecord) -> Result<i64, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO audit_log (timestamp, action, resource, details, client_addr,
             status, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.timestamp,
                record.action,
                record.resource,
                record.details,
                record.client_addr,
                record.status,
                record.duration_ms,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Queries audit rows with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &AuditFilter) -> Result<(Vec<AuditRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref action) = filter.action {
            conditions.push(format!("action LIKE ?{}", param_values.len() + 1));
            param_values.push(Box::new(format!("%{}%", action)));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status));
        }
        if let Some(ref resource) = filter.resource {
            conditions.push(format!("resource LIKE ?{}", param_values.len() + 1));
            param_values.push(Box::new(format!("%{}%", resource)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM audit_log {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(50) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM audit_log {} ORDER BY timestamp DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<AuditRow> = stmt
            .query_map(params_ref.as_slice(), AuditRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Deletes audit rows older than `cutoff` (RFC 3339). Returns how many
/// rows were removed.
pub fn delete_older_than(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM audit_log WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}
