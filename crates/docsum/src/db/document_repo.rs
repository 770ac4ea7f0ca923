//! Document repository — rows describing uploaded source documents.
//!
//! Upload/download plumbing lives at the HTTP boundary; the pipeline
//! only needs existence checks and the object key for the worker.

use rusqlite::{params, Row};

use super::{now_rfc3339, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub filename: String,
    pub object_key: String,
    pub size_bytes: i64,
    pub created_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            object_key: row.get("object_key")?,
            size_bytes: row.get("size_bytes")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub object_key: String,
    pub size_bytes: i64,
}

/// Inserts a document row and returns its id.
pub fn insert(db: &Database, doc: &NewDocument) -> Result<i64, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (filename, object_key, size_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![doc.filename, doc.object_key, doc.size_bytes, now],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a document by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], DocumentRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Deletes a document row.
pub fn delete(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let id = insert(
            &db,
            &NewDocument {
                filename: "contract.pdf".to_string(),
                object_key: "2026/contract.pdf".to_string(),
                size_bytes: 2048,
            },
        )
        .unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.filename, "contract.pdf");
        assert_eq!(found.object_key, "2026/contract.pdf");
        assert_eq!(found.size_bytes, 2048);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = Database::open_in_memory().unwrap();
        assert!(find_by_id(&db, 42).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        let id = insert(
            &db,
            &NewDocument {
                filename: "a.pdf".to_string(),
                object_key: "a.pdf".to_string(),
                size_bytes: 1,
            },
        )
        .unwrap();
        delete(&db, id).unwrap();
        assert!(find_by_id(&db, id).unwrap().is_none());
    }
}
