//! Checkpoint manager — partial progress embedded in the job row.
//!
//! A checkpoint lets a retried job resume instead of restarting. It is
//! serialized onto the job row on every save and cleared exactly when
//! the job completes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::error::CheckpointError;

/// Engine result key carrying chunk bookkeeping. Extracted into the
/// chunk counters and never stored in the generic accumulator.
pub const CHUNK_INFO_KEY: &str = "_chunk_info";

/// Separator between concatenated string fragments.
const STRING_MERGE_SEPARATOR: &str = "\n\n";

/// Partial processing state for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Pages processed so far, in save order (append-only).
    #[serde(default)]
    pub processed_pages: Vec<i64>,
    /// Accumulated partial results keyed by engine result field.
    #[serde(default)]
    pub partial_results: HashMap<String, Value>,
    /// Highest page processed; monotonically non-decreasing.
    #[serde(default)]
    pub last_page: i64,
    #[serde(default)]
    pub processed_chunks: i64,
    #[serde(default)]
    pub total_chunks: i64,
    #[serde(default)]
    pub last_chunk: i64,
}

/// Chunk progress reported by the engine alongside a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    #[serde(default)]
    pub processed_chunks: i64,
    #[serde(default)]
    pub total_chunks: i64,
    #[serde(default)]
    pub last_chunk: i64,
}

impl Checkpoint {
    /// True when this checkpoint records actual progress.
    pub fn has_progress(&self) -> bool {
        self.last_page > 0
    }
}

/// Loads the stored checkpoint, or an empty one if none is stored.
///
/// A corrupt checkpoint is an error for the caller to handle; only the
/// executor's top-level resume path downgrades it to a restart.
pub fn load(job: &JobRow) -> Result<Checkpoint, CheckpointError> {
    match job.checkpoint.as_deref() {
        None | Some("") => Ok(Checkpoint::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| CheckpointError::Corrupt {
            job_id: job.id,
            source: e,
        }),
    }
}

/// Saves progress onto the job row.
///
/// Appends `last_page` to the processed list, folds any `_chunk_info`
/// sub-structure into the chunk counters, merges the remaining partial
/// results into the accumulator (strings concatenate, lists extend,
/// anything else overwrites) and persists the job row.
pub fn save(
    db: &Database,
    job: &mut JobRow,
    last_page: i64,
    mut partial: HashMap<String, Value>,
) -> Result<(), CheckpointError> {
    // An unreadable stored checkpoint is replaced rather than failing
    // the save.
    let mut checkpoint = match load(job) {
        Ok(cp) => cp,
        Err(e) => {
            log::warn!("Replacing unreadable checkpoint on job {}: {}", job.id, e);
            Checkpoint::default()
        }
    };

    checkpoint.last_page = checkpoint.last_page.max(last_page);
    checkpoint.processed_pages.push(last_page);

    if let Some(raw) = partial.remove(CHUNK_INFO_KEY) {
        match serde_json::from_value::<ChunkInfo>(raw) {
            Ok(info) => {
                checkpoint.processed_chunks = info.processed_chunks;
                checkpoint.total_chunks = info.total_chunks;
                checkpoint.last_chunk = info.last_chunk;
            }
            Err(e) => log::warn!("Ignoring malformed chunk info on job {}: {}", job.id, e),
        }
    }

    for (key, value) in partial {
        match checkpoint.partial_results.get_mut(&key) {
            Some(Value::String(existing)) => {
                if let Value::String(new) = value {
                    existing.push_str(STRING_MERGE_SEPARATOR);
                    existing.push_str(&new);
                } else {
                    checkpoint.partial_results.insert(key, value);
                }
            }
            Some(Value::Array(existing)) => {
                if let Value::Array(new) = value {
                    existing.extend(new);
                } else {
                    checkpoint.partial_results.insert(key, value);
                }
            }
            _ => {
                checkpoint.partial_results.insert(key, value);
            }
        }
    }

    let serialized =
        serde_json::to_string(&checkpoint).map_err(|e| CheckpointError::Serialize {
            job_id: job.id,
            source: e,
        })?;
    job.checkpoint = Some(serialized);
    job.last_page = Some(checkpoint.last_page);
    job_repo::update(db, job)?;

    if checkpoint.total_chunks > 0 {
        log::info!(
            "Checkpoint saved: job {}, page {}, chunk {}/{}",
            job.id,
            checkpoint.last_page,
            checkpoint.processed_chunks,
            checkpoint.total_chunks
        );
    } else {
        log::info!(
            "Checkpoint saved: job {}, page {}",
            job.id,
            checkpoint.last_page
        );
    }
    Ok(())
}

/// Clears checkpoint data after successful completion.
pub fn clear(db: &Database, job: &mut JobRow) -> Result<(), CheckpointError> {
    job.checkpoint = None;
    job.last_page = None;
    job_repo::update(db, job)?;
    log::info!("Checkpoint cleared: job {}", job.id);
    Ok(())
}
