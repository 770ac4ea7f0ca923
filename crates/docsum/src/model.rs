//! Core domain types: job status, summarization mode and the status
//! transition table.
//!
//! Statuses are a closed enum — unknown strings read back from the
//! database are a hard error, and transitions outside the table are
//! rejected at the call site.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a summarization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A status transition outside the lifecycle table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal job status transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether `self -> to` is in the lifecycle table.
    ///
    /// `completed` is terminal. `failed` is terminal for the executor;
    /// the single allowed exit is the manual retry back to `pending`.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }

    /// Validates `self -> to`, returning the target on success.
    pub fn transition_to(&self, to: JobStatus) -> Result<JobStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: *self, to })
        }
    }

    /// Terminal states accept no executor-driven transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        JobStatus::parse(s).ok_or_else(|| {
            FromSqlError::Other(format!("unknown job status '{}'", s).into())
        })
    }
}

/// The kind of summarization requested, selecting the engine endpoint
/// and the result schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    Simple,
    Structured,
    Multi,
    Qa,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryMode::Simple => "simple",
            SummaryMode::Structured => "structured",
            SummaryMode::Multi => "multi",
            SummaryMode::Qa => "qa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(SummaryMode::Simple),
            "structured" => Some(SummaryMode::Structured),
            "multi" => Some(SummaryMode::Multi),
            "qa" => Some(SummaryMode::Qa),
            _ => None,
        }
    }

    /// Engine endpoint path for this mode.
    pub fn endpoint(&self) -> &'static str {
        match self {
            SummaryMode::Simple => "/summarize",
            SummaryMode::Structured => "/summarize-structured",
            SummaryMode::Multi => "/summarize-multi",
            SummaryMode::Qa => "/qa",
        }
    }
}

impl std::fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SummaryMode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SummaryMode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        SummaryMode::parse(s).ok_or_else(|| {
            FromSqlError::Other(format!("unknown summary mode '{}'", s).into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        // Retry resets processing back to pending.
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Pending));
        // Manual retry of a terminally failed job.
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));

        let err = JobStatus::Completed
            .transition_to(JobStatus::Pending)
            .unwrap_err();
        assert_eq!(err.from, JobStatus::Completed);
        assert_eq!(err.to, JobStatus::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_mode_roundtrip_and_endpoints() {
        assert_eq!(SummaryMode::parse("simple"), Some(SummaryMode::Simple));
        assert_eq!(SummaryMode::parse("qa"), Some(SummaryMode::Qa));
        assert_eq!(SummaryMode::parse("detailed"), None);

        assert_eq!(SummaryMode::Simple.endpoint(), "/summarize");
        assert_eq!(SummaryMode::Structured.endpoint(), "/summarize-structured");
        assert_eq!(SummaryMode::Multi.endpoint(), "/summarize-multi");
        assert_eq!(SummaryMode::Qa.endpoint(), "/qa");
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::from_str::<SummaryMode>("\"structured\"").unwrap(),
            SummaryMode::Structured
        );
    }
}
