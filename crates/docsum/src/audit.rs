//! Audit trail publishing.
//!
//! Every finished HTTP request becomes one `AuditRecord`, published
//! fire-and-forget so the response is never delayed by the audit path.
//! A dedicated consumer (`worker::audit`) persists the records.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::broker::{Broker, AUDIT_QUEUE};
use crate::sanitize;

/// Request bodies at or above this size are left out of the details.
const MAX_DETAILS_BODY_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
        }
    }
}

impl ToSql for AuditStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AuditStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            other => Err(FromSqlError::Other(
                format!("unknown audit status '{}'", other).into(),
            )),
        }
    }
}

/// One immutable audit entry. Created at request completion, persisted
/// asynchronously, removed only by retention cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    /// Method and path, e.g. `POST /api/jobs`.
    pub action: String,
    pub resource: String,
    /// JSON snippet of request context, secrets redacted.
    pub details: String,
    pub client_addr: String,
    pub status: AuditStatus,
    pub duration_ms: i64,
}

/// What the HTTP layer knows about a finished request.
#[derive(Debug, Clone, Default)]
pub struct RequestSummary {
    /// Request start time, RFC 3339.
    pub timestamp: String,
    pub method: String,
    pub path: String,
    /// Named path parameters, e.g. `[("job_id", "7")]`.
    pub path_params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub client_addr: String,
    pub status_code: u16,
    pub duration_ms: i64,
}

/// Builds the audit record for one finished request.
pub fn build_record(request: &RequestSummary) -> AuditRecord {
    let status = if request.status_code < 400 {
        AuditStatus::Success
    } else {
        AuditStatus::Failed
    };

    AuditRecord {
        timestamp: request.timestamp.clone(),
        action: format!("{} {}", request.method, request.path),
        resource: infer_resource(request),
        details: build_details(request),
        client_addr: request.client_addr.clone(),
        status,
        duration_ms: request.duration_ms,
    }
}

/// Infers a `type:id` resource label from path parameters, falling
/// back to the raw path.
fn infer_resource(request: &RequestSummary) -> String {
    for (name, value) in &request.path_params {
        let kind = match name.as_str() {
            "job_id" => "job",
            "summary_id" => "summary",
            "id" => resource_type(&request.path),
            _ => continue,
        };
        return format!("{}:{}", kind, value);
    }
    request.path.clone()
}

fn resource_type(path: &str) -> &'static str {
    if path.contains("/documents") {
        "document"
    } else if path.contains("/jobs") {
        "job"
    } else if path.contains("/summaries") {
        "summary"
    } else {
        "unknown"
    }
}

/// Builds the redacted details snippet: query parameters plus a small
/// JSON body for mutating requests.
fn build_details(request: &RequestSummary) -> String {
    let mut details = serde_json::Map::new();

    if !request.query.is_empty() {
        let query: serde_json::Map<String, Value> = request
            .query
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        details.insert("query".to_string(), Value::Object(query));
    }

    if matches!(request.method.as_str(), "POST" | "PUT") {
        if let Some(body) = &request.body {
            if !body.is_empty() && body.len() < MAX_DETAILS_BODY_BYTES {
                if let Ok(mut parsed) = serde_json::from_slice::<Value>(body) {
                    sanitize::redact_details(&mut parsed);
                    details.insert("body".to_string(), parsed);
                }
            }
        }
    }

    if details.is_empty() {
        "{}".to_string()
    } else {
        Value::Object(details).to_string()
    }
}

/// Fire-and-forget publisher for audit records.
#[derive(Clone)]
pub struct AuditPublisher {
    broker: Broker,
}

impl AuditPublisher {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Builds and publishes the record for a finished request. Publish
    /// failures are logged and swallowed: the audit trail must never
    /// fail a response.
    pub fn record(&self, request: &RequestSummary) {
        self.publish(&build_record(request));
    }

    pub fn publish(&self, record: &AuditRecord) {
        if let Err(e) = self.broker.publish_json(AUDIT_QUEUE, record) {
            log::warn!("Failed to publish audit record for '{}': {}", record.action, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> RequestSummary {
        RequestSummary {
            timestamp: "2026-08-01T10:00:00+00:00".to_string(),
            method: "POST".to_string(),
            path: "/api/documents/3/summarize".to_string(),
            path_params: vec![("id".to_string(), "3".to_string())],
            query: vec![],
            body: Some(br#"{"mode": "simple", "token": "secret"}"#.to_vec()),
            client_addr: "10.0.0.5".to_string(),
            status_code: 201,
            duration_ms: 42,
        }
    }

    #[test]
    fn test_build_record_action_and_status() {
        let record = build_record(&sample_request());
        assert_eq!(record.action, "POST /api/documents/3/summarize");
        assert_eq!(record.status, AuditStatus::Success);
        assert_eq!(record.duration_ms, 42);
        assert_eq!(record.client_addr, "10.0.0.5");
    }

    #[test]
    fn test_error_status_codes_are_failed() {
        let mut request = sample_request();
        request.status_code = 404;
        assert_eq!(build_record(&request).status, AuditStatus::Failed);
    }

    #[test]
    fn test_resource_from_path_params() {
        let record = build_record(&sample_request());
        assert_eq!(record.resource, "document:3");

        let mut request = sample_request();
        request.path = "/api/jobs/12".to_string();
        request.path_params = vec![("job_id".to_string(), "12".to_string())];
        assert_eq!(build_record(&request).resource, "job:12");

        request.path = "/api/summaries/4".to_string();
        request.path_params = vec![("summary_id".to_string(), "4".to_string())];
        assert_eq!(build_record(&request).resource, "summary:4");
    }

    #[test]
    fn test_resource_falls_back_to_path() {
        let mut request = sample_request();
        request.path = "/api/jobs".to_string();
        request.path_params = vec![];
        assert_eq!(build_record(&request).resource, "/api/jobs");
    }

    #[test]
    fn test_details_redact_secrets() {
        let record = build_record(&sample_request());
        let details: Value = serde_json::from_str(&record.details).unwrap();
        assert_eq!(details["body"]["mode"], "simple");
        assert!(details["body"].get("token").is_none());
    }

    #[test]
    fn test_details_skip_large_bodies() {
        let mut request = sample_request();
        request.body = Some(vec![b'x'; MAX_DETAILS_BODY_BYTES]);
        let record = build_record(&request);
        assert_eq!(record.details, "{}");
    }

    #[test]
    fn test_details_include_query() {
        let mut request = sample_request();
        request.method = "GET".to_string();
        request.body = None;
        request.query = vec![("status".to_string(), "failed".to_string())];
        let record = build_record(&request);
        let details: Value = serde_json::from_str(&record.details).unwrap();
        assert_eq!(details["query"]["status"], "failed");
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let record = build_record(&sample_request());
        let bytes = serde_json::to_vec(&record).unwrap();
        let decoded: AuditRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, record);
    }
}
