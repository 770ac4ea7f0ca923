//! Helpers for sanitizing data before it enters logs or audit records.

use std::path::Path;

use serde_json::Value;

/// Maximum length for engine error bodies to prevent log flooding.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Request-body keys that never enter an audit record.
const SENSITIVE_KEYS: &[&str] = &["password", "token"];

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields — reveals the file name without exposing the
/// full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Truncates an error body to a reasonable length, keeping useful
/// context without flooding logs or job records.
pub fn truncate_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// Removes sensitive top-level keys from a JSON object in place.
/// Non-object values are left untouched.
pub fn redact_details(details: &mut Value) {
    if let Value::Object(map) = details {
        for key in SENSITIVE_KEYS {
            map.remove(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/var/data/documents/report.pdf")),
            "report.pdf"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_truncate_short_body_unchanged() {
        assert_eq!(truncate_error_body("engine exploded"), "engine exploded");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(500);
        let truncated = truncate_error_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < body.len());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let body = "é".repeat(300);
        let truncated = truncate_error_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
    }

    #[test]
    fn test_redact_details_removes_secrets() {
        let mut details = json!({
            "mode": "simple",
            "password": "hunter2",
            "token": "abc123"
        });
        redact_details(&mut details);
        assert_eq!(details, json!({ "mode": "simple" }));
    }

    #[test]
    fn test_redact_details_ignores_non_objects() {
        let mut details = json!(["password"]);
        redact_details(&mut details);
        assert_eq!(details, json!(["password"]));
    }
}
