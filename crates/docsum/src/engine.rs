//! Summarization engine client.
//!
//! The engine is an external HTTP service with one endpoint per mode.
//! Requests are multipart uploads of the document plus optional
//! language/pages/question fields; responses are parsed into a typed
//! per-mode result instead of a free-form map. Only the checkpoint
//! accumulator stays generic.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::checkpoint::ChunkInfo;
use crate::model::SummaryMode;
use crate::sanitize;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("Engine request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response. The body text feeds the retry classifier.
    #[error("Engine returned {status}: {body}")]
    Service { status: u16, body: String },

    /// 2xx response whose body did not match the mode's schema.
    #[error("Invalid engine response: {reason}")]
    InvalidResponse { reason: String },
}

/// One summarization call.
#[derive(Debug, Clone)]
pub struct SummarizeRequest {
    pub filename: String,
    pub content: Vec<u8>,
    pub mode: SummaryMode,
    pub language: String,
    pub pages: Option<String>,
    pub question: Option<String>,
}

/// Mode-specific engine output.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Simple {
        summary: String,
    },
    Structured {
        executive_summary: String,
        bullets: Vec<String>,
        highlights: Vec<String>,
    },
    Multi {
        combined_summary: String,
        executive_summary: Option<String>,
    },
    Qa {
        answer: String,
    },
}

/// Parsed engine response: the typed output plus optional chunk
/// bookkeeping for the checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub output: EngineOutput,
    pub chunk_info: Option<ChunkInfo>,
}

impl EngineOutput {
    /// Fills fields the engine left empty from a checkpoint's
    /// accumulated partial results. A field already present in the new
    /// result always wins over the checkpoint's value.
    pub fn merge_partial(&mut self, accumulator: &HashMap<String, Value>) {
        match self {
            EngineOutput::Simple { summary } => {
                fill_string(summary, accumulator, "summary");
            }
            EngineOutput::Structured {
                executive_summary,
                bullets,
                highlights,
            } => {
                fill_string(executive_summary, accumulator, "executive_summary");
                fill_list(bullets, accumulator, "bullets");
                fill_list(highlights, accumulator, "highlights");
            }
            EngineOutput::Multi {
                combined_summary,
                executive_summary,
            } => {
                fill_string(combined_summary, accumulator, "combined_summary");
                if executive_summary.as_deref().unwrap_or("").is_empty() {
                    if let Some(value) = string_value(accumulator, "executive_summary") {
                        *executive_summary = Some(value);
                    }
                }
            }
            EngineOutput::Qa { answer } => {
                fill_string(answer, accumulator, "answer");
            }
        }
    }
}

fn string_value(accumulator: &HashMap<String, Value>, key: &str) -> Option<String> {
    accumulator
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn fill_string(target: &mut String, accumulator: &HashMap<String, Value>, key: &str) {
    if target.is_empty() {
        if let Some(value) = string_value(accumulator, key) {
            *target = value;
        }
    }
}

fn fill_list(target: &mut Vec<String>, accumulator: &HashMap<String, Value>, key: &str) {
    if target.is_empty() {
        if let Some(Value::Array(items)) = accumulator.get(key) {
            *target = items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
        }
    }
}

/// Parses a successful engine response body for the given mode.
pub fn parse_response(mode: SummaryMode, body: &[u8]) -> Result<EngineResult, EngineError> {
    fn decode<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, EngineError> {
        serde_json::from_slice(body).map_err(|e| EngineError::InvalidResponse {
            reason: e.to_string(),
        })
    }

    #[derive(Deserialize)]
    struct SimpleWire {
        #[serde(default)]
        summary: String,
        #[serde(rename = "_chunk_info")]
        chunk_info: Option<ChunkInfo>,
    }

    #[derive(Deserialize)]
    struct StructuredWire {
        #[serde(default)]
        executive_summary: String,
        #[serde(default)]
        bullets: Vec<String>,
        #[serde(default)]
        highlights: Vec<String>,
        #[serde(rename = "_chunk_info")]
        chunk_info: Option<ChunkInfo>,
    }

    #[derive(Deserialize)]
    struct MultiWire {
        #[serde(default)]
        combined_summary: String,
        executive_summary: Option<String>,
        #[serde(rename = "_chunk_info")]
        chunk_info: Option<ChunkInfo>,
    }

    #[derive(Deserialize)]
    struct QaWire {
        #[serde(default)]
        answer: String,
        #[serde(rename = "_chunk_info")]
        chunk_info: Option<ChunkInfo>,
    }

    let result = match mode {
        SummaryMode::Simple => {
            let wire: SimpleWire = decode(body)?;
            EngineResult {
                output: EngineOutput::Simple {
                    summary: wire.summary,
                },
                chunk_info: wire.chunk_info,
            }
        }
        SummaryMode::Structured => {
            let wire: StructuredWire = decode(body)?;
            EngineResult {
                output: EngineOutput::Structured {
                    executive_summary: wire.executive_summary,
                    bullets: wire.bullets,
                    highlights: wire.highlights,
                },
                chunk_info: wire.chunk_info,
            }
        }
        SummaryMode::Multi => {
            let wire: MultiWire = decode(body)?;
            EngineResult {
                output: EngineOutput::Multi {
                    combined_summary: wire.combined_summary,
                    executive_summary: wire.executive_summary,
                },
                chunk_info: wire.chunk_info,
            }
        }
        SummaryMode::Qa => {
            let wire: QaWire = decode(body)?;
            EngineResult {
                output: EngineOutput::Qa {
                    answer: wire.answer,
                },
                chunk_info: wire.chunk_info,
            }
        }
    };
    Ok(result)
}

/// Seam for the executor; tests substitute a scripted implementation.
#[async_trait]
pub trait SummarizationEngine: Send + Sync {
    async fn summarize(&self, request: SummarizeRequest) -> Result<EngineResult, EngineError>;
}

/// Production client calling the engine over HTTP.
pub struct HttpEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    /// The timeout bounds the whole call; the engine may legitimately
    /// run for minutes on large documents.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SummarizationEngine for HttpEngine {
    async fn summarize(&self, request: SummarizeRequest) -> Result<EngineResult, EngineError> {
        let url = format!("{}{}", self.base_url, request.mode.endpoint());

        let part = multipart::Part::bytes(request.content).file_name(request.filename);
        let mut form = multipart::Form::new().part("files", part);
        if !request.language.is_empty() {
            form = form.text("language", request.language);
        }
        if let Some(pages) = request.pages {
            form = form.text("pages", pages);
        }
        if let Some(question) = request.question {
            form = form.text("question", question);
        }

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(EngineError::Service {
                status: status.as_u16(),
                body: sanitize::truncate_error_body(&String::from_utf8_lossy(&body)),
            });
        }

        parse_response(request.mode, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple() {
        let body = br#"{"summary": "A short text."}"#;
        let result = parse_response(SummaryMode::Simple, body).unwrap();
        assert_eq!(
            result.output,
            EngineOutput::Simple {
                summary: "A short text.".to_string()
            }
        );
        assert!(result.chunk_info.is_none());
    }

    #[test]
    fn test_parse_structured_with_chunk_info() {
        let body = serde_json::to_vec(&json!({
            "executive_summary": "Overview.",
            "bullets": ["one", "two"],
            "highlights": ["key"],
            "_chunk_info": { "processed_chunks": 3, "total_chunks": 4, "last_chunk": 3 }
        }))
        .unwrap();
        let result = parse_response(SummaryMode::Structured, &body).unwrap();
        match result.output {
            EngineOutput::Structured {
                executive_summary,
                bullets,
                highlights,
            } => {
                assert_eq!(executive_summary, "Overview.");
                assert_eq!(bullets, vec!["one", "two"]);
                assert_eq!(highlights, vec!["key"]);
            }
            other => panic!("unexpected output: {:?}", other),
        }
        let info = result.chunk_info.unwrap();
        assert_eq!(info.processed_chunks, 3);
        assert_eq!(info.total_chunks, 4);
    }

    #[test]
    fn test_parse_multi_and_qa() {
        let body = br#"{"combined_summary": "All parts.", "executive_summary": "Brief."}"#;
        let result = parse_response(SummaryMode::Multi, body).unwrap();
        assert_eq!(
            result.output,
            EngineOutput::Multi {
                combined_summary: "All parts.".to_string(),
                executive_summary: Some("Brief.".to_string()),
            }
        );

        let body = br#"{"answer": "Forty-two."}"#;
        let result = parse_response(SummaryMode::Qa, body).unwrap();
        assert_eq!(
            result.output,
            EngineOutput::Qa {
                answer: "Forty-two.".to_string()
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_invalid_response() {
        let err = parse_response(SummaryMode::Simple, b"not json").unwrap_err();
        assert!(matches!(err, EngineError::InvalidResponse { .. }));
    }

    #[test]
    fn test_merge_new_result_wins() {
        let mut output = EngineOutput::Simple {
            summary: "fresh".to_string(),
        };
        let mut accumulator = HashMap::new();
        accumulator.insert("summary".to_string(), json!("stale partial"));
        output.merge_partial(&accumulator);
        assert_eq!(
            output,
            EngineOutput::Simple {
                summary: "fresh".to_string()
            }
        );
    }

    #[test]
    fn test_merge_fills_missing_fields() {
        let mut output = EngineOutput::Structured {
            executive_summary: String::new(),
            bullets: vec![],
            highlights: vec!["kept".to_string()],
        };
        let mut accumulator = HashMap::new();
        accumulator.insert("executive_summary".to_string(), json!("from checkpoint"));
        accumulator.insert("bullets".to_string(), json!(["a", "b"]));
        accumulator.insert("highlights".to_string(), json!(["overridden"]));
        output.merge_partial(&accumulator);

        match output {
            EngineOutput::Structured {
                executive_summary,
                bullets,
                highlights,
            } => {
                assert_eq!(executive_summary, "from checkpoint");
                assert_eq!(bullets, vec!["a", "b"]);
                // Present in the new result, so the checkpoint loses.
                assert_eq!(highlights, vec!["kept"]);
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_merge_multi_executive_summary() {
        let mut output = EngineOutput::Multi {
            combined_summary: "text".to_string(),
            executive_summary: None,
        };
        let mut accumulator = HashMap::new();
        accumulator.insert("executive_summary".to_string(), json!("recovered"));
        output.merge_partial(&accumulator);
        assert_eq!(
            output,
            EngineOutput::Multi {
                combined_summary: "text".to_string(),
                executive_summary: Some("recovered".to_string()),
            }
        );
    }

    #[test]
    fn test_service_error_carries_body_text() {
        let err = EngineError::Service {
            status: 422,
            body: "could not extract text from PDF".to_string(),
        };
        assert!(err.to_string().contains("could not extract text"));
    }
}
