//! Error taxonomy: one table per dialect family mapping error kinds to HTTP status
//! and error vocabulary.
//!
//! Adding a dialect family means adding a table, not another branch.

use crate::error::BridgeError;
use crate::translate::Dialect;
use axum::http::StatusCode;
use serde_json::{json, Value};

/// Client-facing error kinds, shared by every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    ModelNotFound,
    PermissionDenied,
    ContentBlocked,
    QuotaExceeded,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyShape {
    /// `{"error": {"message", "type", "param", "code"}}`
    OpenAi,
    /// `{"type": "error", "error": {"type", "message"}}`
    Anthropic,
}

#[derive(Debug)]
struct ErrorRow {
    kind: ErrorKind,
    status: u16,
    error_type: &'static str,
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ErrorTable {
    shape: BodyShape,
    rows: &'static [ErrorRow],
    /// Recognise host messages of the form `Request Failed: <status> <json>` and
    /// surface the embedded status and body instead of a generic 500.
    unwrap_embedded_status: bool,
}

const INTERNAL_FALLBACK: ErrorRow = ErrorRow {
    kind: ErrorKind::Internal,
    status: 500,
    error_type: "internal_error",
    code: None,
};

static OPENAI_TABLE: ErrorTable = ErrorTable {
    shape: BodyShape::OpenAi,
    rows: &[
        ErrorRow {
            kind: ErrorKind::InvalidRequest,
            status: 400,
            error_type: "invalid_request_error",
            code: Some("invalid_request"),
        },
        ErrorRow {
            kind: ErrorKind::ModelNotFound,
            status: 404,
            error_type: "invalid_request_error",
            code: Some("model_not_found"),
        },
        ErrorRow {
            kind: ErrorKind::PermissionDenied,
            status: 403,
            error_type: "permission_error",
            code: Some("permission_denied"),
        },
        ErrorRow {
            kind: ErrorKind::ContentBlocked,
            status: 400,
            error_type: "invalid_request_error",
            code: Some("content_filter"),
        },
        ErrorRow {
            kind: ErrorKind::QuotaExceeded,
            status: 429,
            error_type: "insufficient_quota",
            code: Some("insufficient_quota"),
        },
        ErrorRow {
            kind: ErrorKind::Internal,
            status: 500,
            error_type: "server_error",
            code: Some("internal_error"),
        },
    ],
    unwrap_embedded_status: true,
};

static ANTHROPIC_TABLE: ErrorTable = ErrorTable {
    shape: BodyShape::Anthropic,
    rows: &[
        ErrorRow {
            kind: ErrorKind::InvalidRequest,
            status: 400,
            error_type: "invalid_request_error",
            code: None,
        },
        ErrorRow {
            kind: ErrorKind::ModelNotFound,
            status: 404,
            error_type: "not_found_error",
            code: None,
        },
        ErrorRow {
            kind: ErrorKind::PermissionDenied,
            status: 403,
            error_type: "permission_error",
            code: None,
        },
        ErrorRow {
            kind: ErrorKind::ContentBlocked,
            status: 400,
            error_type: "invalid_request_error",
            code: None,
        },
        ErrorRow {
            kind: ErrorKind::QuotaExceeded,
            status: 429,
            error_type: "rate_limit_error",
            code: None,
        },
        ErrorRow {
            kind: ErrorKind::Internal,
            status: 500,
            error_type: "api_error",
            code: None,
        },
    ],
    unwrap_embedded_status: false,
};

pub fn table_for(dialect: Dialect) -> &'static ErrorTable {
    match dialect {
        Dialect::OpenAiChat | Dialect::OpenAiResponses => &OPENAI_TABLE,
        Dialect::Anthropic => &ANTHROPIC_TABLE,
    }
}

/// An error resolved against one dialect's table.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedError {
    pub status: StatusCode,
    pub error_type: String,
    pub code: Option<String>,
    pub message: String,
    shape: BodyShape,
}

impl MappedError {
    /// Response body in the dialect's error shape.
    pub fn body(&self) -> Value {
        match self.shape {
            BodyShape::OpenAi => json!({
                "error": {
                    "message": self.message,
                    "type": self.error_type,
                    "param": Value::Null,
                    "code": self.code,
                }
            }),
            BodyShape::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": self.error_type,
                    "message": self.message,
                }
            }),
        }
    }
}

impl ErrorTable {
    fn row(&self, kind: ErrorKind) -> &ErrorRow {
        self.rows
            .iter()
            .find(|r| r.kind == kind)
            .unwrap_or(&INTERNAL_FALLBACK)
    }

    pub fn map(&self, err: &BridgeError) -> MappedError {
        if self.unwrap_embedded_status {
            if let Some(mapped) = self.unwrap_embedded(err) {
                return mapped;
            }
        }

        let row = self.row(err.kind());
        MappedError {
            status: StatusCode::from_u16(row.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            error_type: row.error_type.to_string(),
            code: row.code.map(str::to_string),
            message: err.client_message(),
            shape: self.shape,
        }
    }

    // Compatibility shim for hosts that only report failures as formatted strings.
    // Replace with a structured channel if the host ever offers one.
    fn unwrap_embedded(&self, err: &BridgeError) -> Option<MappedError> {
        let BridgeError::Host(host) = err else {
            return None;
        };
        let (status, body) = parse_request_failed(&host.message)?;
        let inner = body.get("error").filter(|e| e.is_object()).unwrap_or(&body);
        let fallback = self.row(ErrorKind::Internal);

        let message = inner
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), str::to_string);
        let error_type = inner
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(fallback.error_type)
            .to_string();
        let code = inner.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Some(MappedError {
            status,
            error_type,
            code,
            message,
            shape: self.shape,
        })
    }
}

/// Parse `Request Failed: <status> <json>`.
fn parse_request_failed(message: &str) -> Option<(StatusCode, Value)> {
    let rest = message.trim().strip_prefix("Request Failed:")?.trim_start();
    let (status, body) = rest.split_once(' ')?;
    let status = status.parse::<u16>().ok().and_then(|s| StatusCode::from_u16(s).ok())?;
    let body: Value = serde_json::from_str(body.trim()).ok()?;
    body.is_object().then_some((status, body))
}

pub fn map_error(err: &BridgeError, dialect: Dialect) -> MappedError {
    table_for(dialect).map(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostError, HostErrorKind};

    fn host(kind: HostErrorKind, message: &str) -> BridgeError {
        HostError::new(kind, message).into()
    }

    #[test]
    fn test_model_not_found_per_dialect() {
        let err = host(HostErrorKind::NotFound, "model 'x' not found");

        let openai = map_error(&err, Dialect::OpenAiChat);
        assert_eq!(openai.status, StatusCode::NOT_FOUND);
        assert_eq!(openai.body()["error"]["code"], "model_not_found");

        let responses = map_error(&err, Dialect::OpenAiResponses);
        assert_eq!(responses, openai);

        let anthropic = map_error(&err, Dialect::Anthropic);
        assert_eq!(anthropic.status, StatusCode::NOT_FOUND);
        assert_eq!(anthropic.body()["type"], "error");
        assert_eq!(anthropic.body()["error"]["type"], "not_found_error");
    }

    #[test]
    fn test_every_kind_has_a_row_in_every_table() {
        let kinds = [
            ErrorKind::InvalidRequest,
            ErrorKind::ModelNotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::ContentBlocked,
            ErrorKind::QuotaExceeded,
            ErrorKind::Internal,
        ];
        for table in [&OPENAI_TABLE, &ANTHROPIC_TABLE] {
            for kind in kinds {
                assert!(table.rows.iter().any(|r| r.kind == kind), "{kind:?}");
            }
        }
    }

    #[test]
    fn test_unknown_host_error_is_internal() {
        let err = host(HostErrorKind::Unknown, "boom");
        assert_eq!(
            map_error(&err, Dialect::Anthropic).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let openai = map_error(&err, Dialect::OpenAiChat);
        assert_eq!(openai.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(openai.body()["error"]["type"], "server_error");
    }

    #[test]
    fn test_embedded_status_is_unwrapped_for_openai_only() {
        let err = host(
            HostErrorKind::Unknown,
            r#"Request Failed: 429 {"error":{"message":"slow down","type":"rate_limit_error","code":"rate_limited"}}"#,
        );

        let openai = map_error(&err, Dialect::OpenAiChat);
        assert_eq!(openai.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(openai.message, "slow down");
        assert_eq!(openai.error_type, "rate_limit_error");
        assert_eq!(openai.code.as_deref(), Some("rate_limited"));

        let anthropic = map_error(&err, Dialect::Anthropic);
        assert_eq!(anthropic.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_malformed_embedded_status_falls_back_to_table() {
        let err = host(HostErrorKind::Unknown, "Request Failed: soon {not json}");
        let mapped = map_error(&err, Dialect::OpenAiChat);
        assert_eq!(mapped.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mapped.message, "Request Failed: soon {not json}");
    }

    #[test]
    fn test_validation_error_is_400() {
        let err = BridgeError::missing_field("messages");
        for dialect in [Dialect::OpenAiChat, Dialect::OpenAiResponses, Dialect::Anthropic] {
            let mapped = map_error(&err, dialect);
            assert_eq!(mapped.status, StatusCode::BAD_REQUEST);
            assert_eq!(mapped.error_type, "invalid_request_error");
        }
    }
}
