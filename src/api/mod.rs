use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;

use crate::core::message::Message;

pub mod client;

pub use client::ApiClient;

pub const TOKEN_PATH: &str = "auth/token";
pub const REGISTER_PATH: &str = "auth/register";
pub const COMPLETION_PATH: &str = "api/ai";

/// Body of `POST /api/ai`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub message: String,
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    /// The request never produced a response (connection refused, DNS,
    /// timeout, TLS).
    Transport(reqwest::Error),

    /// The server answered with a non-success status.
    Status { status: u16, detail: Option<String> },

    /// A success response carried a body we could not understand.
    Decode(String),
}

impl ApiError {
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(err) => write!(f, "Request failed: {err}"),
            ApiError::Status {
                status,
                detail: Some(detail),
            } => write!(f, "Server returned {status}: {detail}"),
            ApiError::Status {
                status,
                detail: None,
            } => write!(f, "Server returned {status}"),
            ApiError::Decode(message) => write!(f, "Unexpected response: {message}"),
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ApiError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err)
    }
}

/// Pull a human-readable message out of an error body.
///
/// The server reports failures as `{"detail": "..."}`; request validation
/// failures carry a list of `{"msg": "..."}` objects instead.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let detail = match value.get("detail")? {
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                Value::Array(items.clone()).to_string()
            } else {
                messages.join("; ")
            }
        }
        Value::Null => return None,
        other => other.to_string(),
    };

    if detail.trim().is_empty() {
        None
    } else {
        Some(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_serializes_message_and_history() {
        let request = CompletionRequest {
            message: "And Germany?".to_string(),
            history: vec![
                Message::user("Capital of France?"),
                Message::assistant("Paris."),
            ],
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "message": "And Germany?",
                "history": [
                    {"role": "user", "content": "Capital of France?"},
                    {"role": "assistant", "content": "Paris."}
                ]
            })
        );
    }

    #[test]
    fn extract_detail_reads_string_detail() {
        assert_eq!(
            extract_detail(r#"{"detail":"Invalid credentials"}"#).as_deref(),
            Some("Invalid credentials")
        );
    }

    #[test]
    fn extract_detail_joins_validation_messages() {
        let body = r#"{"detail":[{"loc":["body","username"],"msg":"field required"},{"msg":"too short"}]}"#;
        assert_eq!(
            extract_detail(body).as_deref(),
            Some("field required; too short")
        );
    }

    #[test]
    fn extract_detail_keeps_server_text_verbatim() {
        assert_eq!(
            extract_detail(r#"{"detail":"Invalid  credentials\n(try again)"}"#).as_deref(),
            Some("Invalid  credentials\n(try again)")
        );
    }

    #[test]
    fn extract_detail_ignores_bodies_without_detail() {
        assert_eq!(extract_detail("Internal Server Error"), None);
        assert_eq!(extract_detail(r#"{"error":"nope"}"#), None);
        assert_eq!(extract_detail(r#"{"detail":null}"#), None);
        assert_eq!(extract_detail(r#"{"detail":"   "}"#), None);
    }

    #[test]
    fn unauthorized_status_is_recognized() {
        let err = ApiError::Status {
            status: 401,
            detail: Some("Invalid authentication credentials".to_string()),
        };
        assert!(err.is_unauthorized());
        assert_eq!(err.detail(), Some("Invalid authentication credentials"));
    }
}
