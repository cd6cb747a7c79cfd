//! Error taxonomy for every Graph operation.
//!
//! All public API surfaces in this crate return `GraphResult<T>`.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// The token provider could not produce a credential. The source is passed through untouched.
    #[error("no access token for account '{account}': {source}")]
    Auth {
        account: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// HTTP 429.
    #[error("rate limited by the service (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },

    /// HTTP 5xx.
    #[error("transient server error (HTTP {status}): {body}")]
    ServerError { status: u16, body: String },

    /// Any other non-2xx status. Never retried.
    #[error("request rejected (HTTP {status}): {message}")]
    ClientError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<GraphError>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Classify a failed response. `retry_after` is only kept for 429s.
    pub fn from_status(status: StatusCode, retry_after: Duration, body: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Self::RateLimited { retry_after };
        }
        if status.is_server_error() {
            return Self::ServerError {
                status: status.as_u16(),
                body: body.to_string(),
            };
        }

        let (code, message) = parse_graph_error_body(body);
        let message = message.unwrap_or_else(|| {
            if body.is_empty() {
                format!("Graph API error (HTTP {})", status.as_u16())
            } else {
                body.to_string()
            }
        });

        Self::ClientError {
            status: status.as_u16(),
            code,
            message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ServerError { .. })
    }

    /// HTTP status behind this error, looking through `RetriesExhausted`.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            Self::ServerError { status, .. } | Self::ClientError { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Extract `{ "error": { "code": "...", "message": "..." } }` from a Graph error body.
fn parse_graph_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };
    let err = &v["error"];
    let code = err["code"].as_str().map(String::from);
    let message = err["message"].as_str().map(String::from);
    (code, message)
}
