use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum LichessError {
    /// A transient network fault persisted through every allowed retry.
    #[error("transient network failure after {attempts} attempt(s): {source}")]
    TransientNetwork {
        /// Number of sends performed, the failing one included.
        attempts: u32,
        source: reqwest::Error,
    },
    /// Network or request execution error that is not worth retrying.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// 429 response that was not (or no longer) retried.
    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs_f64())]
    RateLimitExceeded {
        /// Last wait duration the server asked for.
        retry_after: Duration,
        /// Number of sends performed.
        attempts: u32,
    },
    /// 401 Unauthorized.
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    /// 403 Forbidden.
    #[error("forbidden: {message}")]
    Authorization {
        message: String,
        /// OAuth scope the credential lacks, when the server names it.
        missing_scope: Option<String>,
    },
    /// 404 Not Found.
    #[error("not found: {message}")]
    NotFound { message: String },
    /// 400 Bad Request with the server's per-field messages.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },
    /// Any other non-success status, with the raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
    /// Response body or NDJSON line could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request could not be built (URL, header or body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Environment configuration error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LichessError {
    /// Whether this error is the caller's own cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Maps a non-success, non-429 response to its error kind.
    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(&body).ok();
        let message = parsed
            .as_ref()
            .map(ErrorBody::message)
            .unwrap_or_else(|| fallback_message(status, &body));

        match status {
            StatusCode::UNAUTHORIZED => Self::Authentication { message },
            StatusCode::FORBIDDEN => Self::Authorization {
                missing_scope: missing_scope(&message),
                message,
            },
            StatusCode::NOT_FOUND => Self::NotFound { message },
            StatusCode::BAD_REQUEST => Self::Validation {
                fields: parsed.map(ErrorBody::into_fields).unwrap_or_default(),
                message,
            },
            _ => Self::Http {
                status: status.as_u16(),
                body,
            },
        }
    }
}

/// Lichess error bodies: `{"error": "text"}` or `{"error": {"field": ["text"]}}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message(String),
    Fields(BTreeMap<String, FieldMessages>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldMessages {
    One(String),
    Many(Vec<String>),
}

impl FieldMessages {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(message) => vec![message],
            Self::Many(messages) => messages,
        }
    }
}

impl ErrorBody {
    fn message(&self) -> String {
        match &self.error {
            ErrorDetail::Message(message) => message.clone(),
            ErrorDetail::Fields(fields) => fields
                .iter()
                .map(|(field, messages)| match messages {
                    FieldMessages::One(message) => format!("{field}: {message}"),
                    FieldMessages::Many(messages) => format!("{field}: {}", messages.join(", ")),
                })
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    fn into_fields(self) -> BTreeMap<String, Vec<String>> {
        match self.error {
            ErrorDetail::Message(_) => BTreeMap::new(),
            ErrorDetail::Fields(fields) => fields
                .into_iter()
                .map(|(field, messages)| (field, messages.into_vec()))
                .collect(),
        }
    }
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_owned()
    } else {
        body.to_owned()
    }
}

fn missing_scope(message: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    let start = lower.find("missing scope")? + "missing scope".len();
    let rest = &message[start..];
    let scope = rest
        .strip_prefix('s')
        .unwrap_or(rest)
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()?
        .trim_end_matches('.');
    (!scope.is_empty()).then(|| scope.to_owned())
}
