use std::fmt;

use chat_backend::BackendError;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum HttpBackendError {
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    Serde(JsonError),
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    StreamFailed {
        code: Option<String>,
        message: String,
    },
    UnexpectedEnd,
    MissingSessionId,
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<ErrorPayloadValue>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorPayloadValue {
    Text(String),
    Fields { message: Option<String> },
}

impl ErrorPayload {
    fn message(self) -> Option<String> {
        let nested = match self.error {
            Some(ErrorPayloadValue::Text(text)) => Some(text),
            Some(ErrorPayloadValue::Fields { message }) => message,
            None => None,
        };
        nested
            .or(self.message)
            .filter(|message| !message.trim().is_empty())
    }
}

impl fmt::Display for HttpBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error:?})"
                )
            }
            Self::StreamFailed { code, message } => match code {
                Some(code) if !code.trim().is_empty() => {
                    write!(f, "stream failed ({code}): {message}")
                }
                _ => write!(f, "stream failed: {message}"),
            },
            Self::UnexpectedEnd => write!(f, "event stream ended without a done frame"),
            Self::MissingSessionId => write!(f, "backend did not report a session id"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for HttpBackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpBackendError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for HttpBackendError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

impl From<HttpBackendError> for BackendError {
    fn from(error: HttpBackendError) -> Self {
        match error {
            HttpBackendError::Cancelled => Self::Cancelled,
            HttpBackendError::Status(status, message) => Self::Status {
                status: status.as_u16(),
                message,
            },
            HttpBackendError::Request(_) | HttpBackendError::RetryExhausted { .. } => {
                Self::Transport(error.to_string())
            }
            HttpBackendError::Serde(_)
            | HttpBackendError::StreamFailed { .. }
            | HttpBackendError::UnexpectedEnd
            | HttpBackendError::MissingSessionId => Self::Protocol(error.to_string()),
            HttpBackendError::InvalidBaseUrl(_) | HttpBackendError::InvalidHeader(_) => {
                Self::Other(error.to_string())
            }
        }
    }
}

/// Extracts a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.to_string()
        }
    };

    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(payload) => payload.message().unwrap_or_else(fallback),
        Err(_) => fallback(),
    }
}
