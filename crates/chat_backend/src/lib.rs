//! Minimal backend-agnostic contract for streaming one chat run.
//!
//! This crate defines only the request/response shapes and the callback-driven
//! [`ChatBackend`] trait that the streaming runtime drives. It excludes
//! transport details, wire framing, and multi-run orchestration concerns.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use tokio_util::sync::CancellationToken;

/// Error returned while constructing/configuring a backend before any run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInitError {
    message: String,
}

impl BackendInitError {
    /// Creates a new backend initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendInitError {}

impl From<String> for BackendInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for BackendInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failure reported by a backend call after it was issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend call was cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("backend protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Returns true when the failure is a side effect of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Attachment reference forwarded with a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub uri: String,
}

impl Attachment {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            uri: uri.into(),
        }
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Input required to start streaming a new user message.
#[derive(Debug, Clone, PartialEq)]
pub struct StartStreamRequest {
    pub conversation_id: String,
    pub text: String,
    /// Free-form selection metadata forwarded verbatim.
    pub metadata: Value,
    pub attachments: Vec<Attachment>,
    /// Existing backend session to continue, if any.
    pub session_id: Option<String>,
}

/// Input required to reattach to an in-flight backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeStreamRequest {
    pub conversation_id: String,
    pub session_id: String,
    pub cursor: String,
}

/// One backend-pushed update.
///
/// `text` and `reasoning` are cumulative, never deltas. `tool_calls` carries raw,
/// unvalidated payloads exactly as the backend sent them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamProgress {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl StreamProgress {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    #[must_use]
    pub fn with_tool_call(mut self, payload: Value) -> Self {
        self.tool_calls.push(payload);
        self
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Backend-side status of a detected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Other(String),
}

impl SessionStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(value) => value,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<String> for SessionStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SessionStatus> for String {
    fn from(value: SessionStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Session reported by the backend for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub cursor: String,
    pub status: SessionStatus,
}

/// Immutable metadata describing a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    pub backend_id: String,
    pub endpoint: Option<String>,
}

/// Callback invoked once per backend-pushed update.
pub type ProgressSink<'a> = &'a mut (dyn FnMut(StreamProgress) + Send);

/// Backend interface driven by the streaming runtime.
///
/// Implementations invoke `on_progress` zero or more times, in backend order,
/// before the returned future settles. They should observe `cancel` and settle
/// with [`BackendError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Returns backend identity metadata.
    fn profile(&self) -> BackendProfile;

    /// Streams a new user message and resolves with the backend session id.
    async fn start_stream(
        &self,
        request: StartStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<String, BackendError>;

    /// Reattaches to an in-flight session from `cursor` and resolves when it finishes.
    async fn resume_stream(
        &self,
        request: ResumeStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<(), BackendError>;

    /// Best-effort out-of-band request to halt the conversation's active run.
    async fn stop(&self, conversation_id: &str) -> Result<(), BackendError>;

    /// Looks up the backend session currently attached to a conversation.
    async fn detect_active_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ActiveSession>, BackendError>;
}
