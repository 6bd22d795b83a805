use chat_backend::BackendError;
use thiserror::Error;

/// Failure surfaced by [`crate::RunAdapter::run`] or as the terminal item of a
/// [`crate::RunStream`].
///
/// Validation variants are returned before any backend call is issued.
/// Cancellation is never reported as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("turn contains no messages")]
    EmptyTurn,

    #[error("last message of the turn must come from the user, found {role}")]
    NotUserMessage { role: String },

    #[error("user message carries no text content")]
    MissingText,

    #[error("a run is already streaming for conversation '{conversation_id}'")]
    AlreadyStreaming { conversation_id: String },

    #[error("no resume request is pending for conversation '{conversation_id}'")]
    NoPendingResume { conversation_id: String },

    #[error(
        "conversation '{conversation_id}' exceeded {limit} reconnect attempts; session cleared"
    )]
    ReconnectLimit { conversation_id: String, limit: u32 },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("stream driver stopped unexpectedly: {0}")]
    DriverPanicked(String),
}

impl RunError {
    #[must_use]
    pub fn already_streaming(conversation_id: impl Into<String>) -> Self {
        Self::AlreadyStreaming {
            conversation_id: conversation_id.into(),
        }
    }

    #[must_use]
    pub fn no_pending_resume(conversation_id: impl Into<String>) -> Self {
        Self::NoPendingResume {
            conversation_id: conversation_id.into(),
        }
    }

    #[must_use]
    pub fn reconnect_limit(conversation_id: impl Into<String>, limit: u32) -> Self {
        Self::ReconnectLimit {
            conversation_id: conversation_id.into(),
            limit,
        }
    }

    /// Returns true for errors raised while validating input, before dispatch.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyTurn | Self::NotUserMessage { .. } | Self::MissingText
        )
    }
}
