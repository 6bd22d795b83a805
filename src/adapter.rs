use std::sync::Arc;

use chat_backend::{CancellationToken, ChatBackend};
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::RunError;
use crate::message::{ThreadMessage, Turn};
use crate::session::{ResumeRequest, SessionState, SessionTable};
use crate::stream::{NewMessage, RunStream, StreamSession};

/// Caller-supplied input for a new-message run.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    /// Thread messages; the last one must be the user's turn.
    pub messages: Vec<ThreadMessage>,
    /// Selection metadata forwarded verbatim to the backend.
    pub metadata: Value,
    /// Backend session to continue, if the caller tracks one.
    pub session_id: Option<String>,
}

impl TurnInput {
    #[must_use]
    pub fn new(messages: Vec<ThreadMessage>) -> Self {
        Self {
            messages,
            metadata: Value::Object(Default::default()),
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    fn into_new_message(self) -> Result<NewMessage, RunError> {
        let turn = Turn::from_messages(&self.messages)?;
        Ok(NewMessage {
            turn,
            metadata: self.metadata,
            session_id: self.session_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunInput {
    Turn(TurnInput),
    /// Consume the pending resume request; fails when none is queued.
    Resume,
}

/// Single entry point for starting or resuming a conversation run.
///
/// Cloning is cheap; clones share session state.
#[derive(Clone)]
pub struct RunAdapter {
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<SessionTable>,
    config: RuntimeConfig,
}

impl RunAdapter {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self::with_config(backend, RuntimeConfig::default())
    }

    pub fn with_config(backend: Arc<dyn ChatBackend>, config: RuntimeConfig) -> Self {
        Self {
            backend,
            sessions: SessionTable::new(
                config.initial_cursor.clone(),
                config.max_reconnect_attempts,
            ),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    /// Starts a run and returns its lazy update stream.
    ///
    /// A queued resume request takes precedence over `input`. Validation and
    /// concurrency errors are returned here, before any backend call.
    pub fn run(
        &self,
        conversation_id: &str,
        input: RunInput,
        cancel: CancellationToken,
    ) -> Result<RunStream, RunError> {
        let fresh = match input {
            RunInput::Turn(turn) => Some(turn.into_new_message()),
            RunInput::Resume => None,
        };

        let (lease, mode) = self.sessions.begin(conversation_id, fresh).inspect_err(|error| {
            tracing::debug!(conversation_id, %error, "run rejected");
        })?;

        Ok(StreamSession::new(Arc::clone(&self.backend), lease, mode, cancel.child_token())
            .into_stream())
    }

    pub fn queue_resume(&self, conversation_id: &str, request: ResumeRequest) {
        tracing::debug!(
            conversation_id,
            session_id = %request.session_id,
            cursor = %request.cursor,
            "resume queued"
        );
        self.sessions.queue_resume(conversation_id, request);
    }

    /// Withdraws an unconsumed resume request.
    pub fn take_resume(&self, conversation_id: &str) -> Option<ResumeRequest> {
        self.sessions.take_resume(conversation_id)
    }

    pub fn session_state(&self, conversation_id: &str) -> SessionState {
        self.sessions.snapshot(conversation_id)
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.session_state(conversation_id).streaming
    }
}
