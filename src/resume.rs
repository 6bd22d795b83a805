//! Reattaching to a backend session that is still running.

use std::time::Duration;

use chat_backend::{CancellationToken, SessionStatus};
use tokio::sync::watch;

use crate::adapter::{RunAdapter, RunInput, TurnInput};
use crate::error::RunError;
use crate::message::{last_user_message, ThreadMessage};
use crate::session::ResumeRequest;
use crate::stream::RunStream;

/// Load state of a conversation's message history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    Loading,
    Loaded(Vec<ThreadMessage>),
}

impl HistoryState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

#[derive(Debug)]
pub enum AttachOutcome {
    /// A resume run was started from the backend cursor.
    Resumed(RunStream),
    NoActiveSession,
    /// The backend reported a session that is no longer running.
    Inactive(SessionStatus),
    HistoryTimeout,
    NoUserMessage,
}

pub struct SessionResumeDetector {
    adapter: RunAdapter,
    history_wait: Duration,
}

impl SessionResumeDetector {
    pub fn new(adapter: RunAdapter) -> Self {
        let history_wait = adapter.config().history_wait;
        Self {
            adapter,
            history_wait,
        }
    }

    #[must_use]
    pub fn with_history_wait(mut self, history_wait: Duration) -> Self {
        self.history_wait = history_wait;
        self
    }

    /// Checks the backend for a running session and, if one is active,
    /// resumes it anchored on the latest user message in `history`.
    pub async fn attach(
        &self,
        conversation_id: &str,
        mut history: watch::Receiver<HistoryState>,
        cancel: CancellationToken,
    ) -> Result<AttachOutcome, RunError> {
        let session = match self
            .adapter
            .backend()
            .detect_active_session(conversation_id)
            .await
        {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(AttachOutcome::NoActiveSession),
            Err(error) => {
                tracing::warn!(conversation_id, %error, "active session lookup failed");
                return Ok(AttachOutcome::NoActiveSession);
            }
        };

        if !session.status.is_active() {
            tracing::debug!(
                conversation_id,
                status = session.status.as_str(),
                "detected session is not active"
            );
            return Ok(AttachOutcome::Inactive(session.status));
        }

        let loaded = tokio::time::timeout(
            self.history_wait,
            history.wait_for(HistoryState::is_loaded),
        )
        .await;
        let messages = match loaded {
            Ok(Ok(state)) => match &*state {
                HistoryState::Loaded(messages) => messages.clone(),
                HistoryState::Loading => Vec::new(),
            },
            Ok(Err(_)) => {
                tracing::debug!(conversation_id, "history source closed before loading");
                return Ok(AttachOutcome::HistoryTimeout);
            }
            Err(_) => {
                tracing::info!(
                    conversation_id,
                    wait_ms = self.history_wait.as_millis() as u64,
                    "history did not load in time; skipping resume"
                );
                return Ok(AttachOutcome::HistoryTimeout);
            }
        };

        let Some(anchor) = last_user_message(&messages) else {
            return Ok(AttachOutcome::NoUserMessage);
        };

        self.adapter.queue_resume(
            conversation_id,
            ResumeRequest {
                session_id: session.session_id,
                cursor: session.cursor,
            },
        );

        let input = RunInput::Turn(TurnInput::new(vec![anchor.clone()]));
        match self.adapter.run(conversation_id, input, cancel) {
            Ok(stream) => Ok(AttachOutcome::Resumed(stream)),
            Err(error) => {
                self.adapter.take_resume(conversation_id);
                Err(error)
            }
        }
    }
}
