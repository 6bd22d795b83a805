//! One backend streaming connection exposed as a pull-based stream.
//!
//! The backend call runs on its own task and publishes every rendered snapshot
//! into a single-slot buffer (last write wins). The consumer side waits on that
//! slot, the cancellation token, and the driver task, whichever fires first.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chat_backend::{
    BackendError, CancellationToken, ChatBackend, ResumeStreamRequest, StartStreamRequest,
    StreamProgress,
};
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinError;

use crate::content::{ContentAssembler, ContentUpdate};
use crate::error::RunError;
use crate::message::Turn;
use crate::reconcile::{ToolCallLedger, ToolCallReconciler};
use crate::session::{lock_unpoisoned, ResumeRequest, SessionLease};

/// Input for a new-message dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub turn: Turn,
    pub metadata: Value,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMode {
    NewMessage(NewMessage),
    Resume(ResumeRequest),
}

impl StreamMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::Resume(_) => "resume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Opening,
    Streaming,
    Completed,
    Canceled,
    Failed,
}

impl SessionPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

#[derive(Debug)]
struct Shared {
    pending: Mutex<Option<ContentUpdate>>,
    wake: Notify,
    phase: Mutex<SessionPhase>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            wake: Notify::new(),
            phase: Mutex::new(SessionPhase::Idle),
        }
    }

    fn publish(&self, update: ContentUpdate) {
        *lock_unpoisoned(&self.pending) = Some(update);
        self.wake.notify_one();
    }

    fn take(&self) -> Option<ContentUpdate> {
        lock_unpoisoned(&self.pending).take()
    }

    fn phase(&self) -> SessionPhase {
        *lock_unpoisoned(&self.phase)
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = std::mem::replace(&mut *lock_unpoisoned(&self.phase), phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "stream phase changed");
        }
    }
}

#[derive(Default)]
struct Accumulator {
    reasoning: String,
    text: String,
    tool_calls: ToolCallLedger,
    streaming: bool,
}

impl Accumulator {
    fn absorb(&mut self, progress: StreamProgress) -> ContentUpdate {
        self.text = progress.text;
        if let Some(reasoning) = progress.reasoning {
            self.reasoning = reasoning;
        }
        if !progress.tool_calls.is_empty() {
            let ledger = std::mem::take(&mut self.tool_calls);
            self.tool_calls = ToolCallReconciler::apply(ledger, &progress.tool_calls).ledger;
        }
        self.render()
    }

    fn render(&self) -> ContentUpdate {
        ContentAssembler::render(&self.reasoning, &self.tool_calls, &self.text)
    }
}

/// Owns one fresh or resumed backend stream for the lifetime of a run.
pub struct StreamSession {
    backend: Arc<dyn ChatBackend>,
    lease: SessionLease,
    mode: StreamMode,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl StreamSession {
    pub(crate) fn new(
        backend: Arc<dyn ChatBackend>,
        lease: SessionLease,
        mode: StreamMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            lease,
            mode,
            cancel,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Converts the session into its consumer stream.
    ///
    /// Nothing is sent to the backend until the stream is first polled.
    pub fn into_stream(self) -> RunStream {
        let observed = Arc::clone(&self.shared);
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let conversation_id = self.lease.conversation_id().to_string();

        let updates = async_stream::stream! {
            let _cancel_on_drop = cancel.clone().drop_guard();
            let mut driver = tokio::spawn(self.drive());
            let mut last_yielded: Option<ContentUpdate> = None;

            loop {
                let wake = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Wake::Cancelled,
                    _ = shared.wake.notified() => Wake::Published,
                    joined = &mut driver => Wake::Settled(joined),
                };

                match wake {
                    Wake::Published => {
                        if let Some(update) = take_unseen(&shared, &mut last_yielded) {
                            yield Ok(update);
                        }
                    }
                    Wake::Cancelled => {
                        if let Err(error) = (&mut driver).await {
                            tracing::warn!(%error, "stream driver ended abnormally after cancel");
                        }
                        break;
                    }
                    Wake::Settled(joined) => {
                        if shared.phase() != SessionPhase::Canceled {
                            if let Some(update) = take_unseen(&shared, &mut last_yielded) {
                                yield Ok(update);
                            }
                        }

                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(error)) => {
                                yield Err(RunError::Backend(error));
                            }
                            Err(error) => {
                                shared.set_phase(SessionPhase::Failed);
                                yield Err(RunError::DriverPanicked(error.to_string()));
                            }
                        }
                        break;
                    }
                }
            }
        };

        RunStream {
            conversation_id,
            updates: Box::pin(updates),
            shared: observed,
        }
    }

    async fn drive(self) -> Result<(), BackendError> {
        let Self {
            backend,
            lease,
            mode,
            cancel,
            shared,
        } = self;
        let conversation_id = lease.conversation_id().to_string();

        shared.set_phase(SessionPhase::Opening);
        tracing::info!(
            conversation_id = %conversation_id,
            run_id = lease.run_id(),
            mode = mode.label(),
            "run started"
        );

        let mut accumulator = Accumulator::default();
        let outcome = {
            let mut on_progress = |progress: StreamProgress| {
                if cancel.is_cancelled() {
                    return;
                }
                if let Some(cursor) = &progress.cursor {
                    lease.record_cursor(cursor.clone());
                }
                if !accumulator.streaming {
                    accumulator.streaming = true;
                    shared.set_phase(SessionPhase::Streaming);
                }

                let update = accumulator.absorb(progress);
                tracing::trace!(
                    text_len = update.text().len(),
                    tool_calls = update.tool_calls().count(),
                    "publishing content update"
                );
                shared.publish(update);
            };

            let call = async {
                match mode {
                    StreamMode::NewMessage(message) => {
                        let request = StartStreamRequest {
                            conversation_id: conversation_id.clone(),
                            text: message.turn.text,
                            metadata: message.metadata,
                            attachments: message.turn.attachments,
                            session_id: message.session_id,
                        };
                        backend
                            .start_stream(request, cancel.clone(), &mut on_progress)
                            .await
                            .map(Some)
                    }
                    StreamMode::Resume(resume) => {
                        let request = ResumeStreamRequest {
                            conversation_id: conversation_id.clone(),
                            session_id: resume.session_id,
                            cursor: resume.cursor,
                        };
                        backend
                            .resume_stream(request, cancel.clone(), &mut on_progress)
                            .await
                            .map(|()| None)
                    }
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = call => Some(result),
            }
        };

        let result = match outcome {
            None => {
                shared.set_phase(SessionPhase::Canceled);
                lease.release();
                spawn_stop(Arc::clone(&backend), conversation_id.clone());
                Ok(())
            }
            // A backend-side cancel (another client stopped the run, or the
            // server aborted it on request) ends the run quietly like a local
            // cancel; no stop is sent since the backend already halted it.
            Some(Err(error)) if error.is_cancelled() || cancel.is_cancelled() => {
                tracing::debug!(conversation_id = %conversation_id, %error, "suppressing error after cancellation");
                shared.set_phase(SessionPhase::Canceled);
                Ok(())
            }
            Some(Err(error)) => {
                if accumulator.streaming {
                    shared.publish(accumulator.render());
                }
                shared.set_phase(SessionPhase::Failed);
                Err(error)
            }
            Some(Ok(session_id)) => {
                if let Some(session_id) = session_id {
                    lease.record_session_id(session_id);
                }
                if accumulator.streaming {
                    shared.publish(accumulator.render());
                }
                shared.set_phase(SessionPhase::Completed);
                Ok(())
            }
        };

        lease.release();
        tracing::info!(
            conversation_id = %conversation_id,
            run_id = lease.run_id(),
            phase = ?shared.phase(),
            "run finished"
        );
        result
    }
}

/// Sends the out-of-band stop without holding up the run's teardown.
fn spawn_stop(backend: Arc<dyn ChatBackend>, conversation_id: String) {
    tokio::spawn(async move {
        match backend.stop(&conversation_id).await {
            Ok(()) => tracing::debug!(conversation_id = %conversation_id, "backend stop acknowledged"),
            Err(error) => {
                tracing::warn!(conversation_id = %conversation_id, %error, "backend stop failed")
            }
        }
    });
}

enum Wake {
    Published,
    Cancelled,
    Settled(Result<Result<(), BackendError>, JoinError>),
}

fn take_unseen(shared: &Shared, last_yielded: &mut Option<ContentUpdate>) -> Option<ContentUpdate> {
    let update = shared.take()?;
    if last_yielded.as_ref() == Some(&update) {
        return None;
    }
    *last_yielded = Some(update.clone());
    Some(update)
}

/// Finite, non-restartable sequence of content updates for one run.
///
/// Ends without an error item when the run is cancelled. Dropping the stream
/// before it ends cancels the run.
pub struct RunStream {
    conversation_id: String,
    updates: Pin<Box<dyn Stream<Item = Result<ContentUpdate, RunError>> + Send>>,
    shared: Arc<Shared>,
}

impl RunStream {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Latest observed phase of the underlying session.
    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }
}

impl fmt::Debug for RunStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStream")
            .field("conversation_id", &self.conversation_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Stream for RunStream {
    type Item = Result<ContentUpdate, RunError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.updates.as_mut().poll_next(cx)
    }
}
