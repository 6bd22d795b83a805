//! Deterministic scripted implementation of the shared `chat_backend` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing. Every call it receives
//! is recorded so tests can assert on exactly what the runtime sent.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chat_backend::{
    ActiveSession, BackendError, BackendProfile, CancellationToken, ChatBackend, ProgressSink,
    ResumeStreamRequest, StartStreamRequest, StreamProgress,
};
use serde_json::json;
use uuid::Uuid;

/// Stable backend identifier used for explicit startup selection.
pub const MOCK_BACKEND_ID: &str = "mock";

/// One scripted action performed while serving a stream call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Progress(StreamProgress),
    Sleep(Duration),
    /// Parks until the run is cancelled, then settles with `Cancelled`.
    WaitForCancel,
    Fail(BackendError),
}

/// Ordered steps replayed for every start or resume call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockScript {
    pub steps: Vec<ScriptStep>,
    pub session_id: Option<String>,
}

impl MockScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn progress(mut self, progress: StreamProgress) -> Self {
        self.steps.push(ScriptStep::Progress(progress));
        self
    }

    #[must_use]
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Sleep(duration));
        self
    }

    #[must_use]
    pub fn wait_for_cancel(mut self) -> Self {
        self.steps.push(ScriptStep::WaitForCancel);
        self
    }

    #[must_use]
    pub fn fail(mut self, error: BackendError) -> Self {
        self.steps.push(ScriptStep::Fail(error));
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Streams `chunks` word by word as cumulative text snapshots.
    #[must_use]
    pub fn streamed_text(chunks: &[&str], token_delay: Duration) -> Self {
        let mut script = Self::new();
        let mut cumulative = String::new();

        for chunk in chunks {
            let mut pending_token = String::new();
            for ch in chunk.chars() {
                pending_token.push(ch);

                if matches!(ch, ' ' | '\n') {
                    cumulative.push_str(&std::mem::take(&mut pending_token));
                    script = script
                        .progress(StreamProgress::text(cumulative.clone()))
                        .sleep(token_delay);
                }
            }

            if !pending_token.is_empty() {
                cumulative.push_str(&pending_token);
                script = script
                    .progress(StreamProgress::text(cumulative.clone()))
                    .sleep(token_delay);
            }
        }

        script
    }
}

/// A call observed by [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Start(StartStreamRequest),
    Resume(ResumeStreamRequest),
    Stop { conversation_id: String },
    Detect { conversation_id: String },
}

/// Deterministic backend used by `chat_stream` tests and local runs.
#[derive(Debug)]
pub struct MockBackend {
    start_script: MockScript,
    resume_script: MockScript,
    active_session: Mutex<Option<ActiveSession>>,
    detect_failure: Mutex<Option<BackendError>>,
    calls: Mutex<Vec<RecordedCall>>,
    stop_delay: Option<Duration>,
}

impl MockBackend {
    /// Creates a backend that replays `start_script` for every new message.
    #[must_use]
    pub fn new(start_script: MockScript) -> Self {
        Self {
            start_script,
            resume_script: MockScript::new(),
            active_session: Mutex::new(None),
            detect_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            stop_delay: None,
        }
    }

    #[must_use]
    pub fn with_resume_script(mut self, resume_script: MockScript) -> Self {
        self.resume_script = resume_script;
        self
    }

    #[must_use]
    pub fn with_active_session(self, session: ActiveSession) -> Self {
        self.set_active_session(Some(session));
        self
    }

    /// Makes `stop` park for `delay` after recording the call.
    #[must_use]
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// Replaces the session reported by `detect_active_session`.
    pub fn set_active_session(&self, session: Option<ActiveSession>) {
        *lock_unpoisoned(&self.active_session) = session;
    }

    /// Makes the next `detect_active_session` call fail with `error`.
    pub fn fail_next_detect(&self, error: BackendError) {
        *lock_unpoisoned(&self.detect_failure) = Some(error);
    }

    /// Returns every call received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    #[must_use]
    pub fn start_requests(&self) -> Vec<StartStreamRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Start(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn resume_requests(&self) -> Vec<ResumeStreamRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Resume(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Stop { .. }))
            .count()
    }

    fn record(&self, call: RecordedCall) {
        lock_unpoisoned(&self.calls).push(call);
    }

    async fn play(
        script: &MockScript,
        cancel: &CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<(), BackendError> {
        for step in &script.steps {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }

            match step {
                ScriptStep::Progress(progress) => on_progress(progress.clone()),
                ScriptStep::Sleep(duration) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                        _ = tokio::time::sleep(*duration) => {}
                    }
                }
                ScriptStep::WaitForCancel => {
                    cancel.cancelled().await;
                    return Err(BackendError::Cancelled);
                }
                ScriptStep::Fail(error) => return Err(error.clone()),
            }
        }

        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        Ok(())
    }

    const TOKEN_DELAY_MS: u64 = 40;
}

impl Default for MockBackend {
    fn default() -> Self {
        let token_delay = Duration::from_millis(Self::TOKEN_DELAY_MS);
        let reasoning = "Looking up the workspace layout before answering.";
        let lookup_call = json!({
            "id": "call-1",
            "name": "list_files",
            "type": "call",
            "detail": { "arguments": { "path": "." } },
        });
        let lookup_result = json!({
            "id": "call-1",
            "name": "list_files",
            "type": "result",
            "response": ["Cargo.toml", "src/lib.rs"],
        });

        let mut script = MockScript::new()
            .progress(StreamProgress::default().with_reasoning(reasoning))
            .sleep(token_delay)
            .progress(
                StreamProgress::default()
                    .with_reasoning(reasoning)
                    .with_tool_call(lookup_call.clone()),
            )
            .sleep(token_delay)
            .progress(
                StreamProgress::default()
                    .with_reasoning(reasoning)
                    .with_tool_call(lookup_result.clone()),
            )
            .sleep(token_delay);

        let answer = MockScript::streamed_text(
            &[
                "## Mocked answer\n",
                "- The workspace has a `Cargo.toml` manifest.\n",
                "- Library code lives in `src/lib.rs`.\n",
                "Completed.\n",
            ],
            token_delay,
        );
        for step in answer.steps {
            script.steps.push(match step {
                ScriptStep::Progress(progress) => ScriptStep::Progress(
                    progress
                        .with_reasoning(reasoning)
                        .with_tool_call(lookup_result.clone()),
                ),
                other => other,
            });
        }

        Self::new(script)
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile {
            backend_id: MOCK_BACKEND_ID.to_string(),
            endpoint: None,
        }
    }

    async fn start_stream(
        &self,
        request: StartStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<String, BackendError> {
        let existing_session = request.session_id.clone();
        self.record(RecordedCall::Start(request));

        Self::play(&self.start_script, &cancel, on_progress).await?;

        Ok(self
            .start_script
            .session_id
            .clone()
            .or(existing_session)
            .unwrap_or_else(|| format!("mock-session-{}", Uuid::new_v4())))
    }

    async fn resume_stream(
        &self,
        request: ResumeStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<(), BackendError> {
        self.record(RecordedCall::Resume(request));
        Self::play(&self.resume_script, &cancel, on_progress).await
    }

    async fn stop(&self, conversation_id: &str) -> Result<(), BackendError> {
        self.record(RecordedCall::Stop {
            conversation_id: conversation_id.to_string(),
        });
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn detect_active_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ActiveSession>, BackendError> {
        self.record(RecordedCall::Detect {
            conversation_id: conversation_id.to_string(),
        });

        if let Some(error) = lock_unpoisoned(&self.detect_failure).take() {
            return Err(error);
        }

        Ok(lock_unpoisoned(&self.active_session).clone())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
