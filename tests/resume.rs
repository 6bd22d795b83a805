mod support;

use std::time::Duration;

use chat_backend::{ActiveSession, BackendError, CancellationToken, SessionStatus, StreamProgress};
use chat_backend_mock::{MockBackend, MockScript, RecordedCall};
use chat_stream::{
    AttachOutcome, HistoryState, ResumeRequest, RunError, RunInput, SessionResumeDetector,
    ThreadMessage,
};
use pretty_assertions::assert_eq;
use support::{adapter_with, drain, user_turn, STEP};
use tokio::sync::watch;

fn active(session_id: &str, cursor: &str) -> ActiveSession {
    ActiveSession {
        session_id: session_id.to_string(),
        cursor: cursor.to_string(),
        status: SessionStatus::Active,
    }
}

fn resume_backend() -> MockBackend {
    MockBackend::new(MockScript::new().progress(StreamProgress::text("fresh")))
        .with_resume_script(
            MockScript::new()
                .progress(StreamProgress::text("resumed so far").with_cursor("21"))
                .sleep(STEP)
                .progress(StreamProgress::text("resumed so far, done")),
        )
}

fn loaded(messages: Vec<ThreadMessage>) -> watch::Receiver<HistoryState> {
    let (_tx, rx) = watch::channel(HistoryState::Loaded(messages));
    rx
}

#[tokio::test(start_paused = true)]
async fn attach_resumes_active_session_without_resending_text() {
    let (backend, adapter) = adapter_with(resume_backend().with_active_session(active("s-1", "17")));
    let detector = SessionResumeDetector::new(adapter.clone());
    let history = loaded(vec![
        ThreadMessage::user("original question"),
        ThreadMessage::assistant("partial answer"),
    ]);

    let outcome = detector
        .attach("conv", history, CancellationToken::new())
        .await
        .expect("attach should succeed");
    let AttachOutcome::Resumed(stream) = outcome else {
        panic!("expected a resumed run, got {outcome:?}");
    };
    let (updates, error) = drain(stream).await;

    assert_eq!(error, None);
    assert_eq!(
        updates.last().map(|update| update.text().to_string()),
        Some("resumed so far, done".to_string())
    );
    assert!(backend.start_requests().is_empty());
    assert_eq!(
        backend.resume_requests(),
        vec![chat_backend::ResumeStreamRequest {
            conversation_id: "conv".to_string(),
            session_id: "s-1".to_string(),
            cursor: "17".to_string(),
        }]
    );

    let state = adapter.session_state("conv");
    assert_eq!(state.session_id.as_deref(), Some("s-1"));
    assert_eq!(state.cursor, "21");
    assert_eq!(state.reconnect_attempts, 1);
    assert!(!state.streaming);
    assert_eq!(adapter.take_resume("conv"), None);
}

#[tokio::test(start_paused = true)]
async fn attach_without_active_session_does_nothing() {
    let (backend, adapter) = adapter_with(resume_backend());
    let detector = SessionResumeDetector::new(adapter.clone());

    let outcome = detector
        .attach(
            "conv",
            loaded(vec![ThreadMessage::user("q")]),
            CancellationToken::new(),
        )
        .await
        .expect("attach should succeed");

    assert!(matches!(outcome, AttachOutcome::NoActiveSession));
    assert_eq!(
        backend.calls(),
        vec![RecordedCall::Detect {
            conversation_id: "conv".to_string()
        }]
    );
    assert!(!adapter.is_streaming("conv"));
}

#[tokio::test(start_paused = true)]
async fn attach_ignores_sessions_that_are_not_active() {
    let session = ActiveSession {
        status: SessionStatus::Completed,
        ..active("s-1", "3")
    };
    let (backend, adapter) = adapter_with(resume_backend().with_active_session(session));
    let detector = SessionResumeDetector::new(adapter);

    let outcome = detector
        .attach(
            "conv",
            loaded(vec![ThreadMessage::user("q")]),
            CancellationToken::new(),
        )
        .await
        .expect("attach should succeed");

    assert!(matches!(
        outcome,
        AttachOutcome::Inactive(SessionStatus::Completed)
    ));
    assert!(backend.resume_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_detect_is_treated_as_no_active_session() {
    let backend = resume_backend().with_active_session(active("s-1", "3"));
    backend.fail_next_detect(BackendError::Transport("offline".to_string()));
    let (backend, adapter) = adapter_with(backend);
    let detector = SessionResumeDetector::new(adapter);

    let outcome = detector
        .attach(
            "conv",
            loaded(vec![ThreadMessage::user("q")]),
            CancellationToken::new(),
        )
        .await
        .expect("attach should succeed");

    assert!(matches!(outcome, AttachOutcome::NoActiveSession));
    assert!(backend.resume_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn attach_gives_up_when_history_never_loads() {
    let (backend, adapter) = adapter_with(resume_backend().with_active_session(active("s-1", "3")));
    let detector =
        SessionResumeDetector::new(adapter.clone()).with_history_wait(Duration::from_millis(200));
    let (_tx, history) = watch::channel(HistoryState::Loading);

    let outcome = detector
        .attach("conv", history, CancellationToken::new())
        .await
        .expect("attach should succeed");

    assert!(matches!(outcome, AttachOutcome::HistoryTimeout));
    assert!(backend.resume_requests().is_empty());
    assert_eq!(adapter.take_resume("conv"), None);
}

#[tokio::test(start_paused = true)]
async fn attach_waits_for_history_that_loads_in_time() {
    let (backend, adapter) = adapter_with(resume_backend().with_active_session(active("s-1", "3")));
    let detector =
        SessionResumeDetector::new(adapter).with_history_wait(Duration::from_secs(1));
    let (tx, history) = watch::channel(HistoryState::Loading);

    let loader = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(HistoryState::Loaded(vec![ThreadMessage::user("q")]))
            .expect("detector should still be listening");
        tx
    });
    let outcome = detector
        .attach("conv", history, CancellationToken::new())
        .await
        .expect("attach should succeed");
    let _tx = loader.await.expect("loader task");

    let AttachOutcome::Resumed(stream) = outcome else {
        panic!("expected a resumed run, got {outcome:?}");
    };
    drain(stream).await;
    assert_eq!(backend.resume_requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_requires_a_user_message_anchor() {
    let (backend, adapter) = adapter_with(resume_backend().with_active_session(active("s-1", "3")));
    let detector = SessionResumeDetector::new(adapter.clone());

    let outcome = detector
        .attach(
            "conv",
            loaded(vec![ThreadMessage::assistant("only assistant")]),
            CancellationToken::new(),
        )
        .await
        .expect("attach should succeed");

    assert!(matches!(outcome, AttachOutcome::NoUserMessage));
    assert!(backend.resume_requests().is_empty());
    assert_eq!(adapter.take_resume("conv"), None);
}

#[tokio::test(start_paused = true)]
async fn attach_while_streaming_fails_and_withdraws_request() {
    let backend = MockBackend::new(
        MockScript::new()
            .progress(StreamProgress::text("busy"))
            .wait_for_cancel(),
    )
    .with_active_session(active("s-1", "3"));
    let (_, adapter) = adapter_with(backend);
    let detector = SessionResumeDetector::new(adapter.clone());
    let running = adapter
        .run("conv", user_turn("hi"), CancellationToken::new())
        .expect("first run");

    let error = detector
        .attach(
            "conv",
            loaded(vec![ThreadMessage::user("hi")]),
            CancellationToken::new(),
        )
        .await
        .expect_err("conversation is busy");

    assert_eq!(error, RunError::already_streaming("conv"));
    assert_eq!(adapter.take_resume("conv"), None);
    drop(running);
}

#[tokio::test(start_paused = true)]
async fn pending_resume_overrides_caller_turn() {
    let (backend, adapter) = adapter_with(resume_backend());
    adapter.queue_resume(
        "conv",
        ResumeRequest {
            session_id: "s-4".to_string(),
            cursor: "9".to_string(),
        },
    );

    drain(
        adapter
            .run("conv", user_turn("should not be sent"), CancellationToken::new())
            .expect("run should start"),
    )
    .await;

    assert!(backend.start_requests().is_empty());
    assert_eq!(backend.resume_requests().len(), 1);
    assert_eq!(backend.resume_requests()[0].cursor, "9");
}

#[tokio::test(start_paused = true)]
async fn repeated_resumes_hit_the_reconnect_limit() {
    let backend = std::sync::Arc::new(resume_backend());
    let adapter = chat_stream::RunAdapter::with_config(
        backend.clone(),
        chat_stream::RuntimeConfig::default().with_max_reconnect_attempts(2),
    );
    let request = ResumeRequest {
        session_id: "s-1".to_string(),
        cursor: "1".to_string(),
    };

    for _ in 0..2 {
        adapter.queue_resume("conv", request.clone());
        drain(
            adapter
                .run("conv", RunInput::Resume, CancellationToken::new())
                .expect("within limit"),
        )
        .await;
    }

    adapter.queue_resume("conv", request);
    let error = adapter
        .run("conv", RunInput::Resume, CancellationToken::new())
        .expect_err("limit reached");

    assert_eq!(error, RunError::reconnect_limit("conv", 2));
    assert_eq!(adapter.session_state("conv").session_id, None);
    assert_eq!(backend.resume_requests().len(), 2);

    drain(
        adapter
            .run("conv", user_turn("start over"), CancellationToken::new())
            .expect("fresh turn resets the counter"),
    )
    .await;
    assert_eq!(adapter.session_state("conv").reconnect_attempts, 0);
}
