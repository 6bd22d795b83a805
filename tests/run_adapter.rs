mod support;

use std::time::Duration;

use chat_backend::{Attachment, BackendError, CancellationToken, StreamProgress};
use chat_backend_mock::{MockBackend, MockScript, RecordedCall};
use chat_stream::{
    RunError, RunInput, RuntimeConfig, SessionPhase, ThreadMessage, TurnInput,
};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{adapter_for, assert_ordered, call_ids, drain, user_turn, STEP};

#[tokio::test(start_paused = true)]
async fn streams_ordered_updates_and_records_session_on_completion() {
    let script = MockScript::new()
        .progress(StreamProgress::default().with_reasoning("thinking"))
        .sleep(STEP)
        .progress(
            StreamProgress::text("Hel")
                .with_reasoning("thinking")
                .with_tool_call(json!({"id": "t1", "name": "search", "type": "call"}))
                .with_cursor("7"),
        )
        .sleep(STEP)
        .progress(
            StreamProgress::text("Hello")
                .with_reasoning("thinking")
                .with_tool_call(json!({"id": "t1", "type": "result", "response": "found"})),
        )
        .with_session_id("session-1");
    let (_, adapter) = adapter_for(script);

    let stream = adapter
        .run("conv", user_turn("hi"), CancellationToken::new())
        .expect("run should start");
    let (updates, error) = drain(stream).await;

    assert_eq!(error, None);
    assert!(!updates.is_empty());
    updates.iter().for_each(assert_ordered);

    let last = updates.last().expect("final update");
    assert_eq!(last.reasoning(), Some("thinking"));
    assert_eq!(last.text(), "Hello");
    assert_eq!(call_ids(last), vec!["t1".to_string()]);

    let state = adapter.session_state("conv");
    assert_eq!(state.session_id.as_deref(), Some("session-1"));
    assert_eq!(state.cursor, "7");
    assert!(!state.streaming);
}

#[tokio::test(start_paused = true)]
async fn call_then_result_yields_single_terminal_record() {
    let script = MockScript::new()
        .progress(StreamProgress::default().with_tool_call(
            json!({"id": "a", "type": "call", "detail": {"arguments": {"x": 1}}}),
        ))
        .sleep(STEP)
        .progress(
            StreamProgress::default()
                .with_tool_call(json!({"id": "a", "type": "result", "response": "42"})),
        );
    let (_, adapter) = adapter_for(script);

    let (updates, _) = drain(
        adapter
            .run("conv", user_turn("calc"), CancellationToken::new())
            .expect("run should start"),
    )
    .await;

    let last = updates.last().expect("final update");
    let records: Vec<_> = last.tool_calls().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result, Some(json!("42")));
    assert_eq!(records[0].arguments.text, r#"{"x":1}"#);
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_does_not_block_later_terminal_event() {
    let script = MockScript::new()
        .progress(StreamProgress::default().with_tool_call(json!({"id": "b", "type": "call"})))
        .sleep(STEP)
        .progress(StreamProgress::default().with_tool_call(json!("{broken")))
        .sleep(STEP)
        .progress(
            StreamProgress::default()
                .with_tool_call(json!({"id": "b", "type": "result", "response": "ok"})),
        );
    let (_, adapter) = adapter_for(script);

    let (updates, error) = drain(
        adapter
            .run("conv", user_turn("go"), CancellationToken::new())
            .expect("run should start"),
    )
    .await;

    assert_eq!(error, None);
    let record = updates
        .last()
        .and_then(|update| update.tool_calls().next().cloned())
        .expect("record for b");
    assert_eq!(record.call_id, "b");
    assert!(record.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn second_run_is_rejected_while_first_streams() {
    let (backend, adapter) = adapter_for(
        MockScript::new()
            .progress(StreamProgress::text("working"))
            .wait_for_cancel(),
    );
    let cancel = CancellationToken::new();
    let mut first = adapter
        .run("conv", user_turn("one"), cancel.clone())
        .expect("first run");

    let update = first.next().await.expect("first update").expect("not an error");
    assert_eq!(update.text(), "working");
    assert_eq!(first.phase(), SessionPhase::Streaming);

    let error = adapter
        .run("conv", user_turn("two"), CancellationToken::new())
        .expect_err("second run must be refused");
    assert_eq!(error, RunError::already_streaming("conv"));
    assert_eq!(backend.start_requests().len(), 1);

    cancel.cancel();
    assert!(first.next().await.is_none());
    assert!(adapter.run("conv", user_turn("three"), CancellationToken::new()).is_ok());
}

#[tokio::test(start_paused = true)]
async fn runs_on_different_conversations_are_independent() {
    let (_, adapter) = adapter_for(
        MockScript::new()
            .progress(StreamProgress::text("x"))
            .wait_for_cancel(),
    );

    let first = adapter
        .run("a", user_turn("one"), CancellationToken::new())
        .expect("conversation a");
    let second = adapter
        .run("b", user_turn("two"), CancellationToken::new())
        .expect("conversation b");

    assert!(adapter.is_streaming("a"));
    assert!(adapter.is_streaming("b"));
    drop(first);
    assert!(adapter.is_streaming("b"));
    drop(second);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_is_the_terminal_item() {
    let (_, adapter) = adapter_for(
        MockScript::new()
            .progress(StreamProgress::text("partial"))
            .sleep(STEP)
            .fail(BackendError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            }),
    );

    let mut stream = adapter
        .run("conv", user_turn("hi"), CancellationToken::new())
        .expect("run should start");
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }

    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0].as_ref().map(|update| update.text().to_string()),
        Ok("partial".to_string())
    );
    assert_eq!(
        items[1],
        Err(RunError::Backend(BackendError::Status {
            status: 502,
            message: "bad gateway".to_string(),
        }))
    );
    assert_eq!(stream.phase(), SessionPhase::Failed);
    assert!(!adapter.is_streaming("conv"));
}

#[tokio::test(start_paused = true)]
async fn failure_before_first_event_yields_only_the_error() {
    let (_, adapter) = adapter_for(
        MockScript::new().fail(BackendError::Transport("refused".to_string())),
    );

    let (updates, error) = drain(
        adapter
            .run("conv", user_turn("hi"), CancellationToken::new())
            .expect("run should start"),
    )
    .await;

    assert!(updates.is_empty());
    assert_eq!(
        error,
        Some(RunError::Backend(BackendError::Transport("refused".to_string())))
    );
}

#[tokio::test(start_paused = true)]
async fn start_request_carries_turn_text_images_metadata_and_session() {
    let image = Attachment::new("shot.png", "image/png", "file:///shot.png");
    let (backend, adapter) = adapter_for(MockScript::new().with_session_id("s-9"));
    let input = TurnInput::new(vec![
        ThreadMessage::user("earlier"),
        ThreadMessage::assistant("reply"),
        ThreadMessage::user("look at this").with_image(image.clone()),
    ])
    .with_metadata(json!({"repository": "demo/repo"}))
    .with_session_id("s-8");

    let (updates, error) = drain(
        adapter
            .run("conv", RunInput::Turn(input), CancellationToken::new())
            .expect("run should start"),
    )
    .await;

    assert_eq!(error, None);
    assert!(updates.is_empty());
    let request = backend.start_requests().pop().expect("start request");
    assert_eq!(request.conversation_id, "conv");
    assert_eq!(request.text, "look at this");
    assert_eq!(request.attachments, vec![image]);
    assert_eq!(request.metadata, json!({"repository": "demo/repo"}));
    assert_eq!(request.session_id.as_deref(), Some("s-8"));
    assert_eq!(adapter.session_state("conv").session_id.as_deref(), Some("s-9"));
}

#[tokio::test(start_paused = true)]
async fn new_message_resets_cursor_to_configured_sentinel() {
    let backend = MockBackend::new(
        MockScript::new().progress(StreamProgress::text("a").with_cursor("15")),
    );
    let backend = std::sync::Arc::new(backend);
    let adapter = chat_stream::RunAdapter::with_config(
        backend.clone(),
        RuntimeConfig::default().with_initial_cursor("start"),
    );

    drain(
        adapter
            .run("conv", user_turn("one"), CancellationToken::new())
            .expect("first run"),
    )
    .await;
    assert_eq!(adapter.session_state("conv").cursor, "15");

    let stream = adapter
        .run("conv", user_turn("two"), CancellationToken::new())
        .expect("second run");
    let state = adapter.session_state("conv");
    assert_eq!(state.cursor, "start");
    assert_eq!(state.session_id, None);
    drop(stream);

    assert_eq!(
        backend
            .calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Start(_)))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn identical_consecutive_snapshots_are_yielded_once() {
    let (_, adapter) = adapter_for(
        MockScript::new()
            .progress(StreamProgress::text("same"))
            .sleep(Duration::from_millis(5))
            .progress(StreamProgress::text("same"))
            .sleep(Duration::from_millis(5)),
    );

    let (updates, _) = drain(
        adapter
            .run("conv", user_turn("hi"), CancellationToken::new())
            .expect("run should start"),
    )
    .await;

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].text(), "same");
}
