#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chat_backend_mock::{MockBackend, MockScript};
use chat_stream::{
    ContentPart, ContentUpdate, RunAdapter, RunError, RunInput, RunStream, ThreadMessage,
    TurnInput,
};
use futures_util::StreamExt;

pub const STEP: Duration = Duration::from_millis(10);

pub fn adapter_with(backend: MockBackend) -> (Arc<MockBackend>, RunAdapter) {
    let backend = Arc::new(backend);
    let adapter = RunAdapter::new(backend.clone());
    (backend, adapter)
}

pub fn adapter_for(script: MockScript) -> (Arc<MockBackend>, RunAdapter) {
    adapter_with(MockBackend::new(script))
}

pub fn user_turn(text: &str) -> RunInput {
    RunInput::Turn(TurnInput::new(vec![ThreadMessage::user(text)]))
}

/// Drains a run, splitting content updates from the terminal error (if any).
pub async fn drain(mut stream: RunStream) -> (Vec<ContentUpdate>, Option<RunError>) {
    let mut updates = Vec::new();
    let mut error = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(update) => {
                assert!(error.is_none(), "update yielded after terminal error");
                updates.push(update);
            }
            Err(run_error) => error = Some(run_error),
        }
    }

    (updates, error)
}

/// Asserts `[reasoning?, tool calls..., text]` shape.
pub fn assert_ordered(update: &ContentUpdate) {
    let parts = update.parts();
    assert!(
        matches!(parts.last(), Some(ContentPart::Text { .. })),
        "text segment must close every update: {parts:?}"
    );

    let body = &parts[..parts.len() - 1];
    let tool_start = usize::from(matches!(body.first(), Some(ContentPart::Reasoning { .. })));
    assert!(
        body[tool_start..]
            .iter()
            .all(|part| matches!(part, ContentPart::ToolCall(_))),
        "only tool calls may sit between reasoning and text: {parts:?}"
    );
}

pub fn call_ids(update: &ContentUpdate) -> Vec<String> {
    update
        .tool_calls()
        .map(|record| record.call_id.clone())
        .collect()
}
