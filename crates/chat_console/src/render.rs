use std::collections::HashMap;

use chat_stream::{ContentUpdate, ToolCallRecord};
use serde_json::Value;

const MAX_RESULT_CHARS: usize = 120;

/// Plain-text rendering of a complete snapshot.
pub fn render_update(update: &ContentUpdate) -> String {
    let mut out = String::new();
    if let Some(reasoning) = update.reasoning() {
        out.push_str("[thinking] ");
        out.push_str(reasoning.trim());
        out.push('\n');
    }
    for record in update.tool_calls() {
        out.push_str(&tool_line(record));
        out.push('\n');
    }
    out.push_str(update.text());
    out
}

/// One-line summary of a tool call's current state.
pub fn tool_line(record: &ToolCallRecord) -> String {
    let name = if record.name.is_empty() {
        "tool"
    } else {
        record.name.as_str()
    };
    let mut line = format!("[{name} {}] {}", record.call_id, record.last_event.as_str());
    if !record.arguments.text.is_empty() {
        line.push(' ');
        line.push_str(&truncate(&record.arguments.text));
    }
    match &record.result {
        Some(result) if record.is_error => {
            line.push_str(" -> error: ");
            line.push_str(&truncate(&compact(result)));
        }
        Some(Value::Null) => line.push_str(" -> done"),
        Some(result) => {
            line.push_str(" -> ");
            line.push_str(&truncate(&compact(result)));
        }
        None => {}
    }
    line
}

/// Turns successive snapshots into append-only console output.
///
/// Cumulative text is printed as a suffix when it extends what was already
/// shown; a rewritten text segment is printed again on a fresh line. Tool
/// lines are printed whenever their summary changes.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    reasoning: String,
    tools: HashMap<String, String>,
    text: String,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_chunk(&mut self, update: &ContentUpdate) -> String {
        let mut out = String::new();

        if let Some(reasoning) = update.reasoning() {
            if reasoning != self.reasoning {
                match reasoning.strip_prefix(self.reasoning.as_str()) {
                    Some(suffix) if !self.reasoning.is_empty() => out.push_str(suffix),
                    _ => {
                        out.push_str("[thinking] ");
                        out.push_str(reasoning);
                    }
                }
                out.push('\n');
                self.reasoning = reasoning.to_string();
            }
        }

        for record in update.tool_calls() {
            let line = tool_line(record);
            if self.tools.get(&record.call_id) != Some(&line) {
                out.push_str(&line);
                out.push('\n');
                self.tools.insert(record.call_id.clone(), line);
            }
        }

        let text = update.text();
        match text.strip_prefix(self.text.as_str()) {
            Some(suffix) => out.push_str(suffix),
            None => {
                out.push('\n');
                out.push_str(text);
            }
        }
        self.text = text.to_string();

        out
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= MAX_RESULT_CHARS {
        return single_line;
    }
    let mut out: String = single_line.chars().take(MAX_RESULT_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use chat_stream::{ContentAssembler, ToolCallLedger, ToolCallReconciler};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn ledger(payloads: &[Value]) -> ToolCallLedger {
        ToolCallReconciler::replay_history(payloads).ledger
    }

    #[test]
    fn render_update_orders_reasoning_tools_then_text() {
        let update = ContentAssembler::render(
            " plan ",
            &ledger(&[
                json!({"id": "t1", "type": "call", "name": "search", "args": {"q": "rust"}}),
                json!({"id": "t1", "type": "result", "response": "3 hits"}),
            ]),
            "Found it.",
        );

        assert_eq!(
            render_update(&update),
            "[thinking] plan\n[search t1] result {\"q\":\"rust\"} -> 3 hits\nFound it."
        );
    }

    #[test]
    fn printer_emits_only_new_suffixes() {
        let empty = ToolCallLedger::new();
        let mut printer = TranscriptPrinter::new();

        assert_eq!(
            printer.next_chunk(&ContentAssembler::render("", &empty, "Hel")),
            "Hel"
        );
        assert_eq!(
            printer.next_chunk(&ContentAssembler::render("", &empty, "Hello")),
            "lo"
        );
        assert_eq!(
            printer.next_chunk(&ContentAssembler::render("", &empty, "Hello")),
            ""
        );
        assert_eq!(
            printer.next_chunk(&ContentAssembler::render("", &empty, "Goodbye")),
            "\nGoodbye"
        );
    }

    #[test]
    fn printer_reprints_tool_lines_on_state_change() {
        let mut printer = TranscriptPrinter::new();
        let call = json!({"id": "t1", "type": "call", "name": "grep"});
        let error = json!({"id": "t1", "type": "error", "response": "denied"});

        let first = printer.next_chunk(&ContentAssembler::render("", &ledger(&[call.clone()]), ""));
        let repeat = printer.next_chunk(&ContentAssembler::render("", &ledger(&[call.clone()]), ""));
        let failed = printer.next_chunk(&ContentAssembler::render("", &ledger(&[call, error]), ""));

        assert_eq!(first, "[grep t1] call\n");
        assert_eq!(repeat, "");
        assert_eq!(failed, "[grep t1] error -> error: denied\n");
    }

    #[test]
    fn long_results_are_truncated() {
        let long = "x".repeat(MAX_RESULT_CHARS + 10);
        let truncated = truncate(&long);
        assert_eq!(truncated.chars().count(), MAX_RESULT_CHARS + 1);
        assert!(truncated.ends_with('…'));
    }
}
