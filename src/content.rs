//! Ordered content handed to the consumer on every tick.

use serde::Serialize;

use crate::reconcile::{ToolCallLedger, ToolCallRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Reasoning { text: String },
    ToolCall(ToolCallRecord),
    Text { text: String },
}

/// Snapshot of a run's content.
///
/// Parts are always ordered as an optional reasoning segment, then every known
/// tool call in first-seen order, then exactly one text segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentUpdate {
    parts: Vec<ContentPart>,
}

impl ContentUpdate {
    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self.parts.first() {
            Some(ContentPart::Reasoning { text }) => Some(text),
            _ => None,
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall(record) => Some(record),
            _ => None,
        })
    }

    /// Response text so far. Empty until the first token arrives.
    pub fn text(&self) -> &str {
        match self.parts.last() {
            Some(ContentPart::Text { text }) => text,
            _ => "",
        }
    }
}

pub struct ContentAssembler;

impl ContentAssembler {
    pub fn render(reasoning: &str, tool_calls: &ToolCallLedger, text: &str) -> ContentUpdate {
        let mut parts = Vec::with_capacity(tool_calls.len() + 2);

        if !reasoning.trim().is_empty() {
            parts.push(ContentPart::Reasoning {
                text: reasoning.to_string(),
            });
        }
        parts.extend(tool_calls.iter().cloned().map(ContentPart::ToolCall));
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });

        ContentUpdate { parts }
    }
}
