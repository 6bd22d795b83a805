//! Tool-call reconciliation.
//!
//! Backends re-send tool-call payloads on every progress callback, possibly
//! repeated, possibly partial. [`ToolCallReconciler`] folds them into one record
//! per call identifier. A record moves from pending to terminal and never back.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Classification of a payload's `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ToolEventKind {
    Call,
    /// Any intermediate tag the backend emits between call and result.
    Progress(String),
    Result,
    DelegationResult,
    Error,
}

impl ToolEventKind {
    /// Parses a wire tag. A missing tag is treated as `call`.
    pub fn parse(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            None | Some("") | Some("call") => Self::Call,
            Some("result") => Self::Result,
            Some("delegation_result") => Self::DelegationResult,
            Some("error") => Self::Error,
            Some(other) => Self::Progress(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Call => "call",
            Self::Progress(tag) => tag,
            Self::Result => "result",
            Self::DelegationResult => "delegation_result",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result | Self::DelegationResult | Self::Error)
    }
}

impl From<ToolEventKind> for String {
    fn from(value: ToolEventKind) -> Self {
        value.as_str().to_string()
    }
}

/// Arguments of a call, tracked in structured and raw-text form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolArguments {
    pub structured: Map<String, Value>,
    pub text: String,
}

impl ToolArguments {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(object) => Self {
                structured: object.clone(),
                text: value.to_string(),
            },
            Value::String(text) => Self {
                structured: Map::new(),
                text: text.clone(),
            },
            other => Self {
                structured: Map::new(),
                text: other.to_string(),
            },
        }
    }
}

/// Reconciled view of one call identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    pub arguments: ToolArguments,
    /// Kind of the last payload that changed this record.
    pub last_event: ToolEventKind,
    /// Most recent `detail` snapshot.
    pub state: Option<Value>,
    /// Set once a terminal payload arrives; `Value::Null` when it carried neither
    /// a response nor a detail.
    pub result: Option<Value>,
    pub is_error: bool,
}

impl ToolCallRecord {
    fn pending(call_id: String) -> Self {
        Self {
            call_id,
            name: String::new(),
            arguments: ToolArguments::default(),
            last_event: ToolEventKind::Call,
            state: None,
            result: None,
            is_error: false,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }

    fn merge(&mut self, payload: ParsedPayload) {
        if let Some(name) = payload.name {
            self.name = name;
        }
        if let Some(arguments) = payload.arguments {
            self.arguments = ToolArguments::from_value(&arguments);
        }
        if let Some(detail) = &payload.detail {
            self.state = Some(detail.clone());
        }

        if payload.kind.is_terminal() {
            self.result = Some(payload.response.or(payload.detail).unwrap_or(Value::Null));
            self.is_error = payload.kind == ToolEventKind::Error;
        }
        self.last_event = payload.kind;
    }
}

/// Insertion-ordered records keyed by call identifier.
///
/// Order is the first-seen order of each identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolCallLedger {
    records: IndexMap<String, ToolCallRecord>,
}

impl ToolCallLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, call_id: &str) -> Option<&ToolCallRecord> {
        self.records.get(call_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.records.values()
    }

    pub fn to_records(&self) -> Vec<ToolCallRecord> {
        self.records.values().cloned().collect()
    }
}

/// Non-fatal problem with one payload of a batch. The payload is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileDiagnostic {
    ParseFailed { index: usize, message: String },
    NotAnObject { index: usize },
    MissingIdentifier { index: usize },
}

impl fmt::Display for ReconcileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailed { index, message } => {
                write!(f, "tool-call payload {index} is not valid JSON: {message}")
            }
            Self::NotAnObject { index } => {
                write!(f, "tool-call payload {index} is not a JSON object")
            }
            Self::MissingIdentifier { index } => {
                write!(f, "tool-call payload {index} has no call identifier")
            }
        }
    }
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub ledger: ToolCallLedger,
    pub diagnostics: Vec<ReconcileDiagnostic>,
}

pub struct ToolCallReconciler;

impl ToolCallReconciler {
    /// Folds one event's payloads into `ledger`.
    ///
    /// Records only move from pending to terminal. A non-terminal payload that
    /// arrives for a call already holding a terminal result is dropped whole:
    /// the result, error flag, name, arguments and state all stay as they
    /// were. A later terminal payload for the same call replaces the result.
    pub fn apply(ledger: ToolCallLedger, payloads: &[Value]) -> Reconciled {
        let mut ledger = ledger;
        let mut diagnostics = Vec::new();

        for (index, raw) in payloads.iter().enumerate() {
            let payload = match ParsedPayload::parse(index, raw) {
                Ok(payload) => payload,
                Err(diagnostic) => {
                    report(&diagnostic);
                    diagnostics.push(diagnostic);
                    continue;
                }
            };

            let record = ledger
                .records
                .entry(payload.call_id.clone())
                .or_insert_with(|| ToolCallRecord::pending(payload.call_id.clone()));
            if record.is_terminal() && !payload.kind.is_terminal() {
                tracing::trace!(
                    call_id = %record.call_id,
                    event = payload.kind.as_str(),
                    "ignoring non-terminal event for completed tool call"
                );
                continue;
            }
            record.merge(payload);
        }

        Reconciled {
            ledger,
            diagnostics,
        }
    }

    /// Deduplicates a stored list of payloads.
    ///
    /// The first appearance of an identifier fixes its position. Later payloads
    /// for the same identifier replace it only when they are terminal.
    pub fn replay_history(payloads: &[Value]) -> Reconciled {
        let mut ledger = ToolCallLedger::new();
        let mut diagnostics = Vec::new();

        for (index, raw) in payloads.iter().enumerate() {
            let payload = match ParsedPayload::parse(index, raw) {
                Ok(payload) => payload,
                Err(diagnostic) => {
                    report(&diagnostic);
                    diagnostics.push(diagnostic);
                    continue;
                }
            };

            match ledger.records.get_mut(&payload.call_id) {
                None => {
                    let mut record = ToolCallRecord::pending(payload.call_id.clone());
                    record.merge(payload);
                    ledger.records.insert(record.call_id.clone(), record);
                }
                Some(record) if payload.kind.is_terminal() => record.merge(payload),
                Some(_) => {}
            }
        }

        Reconciled {
            ledger,
            diagnostics,
        }
    }
}

fn report(diagnostic: &ReconcileDiagnostic) {
    tracing::warn!(%diagnostic, "dropping malformed tool-call payload");
}

struct ParsedPayload {
    call_id: String,
    name: Option<String>,
    arguments: Option<Value>,
    kind: ToolEventKind,
    detail: Option<Value>,
    response: Option<Value>,
}

impl ParsedPayload {
    fn parse(index: usize, raw: &Value) -> Result<Self, ReconcileDiagnostic> {
        let decoded;
        let value = match raw {
            Value::String(encoded) => {
                decoded = serde_json::from_str::<Value>(encoded).map_err(|error| {
                    ReconcileDiagnostic::ParseFailed {
                        index,
                        message: error.to_string(),
                    }
                })?;
                &decoded
            }
            other => other,
        };

        let object = value
            .as_object()
            .ok_or(ReconcileDiagnostic::NotAnObject { index })?;
        let call_id = ["id", "call_id"]
            .iter()
            .find_map(|key| object.get(*key).and_then(identifier))
            .ok_or(ReconcileDiagnostic::MissingIdentifier { index })?;

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let detail = present(object.get("detail"));
        let arguments = detail
            .as_ref()
            .and_then(|detail| present(detail.get("arguments")))
            .or_else(|| present(object.get("arguments")))
            .or_else(|| present(object.get("args")));

        Ok(Self {
            call_id,
            name,
            arguments,
            kind: ToolEventKind::parse(object.get("type").and_then(Value::as_str)),
            detail,
            response: present(object.get("response")),
        })
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn present(value: Option<&Value>) -> Option<Value> {
    value.filter(|value| !value.is_null()).cloned()
}
