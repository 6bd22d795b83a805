//! Streaming session runtime for chat clients.
//!
//! Turns a backend's callback-driven, cursor-based message stream into an
//! ordered, resumable, cancelable [`RunStream`] of [`ContentUpdate`]s.
//!
//! # Public API Overview
//! - Start or resume a run through [`RunAdapter::run`].
//! - Reattach to an in-flight backend session with [`SessionResumeDetector::attach`].
//! - Fold raw tool-call payloads with [`ToolCallReconciler`] and render them with
//!   [`ContentAssembler`].

pub mod adapter;
pub mod config;
pub mod content;
pub mod error;
pub mod message;
pub mod reconcile;
pub mod resume;
pub mod session;
pub mod stream;

pub use crate::adapter::{RunAdapter, RunInput, TurnInput};
pub use crate::config::RuntimeConfig;
pub use crate::content::{ContentAssembler, ContentPart, ContentUpdate};
pub use crate::error::RunError;
pub use crate::message::{MessagePart, Role, ThreadMessage, Turn};
pub use crate::reconcile::{
    ReconcileDiagnostic, Reconciled, ToolArguments, ToolCallLedger, ToolCallReconciler,
    ToolCallRecord, ToolEventKind,
};
pub use crate::resume::{AttachOutcome, HistoryState, SessionResumeDetector};
pub use crate::session::{ResumeRequest, SessionLease, SessionState};
pub use crate::stream::{NewMessage, RunStream, SessionPhase, StreamMode, StreamSession};

pub use chat_backend::CancellationToken;
