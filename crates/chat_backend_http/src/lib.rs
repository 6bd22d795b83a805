//! HTTP transport for the chat streaming runtime.
//!
//! This crate owns request building, retry policy and event-stream parsing for a
//! chat server that exposes conversations under `{base}/api/conversations/{id}`.
//! Each streamed `data:` frame is a JSON object tagged by `type`:
//! `progress` frames carry cumulative [`chat_backend::StreamProgress`] snapshots,
//! `done` ends the run and `error` fails it.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::{HttpBackend, HTTP_BACKEND_ID};
pub use config::HttpBackendConfig;
pub use error::HttpBackendError;
pub use events::BackendFrame;
pub use sse::SseStreamParser;
pub use url::{normalize_base_url, Endpoints, DEFAULT_BASE_URL};
