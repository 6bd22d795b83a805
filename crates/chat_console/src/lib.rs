//! Console front end for the chat streaming runtime.
//!
//! ## Backend bootstrap
//!
//! - `CHAT_STREAM_BACKEND=mock` (default) runs against a scripted local backend.
//! - `CHAT_STREAM_BACKEND=http` talks to a chat server; configure it with
//!   `CHAT_STREAM_BASE_URL`, `CHAT_STREAM_TOKEN` and `CHAT_STREAM_TIMEOUT_SEC`.
//!
//! Runtime knobs (`CHAT_STREAM_HISTORY_WAIT_MS`, `CHAT_STREAM_MAX_RECONNECTS`)
//! are read by [`chat_stream::RuntimeConfig::from_env`].

pub mod backends;
pub mod cli;
pub mod render;
