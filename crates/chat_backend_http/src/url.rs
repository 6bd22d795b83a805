use url::Url;

use crate::error::HttpBackendError;

/// Default API root for a locally running chat server.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";

/// Normalize a base URL to the chat API root.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes are dropped
/// 3) `/api` is appended unless the path already ends with it
pub fn normalize_base_url(input: &str) -> Result<Url, HttpBackendError> {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let mut url = Url::parse(base)
        .map_err(|error| HttpBackendError::InvalidBaseUrl(format!("{base}: {error}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(HttpBackendError::InvalidBaseUrl(format!(
            "{base}: expected an http(s) URL"
        )));
    }

    let path = url.path().trim_end_matches('/').to_string();
    let path = if path.ends_with("/api") {
        path
    } else {
        format!("{path}/api")
    };
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Endpoint builder rooted at a normalized API URL.
///
/// Identifiers are pushed as escaped path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    root: Url,
}

impl Endpoints {
    pub fn new(root: Url) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// `POST {root}/conversations/{id}/messages`
    pub fn messages(&self, conversation_id: &str) -> Url {
        self.conversation(conversation_id, &["messages"])
    }

    /// `POST {root}/conversations/{id}/sessions/{session_id}/resume`
    pub fn resume(&self, conversation_id: &str, session_id: &str) -> Url {
        self.conversation(conversation_id, &["sessions", session_id, "resume"])
    }

    /// `POST {root}/conversations/{id}/stop`
    pub fn stop(&self, conversation_id: &str) -> Url {
        self.conversation(conversation_id, &["stop"])
    }

    /// `GET {root}/conversations/{id}/session`
    pub fn session(&self, conversation_id: &str) -> Url {
        self.conversation(conversation_id, &["session"])
    }

    fn conversation(&self, conversation_id: &str, tail: &[&str]) -> Url {
        let mut url = self.root.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("conversations")
                .push(conversation_id)
                .extend(tail);
        }
        url
    }
}
