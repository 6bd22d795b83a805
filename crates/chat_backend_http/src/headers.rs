use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::HttpBackendConfig;
use crate::error::HttpBackendError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for chat backend requests.
pub fn build_headers(config: &HttpBackendConfig) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    if let Some(token) = config
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    }
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    let user_agent = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers
}

/// Converts [`build_headers`] output into a typed `HeaderMap`.
pub fn header_map(config: &HttpBackendConfig) -> Result<HeaderMap, HttpBackendError> {
    let mut out = HeaderMap::new();
    for (key, value) in build_headers(config) {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| HttpBackendError::InvalidHeader(format!("invalid header key: {key}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| HttpBackendError::InvalidHeader(format!("invalid header value for {key}")))?;
        out.insert(name, value);
    }
    Ok(out)
}

fn default_user_agent() -> String {
    format!(
        "chat_stream/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
