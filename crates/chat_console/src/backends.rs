use std::sync::Arc;
use std::time::Duration;

use chat_backend::{BackendInitError, ChatBackend};
use chat_backend_http::{HttpBackend, HttpBackendConfig, HTTP_BACKEND_ID};
use chat_backend_mock::{MockBackend, MOCK_BACKEND_ID};

pub const DEFAULT_BACKEND_ID: &str = MOCK_BACKEND_ID;
pub const BACKEND_ENV_VAR: &str = "CHAT_STREAM_BACKEND";
pub const BASE_URL_ENV_VAR: &str = "CHAT_STREAM_BASE_URL";
pub const TOKEN_ENV_VAR: &str = "CHAT_STREAM_TOKEN";
pub const TIMEOUT_ENV_VAR: &str = "CHAT_STREAM_TIMEOUT_SEC";

pub fn backend_from_env() -> Result<Arc<dyn ChatBackend>, BackendInitError> {
    let backend_id = env_value(BACKEND_ENV_VAR);
    backend_for_id(backend_id.as_deref().unwrap_or(DEFAULT_BACKEND_ID))
}

pub fn backend_for_id(backend_id: &str) -> Result<Arc<dyn ChatBackend>, BackendInitError> {
    match backend_id {
        MOCK_BACKEND_ID => Ok(Arc::new(MockBackend::default())),
        HTTP_BACKEND_ID => {
            let backend = HttpBackend::new(http_config_from_env()?)
                .map_err(|error| BackendInitError::new(error.to_string()))?;
            Ok(Arc::new(backend))
        }
        unknown => Err(BackendInitError::new(format!(
            "Unsupported backend '{unknown}'. Available backends: {MOCK_BACKEND_ID}, {HTTP_BACKEND_ID}"
        ))),
    }
}

/// Builds the HTTP transport config from `CHAT_STREAM_*` variables.
pub fn http_config_from_env() -> Result<HttpBackendConfig, BackendInitError> {
    let mut config = HttpBackendConfig::new(env_value(BASE_URL_ENV_VAR).unwrap_or_default());
    if let Some(token) = env_value(TOKEN_ENV_VAR) {
        config = config.with_access_token(token);
    }
    if let Some(raw) = env_value(TIMEOUT_ENV_VAR) {
        let seconds = raw
            .parse::<u64>()
            .ok()
            .filter(|seconds| *seconds > 0)
            .ok_or_else(|| {
                BackendInitError::new(format!(
                    "{TIMEOUT_ENV_VAR} must be a positive number of seconds, got '{raw}'"
                ))
            })?;
        config = config.with_timeout(Duration::from_secs(seconds));
    }
    Ok(config)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
