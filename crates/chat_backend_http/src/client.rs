use std::future::Future;

use async_trait::async_trait;
use chat_backend::{
    ActiveSession, BackendError, BackendProfile, CancellationToken, ChatBackend, ProgressSink,
    ResumeStreamRequest, StartStreamRequest, StreamProgress,
};
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::config::HttpBackendConfig;
use crate::error::{parse_error_message, HttpBackendError};
use crate::events::BackendFrame;
use crate::headers::header_map;
use crate::payload::{MessageBody, ResumeBody};
use crate::retry::{is_retryable_http_error, retry_delay, MAX_RETRIES};
use crate::sse::SseStreamParser;
use crate::url::{normalize_base_url, Endpoints};

pub const HTTP_BACKEND_ID: &str = "http";

/// [`ChatBackend`] that talks to a chat server over HTTP and server-sent events.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    config: HttpBackendConfig,
    endpoints: Endpoints,
    headers: HeaderMap,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, HttpBackendError> {
        let endpoints = Endpoints::new(normalize_base_url(&config.base_url)?);
        let headers = header_map(&config)?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(HttpBackendError::from)?;
        Ok(Self {
            http,
            config,
            endpoints,
            headers,
        })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn send_with_retry<F>(
        &self,
        build: F,
        cancel: &CancellationToken,
    ) -> Result<Response, HttpBackendError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if cancel.is_cancelled() {
                return Err(HttpBackendError::Cancelled);
            }

            let response = await_or_cancel(build().send(), cancel).await?;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancel)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        tracing::debug!(attempt, status = status.as_u16(), "retrying chat request");
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancel).await?;
                        continue;
                    }

                    return Err(HttpBackendError::Status(status, message));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES {
                        tracing::debug!(attempt, error = %error, "retrying chat request after transport error");
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancel).await?;
                        continue;
                    }
                    break;
                }
            }
        }

        Err(HttpBackendError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Forwards progress frames until a terminal frame arrives.
    ///
    /// Resolves with the session id carried by the `done` frame, if any.
    async fn stream_frames(
        &self,
        response: Response,
        cancel: &CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<Option<String>, HttpBackendError> {
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();

        while let Some(chunk) = await_or_cancel(bytes.next(), cancel).await? {
            let chunk = chunk.map_err(HttpBackendError::from)?;
            for frame in parser.feed(&chunk) {
                if let Some(done) = apply_frame(frame, &mut *on_progress)? {
                    return Ok(done);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(HttpBackendError::Cancelled);
        }
        Err(HttpBackendError::UnexpectedEnd)
    }

    async fn start(
        &self,
        request: StartStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<String, HttpBackendError> {
        let url = self.endpoints.messages(&request.conversation_id);
        let body = MessageBody::from(&request);
        tracing::debug!(conversation_id = %request.conversation_id, %url, "posting chat message");

        let response = self
            .send_with_retry(
                || {
                    self.http
                        .post(url.clone())
                        .headers(self.headers.clone())
                        .json(&body)
                },
                &cancel,
            )
            .await?;

        let reported = self.stream_frames(response, &cancel, on_progress).await?;
        reported
            .or(body.session_id)
            .ok_or(HttpBackendError::MissingSessionId)
    }

    async fn resume(
        &self,
        request: ResumeStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<(), HttpBackendError> {
        let url = self
            .endpoints
            .resume(&request.conversation_id, &request.session_id);
        let body = ResumeBody {
            cursor: request.cursor.clone(),
        };
        tracing::debug!(
            conversation_id = %request.conversation_id,
            session_id = %request.session_id,
            cursor = %request.cursor,
            "resuming chat session"
        );

        let response = self
            .send_with_retry(
                || {
                    self.http
                        .post(url.clone())
                        .headers(self.headers.clone())
                        .json(&body)
                },
                &cancel,
            )
            .await?;

        self.stream_frames(response, &cancel, on_progress).await?;
        Ok(())
    }

    async fn post_stop(&self, conversation_id: &str) -> Result<(), HttpBackendError> {
        let response = self
            .http
            .post(self.endpoints.stop(conversation_id))
            .headers(self.headers.clone())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(HttpBackendError::Status(
            status,
            parse_error_message(status, &body),
        ))
    }

    async fn fetch_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ActiveSession>, HttpBackendError> {
        let url = self.endpoints.session(conversation_id);
        let cancel = CancellationToken::new();
        let response = match self
            .send_with_retry(
                || self.http.get(url.clone()).headers(self.headers.clone()),
                &cancel,
            )
            .await
        {
            Ok(response) => response,
            Err(HttpBackendError::Status(StatusCode::NOT_FOUND, _)) => return Ok(None),
            Err(error) => return Err(error),
        };

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile {
            backend_id: HTTP_BACKEND_ID.to_string(),
            endpoint: Some(self.endpoints.root().to_string()),
        }
    }

    async fn start_stream(
        &self,
        request: StartStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<String, BackendError> {
        Ok(self.start(request, cancel, on_progress).await?)
    }

    async fn resume_stream(
        &self,
        request: ResumeStreamRequest,
        cancel: CancellationToken,
        on_progress: ProgressSink<'_>,
    ) -> Result<(), BackendError> {
        Ok(self.resume(request, cancel, on_progress).await?)
    }

    async fn stop(&self, conversation_id: &str) -> Result<(), BackendError> {
        Ok(self.post_stop(conversation_id).await?)
    }

    async fn detect_active_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ActiveSession>, BackendError> {
        Ok(self.fetch_session(conversation_id).await?)
    }
}

/// Applies one frame; `Some` carries the `done` frame's session id.
fn apply_frame(
    frame: BackendFrame,
    on_progress: &mut (dyn FnMut(StreamProgress) + Send),
) -> Result<Option<Option<String>>, HttpBackendError> {
    match frame {
        BackendFrame::Progress(progress) => {
            on_progress(progress);
            Ok(None)
        }
        BackendFrame::Done { session_id } => Ok(Some(
            session_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        )),
        BackendFrame::Error { message, code } => Err(HttpBackendError::StreamFailed {
            message: message
                .or_else(|| code.clone())
                .unwrap_or_else(|| "backend reported an error".to_owned()),
            code,
        }),
    }
}

async fn await_or_cancel<F>(
    future: F,
    cancel: &CancellationToken,
) -> Result<F::Output, HttpBackendError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HttpBackendError::Cancelled),
        output = future => Ok(output),
    }
}
