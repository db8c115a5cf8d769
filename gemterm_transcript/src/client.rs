use futures::StreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::state::{ChatEvent, RequestId};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/api/chat";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("relay responded with status {0}")]
    Status(StatusCode),
    #[error("relay response has no body")]
    MissingBody,
}

#[derive(Serialize)]
struct PromptBody<'a> {
    prompt: &'a str,
}

/// Streams relay responses into [`ChatEvent`]s.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_http_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs [`ChatClient::stream_prompt`] on a new task. The terminal event is
    /// still sent if the task is aborted before it first runs.
    pub fn spawn_prompt(
        &self,
        request: RequestId,
        prompt: String,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        let release = ReleaseGuard::new(request, events.clone());
        tokio::spawn(async move { client.relay(release, &prompt, &events).await })
    }

    /// Posts `prompt` and forwards each body chunk as a `Fragment` event.
    ///
    /// Exactly one terminal event (`StreamClosed` or `StreamFailed`) is sent
    /// for `request`, including when this future is dropped before finishing.
    pub async fn stream_prompt(
        &self,
        request: RequestId,
        prompt: &str,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) {
        let release = ReleaseGuard::new(request, events.clone());
        self.relay(release, prompt, &events).await
    }

    async fn relay(
        &self,
        release: ReleaseGuard,
        prompt: &str,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) {
        let request = release.request;
        match self.forward(request, prompt, events).await {
            Ok(received) => {
                info!("Response {request} complete: {received} bytes");
                release.close();
            }
            Err(e) => {
                warn!("Response {request} failed: {e}");
                release.fail(e.to_string());
            }
        }
    }

    async fn forward(
        &self,
        request: RequestId,
        prompt: &str,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<usize, ClientError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&PromptBody { prompt })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(ClientError::MissingBody);
        }

        let mut body = response.bytes_stream();
        let mut received = 0;
        while let Some(chunk) = body.next().await {
            let bytes = chunk?;
            received += bytes.len();
            if events.send(ChatEvent::Fragment { request, bytes }).is_err() {
                debug!("Event receiver dropped; abandoning response {request}");
                break;
            }
        }
        Ok(received)
    }
}

/// Guarantees the controller hears about the end of a stream, so its loading
/// flag is always cleared.
struct ReleaseGuard {
    request: RequestId,
    events: mpsc::UnboundedSender<ChatEvent>,
    released: bool,
}

impl ReleaseGuard {
    fn new(request: RequestId, events: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self {
            request,
            events,
            released: false,
        }
    }

    fn close(mut self) {
        let request = self.request;
        self.release(ChatEvent::StreamClosed { request });
    }

    fn fail(mut self, reason: String) {
        let request = self.request;
        self.release(ChatEvent::StreamFailed { request, reason });
    }

    fn release(&mut self, event: ChatEvent) {
        self.released = true;
        // Receiver may be gone already at shutdown.
        let _ = self.events.send(event);
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.released {
            let request = self.request;
            self.release(ChatEvent::StreamFailed {
                request,
                reason: "stream task ended before completion".to_owned(),
            });
        }
    }
}
