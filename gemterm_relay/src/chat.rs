use std::sync::Arc;

use axum::{
    body::{Bytes, StreamBody},
    extract::State,
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{
    stream::{self, Stream},
    StreamExt,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    provider::{FragmentStream, Prompt, ProviderError, TextStreamProvider},
    AppState,
};

pub const STREAM_FAILED_MESSAGE: &str = "Failed to stream response";
pub const INVALID_BODY_MESSAGE: &str = "Invalid JSON body";

const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Body of `POST /api/chat`. Only the `prompt` field is read.
#[derive(Debug, Default, PartialEq)]
pub struct ChatRequest {
    pub prompt: Prompt,
}

impl ChatRequest {
    /// A body not declared as JSON is ignored, so its prompt counts as
    /// missing. A JSON body must parse.
    pub fn from_request(headers: &HeaderMap, body: &[u8]) -> Result<Self, serde_json::Error> {
        if !is_json_content(headers) {
            return Ok(Self::default());
        }
        Self::from_body(body)
    }

    /// An empty body counts as a missing prompt; anything else must be JSON.
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body)?;
        let prompt = value.get("prompt").cloned().unwrap_or(Value::Null);
        Ok(Self {
            prompt: Prompt::new(prompt),
        })
    }
}

/// `application/json` or any `+json` media type.
fn is_json_content(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match ChatRequest::from_request(&headers, &body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected chat request with unparseable body: {e}");
            return error_response(StatusCode::BAD_REQUEST, INVALID_BODY_MESSAGE);
        }
    };

    info!("Relaying prompt to provider: model = {}", state.config.model);
    match RelayStream::open(&*state.provider, &state.config.model, request.prompt).await {
        Ok(relay) => stream_response(relay),
        Err(e) => {
            error!("Error starting response stream from provider: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, STREAM_FAILED_MESSAGE)
        }
    }
}

fn stream_response(relay: RelayStream) -> Response {
    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        (header::TRANSFER_ENCODING, "chunked"),
        (header::CACHE_CONTROL, "no-cache"),
        (HeaderName::from_static(X_ACCEL_BUFFERING), "no"),
    ];
    (StatusCode::OK, headers, StreamBody::new(relay.into_body())).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// A provider stream that has produced its first text, or finished without
/// producing any. Until then nothing has been committed to the client, so a
/// failure can still become a proper error response.
pub struct RelayStream {
    first: Option<String>,
    rest: FragmentStream,
}

enum RelayState {
    Streaming {
        pending: Option<String>,
        fragments: FragmentStream,
        written: usize,
    },
    Done,
}

impl RelayStream {
    pub async fn open(
        provider: &dyn TextStreamProvider,
        model: &str,
        prompt: Prompt,
    ) -> Result<Self, ProviderError> {
        let mut fragments = provider.open_stream(model, prompt).await?;

        while let Some(fragment) = fragments.next().await {
            let text = fragment?;
            if !text.is_empty() {
                return Ok(Self {
                    first: Some(text),
                    rest: fragments,
                });
            }
        }

        Ok(Self {
            first: None,
            rest: stream::empty().boxed(),
        })
    }

    /// Each non-empty fragment becomes exactly one body chunk, written as soon
    /// as it is pulled. A provider error ends the body with that error, which
    /// makes hyper abort the connection.
    pub fn into_body(self) -> impl Stream<Item = Result<Bytes, ProviderError>> + Send {
        let state = RelayState::Streaming {
            pending: self.first,
            fragments: self.rest,
            written: 0,
        };

        stream::unfold(state, |state| async move {
            let RelayState::Streaming {
                pending,
                mut fragments,
                written,
            } = state
            else {
                return None;
            };

            if let Some(text) = pending {
                let written = written + text.len();
                let state = RelayState::Streaming {
                    pending: None,
                    fragments,
                    written,
                };
                return Some((Ok(Bytes::from(text)), state));
            }

            loop {
                match fragments.next().await {
                    Some(Ok(text)) if text.is_empty() => continue,
                    Some(Ok(text)) => {
                        let state = RelayState::Streaming {
                            pending: None,
                            written: written + text.len(),
                            fragments,
                        };
                        return Some((Ok(Bytes::from(text)), state));
                    }
                    Some(Err(e)) => {
                        error!("Provider stream failed after {written} bytes were sent: {e}");
                        return Some((Err(e), RelayState::Done));
                    }
                    None => {
                        info!("Completed streaming response: {written} bytes");
                        return None;
                    }
                }
            }
        })
    }
}
