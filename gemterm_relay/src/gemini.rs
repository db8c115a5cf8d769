//! Streaming client for the Gemini `streamGenerateContent` API.

use async_trait::async_trait;
use futures::{
    stream::{self, StreamExt},
    TryStreamExt,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::provider::{FragmentStream, Prompt, ProviderError, TextStreamProvider};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Finish reasons for which the provider withholds the candidate's text.
const BLOCKING_FINISH_REASONS: [&str; 3] = ["SAFETY", "RECITATION", "LANGUAGE"];

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        )
    }
}

#[async_trait]
impl TextStreamProvider for GeminiProvider {
    async fn open_stream(
        &self,
        model: &str,
        prompt: Prompt,
    ) -> Result<FragmentStream, ProviderError> {
        let body = GenerateContentRequest::user_text(&prompt.as_text());
        info!("Requesting content stream from provider: model = {model}");

        let response = self
            .http
            .post(self.stream_url(model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = ApiErrorEnvelope::message_from(&body)
                .or_else(|| status.canonical_reason().map(str::to_owned))
                .unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let stream = response
            .bytes_stream()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
        let reader = BufReader::new(tokio_util::io::StreamReader::new(stream));

        let fragments = stream::unfold(Some(reader.lines()), |lines| async move {
            let Some(mut lines) = lines else {
                return None;
            };
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_sse_line(&line) {
                        Some(Err(err)) => return Some((Err(err), None)),
                        Some(Ok(text)) => return Some((Ok(text), Some(lines))),
                        None => continue,
                    },
                    Ok(None) => {
                        debug!("Provider stream exhausted");
                        return None;
                    }
                    Err(err) => return Some((Err(ProviderError::from(err)), None)),
                }
            }
        });

        Ok(fragments.boxed())
    }
}

/// Interprets one line of the SSE body. Only `data:` lines carry chunks.
pub fn parse_sse_line(line: &str) -> Option<Result<String, ProviderError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    let chunk = match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(chunk) => chunk,
        Err(err) => return Some(Err(err.into())),
    };
    Some(chunk.into_text())
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

impl GenerateContentRequest {
    fn user_text(text: &str) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_owned()),
                parts: vec![Part {
                    text: Some(text.to_owned()),
                }],
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Api(error.message));
        }
        if let Some(reason) = self.prompt_feedback.and_then(|x| x.block_reason) {
            return Err(ProviderError::Blocked(reason));
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(String::new());
        };
        match candidate.finish_reason {
            Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
                Err(ProviderError::Blocked(reason))
            }
            _ => Ok(candidate
                .content
                .unwrap_or_default()
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

impl ApiErrorEnvelope {
    fn message_from(body: &str) -> Option<String> {
        serde_json::from_str::<Self>(body)
            .ok()
            .map(|envelope| envelope.error.message)
            .filter(|message| !message.is_empty())
    }
}
