use std::borrow::Cow;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

pub use crate::gemini::GeminiProvider;

/// Lazy, finite sequence of text fragments produced by a provider.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("provider stream interrupted: {0}")]
    Stream(#[from] std::io::Error),
    #[error("provider sent a malformed chunk: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("provider reported an error: {0}")]
    Api(String),
    #[error("response was blocked by the provider: {0}")]
    Blocked(String),
}

/// The prompt exactly as the client sent it. No validation is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt(Value);

impl Prompt {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Text handed to the provider: strings verbatim, null as empty, anything
    /// else as its JSON text.
    pub fn as_text(&self) -> Cow<'_, str> {
        match &self.0 {
            Value::String(text) => Cow::Borrowed(text),
            Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self(Value::String(text.to_owned()))
    }
}

#[async_trait]
pub trait TextStreamProvider: Send + Sync {
    /// Starts a generation call. Resolves once the provider has accepted the
    /// request; fragments are pulled lazily from the returned stream.
    async fn open_stream(&self, model: &str, prompt: Prompt)
        -> Result<FragmentStream, ProviderError>;
}
