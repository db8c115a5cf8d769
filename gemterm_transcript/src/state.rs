use std::fmt;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    decoder::Utf8StreamDecoder,
    message::{Message, Transcript},
};

/// Shown as a new assistant message whenever a response stream fails.
pub const CONNECTION_FAILED_MESSAGE: &str =
    "Error: Connection failed. Please check your API server and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    InputChanged(String),
    Submit,
    Fragment { request: RequestId, bytes: Bytes },
    StreamClosed { request: RequestId },
    StreamFailed { request: RequestId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a response stream for `prompt`, reporting back with `request`.
    SendPrompt { request: RequestId, prompt: String },
    ScrollToBottom,
}

#[derive(Debug)]
struct StreamSession {
    request: RequestId,
    placeholder: usize,
    decoder: Utf8StreamDecoder,
    accumulated: String,
}

impl StreamSession {
    fn new(request: RequestId, placeholder: usize) -> Self {
        Self {
            request,
            placeholder,
            decoder: Utf8StreamDecoder::new(),
            accumulated: String::new(),
        }
    }
}

/// Everything the chat view shows, advanced only through [`ChatState::update`].
///
/// At most one response stream is open at a time; its assistant message is
/// the placeholder appended on submit, and its content only ever grows.
#[derive(Debug, Default)]
pub struct ChatState {
    transcript: Transcript,
    input: String,
    loading: bool,
    session: Option<StreamSession>,
    next_request: u64,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn open_request(&self) -> Option<RequestId> {
        self.session.as_ref().map(|session| session.request)
    }

    pub fn update(&mut self, event: ChatEvent) -> Vec<Effect> {
        match event {
            ChatEvent::InputChanged(text) => {
                self.input = text;
                vec![]
            }
            ChatEvent::Submit => self.submit(),
            ChatEvent::Fragment { request, bytes } => self.receive(request, &bytes),
            ChatEvent::StreamClosed { request } => self.close(request),
            ChatEvent::StreamFailed { request, reason } => self.fail(request, &reason),
        }
    }

    fn submit(&mut self) -> Vec<Effect> {
        if self.input.trim().is_empty() {
            return vec![];
        }
        if let Some(open) = self.open_request() {
            debug!("Ignoring submit while response {open} is still streaming");
            return vec![];
        }

        let prompt = std::mem::take(&mut self.input);
        let request = RequestId(self.next_request);
        self.next_request += 1;

        self.transcript.push(Message::user(prompt.as_str()));
        let placeholder = self.transcript.push(Message::assistant(""));
        self.session = Some(StreamSession::new(request, placeholder));
        self.loading = true;

        vec![
            Effect::ScrollToBottom,
            Effect::ScrollToBottom,
            Effect::SendPrompt { request, prompt },
        ]
    }

    fn receive(&mut self, request: RequestId, bytes: &[u8]) -> Vec<Effect> {
        let session = match self.session.as_mut() {
            Some(session) if session.request == request => session,
            _ => {
                debug!("Dropping fragment for stale response {request}");
                return vec![];
            }
        };
        let text = session.decoder.decode(bytes);
        session.accumulated.push_str(&text);

        scroll_if(
            self.transcript
                .set_content(session.placeholder, &session.accumulated),
        )
    }

    fn close(&mut self, request: RequestId) -> Vec<Effect> {
        let Some(mut session) = self.take_session(request) else {
            return vec![];
        };
        self.loading = false;

        let tail = session.decoder.finish();
        if tail.is_empty() {
            return vec![];
        }
        session.accumulated.push_str(&tail);
        scroll_if(
            self.transcript
                .set_content(session.placeholder, &session.accumulated),
        )
    }

    fn fail(&mut self, request: RequestId, reason: &str) -> Vec<Effect> {
        if self.take_session(request).is_none() {
            return vec![];
        }
        warn!("Response {request} failed: {reason}");
        self.loading = false;

        self.transcript.push(Message::assistant(CONNECTION_FAILED_MESSAGE));
        vec![Effect::ScrollToBottom]
    }

    fn take_session(&mut self, request: RequestId) -> Option<StreamSession> {
        if self.open_request() != Some(request) {
            debug!("Dropping end of stale response {request}");
            return None;
        }
        self.session.take()
    }
}

fn scroll_if(transcript_changed: bool) -> Vec<Effect> {
    if transcript_changed {
        vec![Effect::ScrollToBottom]
    } else {
        vec![]
    }
}
