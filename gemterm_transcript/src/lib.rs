pub mod client;
pub mod decoder;
pub mod message;
pub mod state;

pub use client::{ChatClient, ClientError, DEFAULT_ENDPOINT};
pub use message::{Message, Role, Transcript};
pub use state::{ChatEvent, ChatState, Effect, RequestId, CONNECTION_FAILED_MESSAGE};
