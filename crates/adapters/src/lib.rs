mod base_url;
mod error;
mod groq;

pub use base_url::{normalize_base_url, DEFAULT_BASE_URL};
pub use error::AdapterError;
pub use groq::{GroqClient, SseStream};

pub use storyforge_core::{ChatClient, ChatClientError, ChatReply, ChatRequest, StreamChunk};
