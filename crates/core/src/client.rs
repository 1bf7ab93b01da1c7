use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

use crate::stats::GenerationStatistics;

/// Opaque transport failure reported by a [`ChatClient`] implementation.
/// The core never inspects the concrete error type; it only propagates
/// and displays it.
pub struct ChatClientError(Box<dyn StdError + Send + Sync>);

impl ChatClientError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Box::new(error))
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.0
    }
}

impl fmt::Display for ChatClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ChatClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl StdError for ChatClientError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters shared by both generation stages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 8000,
            top_p: 1.0,
        }
    }
}

/// One chat-completion request in the OpenAI-compatible shape.
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        let sampling = SamplingSettings::default();
        Self {
            model: model.into(),
            messages,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            top_p: sampling.top_p,
            stream: false,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingSettings) -> Self {
        self.temperature = sampling.temperature;
        self.max_tokens = sampling.max_tokens;
        self.top_p = sampling.top_p;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Raw usage block as transports report it. All fields default to zero
/// so a partially populated block still deserializes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UsageEnvelope {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_time: f64,
    #[serde(default)]
    pub completion_time: f64,
    #[serde(default)]
    pub total_time: f64,
}

impl UsageEnvelope {
    pub fn into_statistics(self, model_name: impl Into<String>) -> GenerationStatistics {
        GenerationStatistics {
            input_time: self.prompt_time,
            output_time: self.completion_time,
            total_time: self.total_time,
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            model_name: model_name.into(),
        }
    }
}

/// Full reply to a non-streaming request.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<UsageEnvelope>,
}

/// One transport chunk of a streaming reply. Either field may be absent;
/// a chunk carrying neither is a keep-alive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub usage: Option<UsageEnvelope>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            usage: None,
        }
    }

    pub fn usage(usage: UsageEnvelope) -> Self {
        Self {
            delta: None,
            usage: Some(usage),
        }
    }
}

pub type ChunkIter = Box<dyn Iterator<Item = Result<StreamChunk, ChatClientError>> + Send>;

/// Transport seam between the generation services and a concrete model
/// provider. Implementations live outside the core crate.
pub trait ChatClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<ChatReply, ChatClientError>;

    fn stream(&self, request: &ChatRequest) -> Result<ChunkIter, ChatClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_match_generation_settings() {
        let request = ChatRequest::new("llama3-8b-8192", vec![ChatMessage::user("hello")]);
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, 8000);
        assert_eq!(request.top_p, 1.0);
        assert!(!request.stream);
        assert!(request.streaming().stream);
    }

    #[test]
    fn sampling_overrides_request_defaults() {
        let sampling = SamplingSettings {
            temperature: 0.2,
            max_tokens: 512,
            top_p: 0.9,
        };
        let request = ChatRequest::new("llama3-8b-8192", vec![]).with_sampling(sampling);
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.top_p, 0.9);
    }

    #[test]
    fn request_serializes_in_wire_shape() {
        let request = ChatRequest::new(
            "llama3-8b-8192",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "llama3-8b-8192");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn envelope_converts_into_statistics() {
        let envelope = UsageEnvelope {
            prompt_tokens: 12,
            completion_tokens: 34,
            prompt_time: 0.1,
            completion_time: 0.4,
            total_time: 0.5,
        };
        let stats = envelope.into_statistics("llama3-8b-8192");
        assert_eq!(stats.input_tokens, 12);
        assert_eq!(stats.output_tokens, 34);
        assert_eq!(stats.total_time, 0.5);
        assert_eq!(stats.model_name, "llama3-8b-8192");
    }

    #[test]
    fn client_error_displays_the_inner_error() {
        let error = ChatClientError::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert_eq!(error.to_string(), "connection reset");
        assert!(error.as_inner().is::<std::io::Error>());
    }
}
