use std::io::{BufRead, BufReader, Lines, Read};
use std::time::Duration;

use log::warn;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use serde::Deserialize;

use storyforge_core::{
    ChatClient, ChatClientError, ChatReply, ChatRequest, ChunkIter, StreamChunk, UsageEnvelope,
};

use crate::base_url::normalize_base_url;
use crate::error::AdapterError;

/// Blocking client for Groq's OpenAI-compatible chat completion API.
/// Non-streaming calls return the full reply; streaming calls yield raw
/// transport chunks that the core demultiplexes into chapter events.
pub struct GroqClient {
    client: Client,
    url: String,
    api_key: String,
}

impl GroqClient {
    /// Fails with [`AdapterError::MissingApiKey`] when no key is given,
    /// so a misconfigured run stops before any request is issued.
    pub fn new(api_key: &str, base_url: &str, timeout: u64) -> Result<Self, AdapterError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AdapterError::MissingApiKey);
        }

        let base = normalize_base_url(base_url);
        reqwest::Url::parse(&base).map_err(|source| {
            AdapterError::InvalidConfig(format!("invalid base URL `{base}`: {source}"))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn post(&self, request: &ChatRequest) -> Result<reqwest::blocking::Response, AdapterError> {
        let response = self
            .client
            .post(&self.url)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .bearer_auth(&self.api_key)
            .json(request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        Ok(response)
    }

    fn complete_inner(&self, request: &ChatRequest) -> Result<ChatReply, AdapterError> {
        let body = self.post(request)?.text()?;
        parse_completion(&body)
    }

    fn stream_inner(
        &self,
        request: &ChatRequest,
    ) -> Result<SseStream<reqwest::blocking::Response>, AdapterError> {
        let response = self.post(request)?;
        Ok(SseStream::new(response))
    }
}

impl ChatClient for GroqClient {
    fn complete(&self, request: &ChatRequest) -> Result<ChatReply, ChatClientError> {
        self.complete_inner(request).map_err(ChatClientError::new)
    }

    fn stream(&self, request: &ChatRequest) -> Result<ChunkIter, ChatClientError> {
        let stream = self.stream_inner(request).map_err(ChatClientError::new)?;
        Ok(Box::new(stream.map(|item| item.map_err(ChatClientError::new))))
    }
}

/// Server-sent-events reader over a chat completion response body.
/// Yields one [`StreamChunk`] per decodable `data:` event and stops at
/// the `[DONE]` terminator. Undecodable events are logged and skipped
/// rather than aborting the stream.
pub struct SseStream<R: Read> {
    lines: Lines<BufReader<R>>,
    done: bool,
}

impl<R: Read> SseStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for SseStream<R> {
    type Item = Result<StreamChunk, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    self.done = true;
                    return Some(Err(AdapterError::Stream(source.to_string())));
                }
            };

            let Some(data) = data_payload(&line) else {
                continue;
            };
            if data == "[DONE]" {
                self.done = true;
                return None;
            }

            match decode_chunk(data) {
                Ok(chunk) => return Some(Ok(chunk)),
                Err(source) => {
                    warn!("skipping undecodable stream event: {source}");
                }
            }
        }
    }
}

/// Extracts the payload of a `data:` SSE line. Blank lines, comments and
/// other event fields return `None`.
fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn decode_chunk(data: &str) -> Result<StreamChunk, serde_json::Error> {
    let envelope: StreamEnvelope = serde_json::from_str(data)?;
    let delta = envelope
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content);
    let usage = envelope
        .x_groq
        .and_then(|side| side.usage)
        .or(envelope.usage);
    Ok(StreamChunk { delta, usage })
}

fn parse_completion(body: &str) -> Result<ChatReply, AdapterError> {
    let reply: CompletionReply = serde_json::from_str(body)?;
    let usage = reply.usage;
    let content = reply
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|message| message.content))
        .find(|content| !content.trim().is_empty())
        .ok_or(AdapterError::EmptyResponse)?;
    Ok(ChatReply { content, usage })
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageEnvelope>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    x_groq: Option<GroqSideChannel>,
    #[serde(default)]
    usage: Option<UsageEnvelope>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<DeltaBody>,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqSideChannel {
    #[serde(default)]
    usage: Option<UsageEnvelope>,
}
