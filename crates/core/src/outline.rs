use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::client::{ChatClient, ChatClientError, ChatMessage, ChatRequest, SamplingSettings};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{PromptError, PromptRegistry};
use crate::stats::GenerationStatistics;

/// Chaptered structural plan produced by the first generation stage:
/// a title plus an ordered map of chapter number to summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryOutline {
    title: String,
    chapters: BTreeMap<u32, String>,
}

impl StoryOutline {
    pub fn new(title: impl Into<String>, chapters: BTreeMap<u32, String>) -> Self {
        Self {
            title: title.into(),
            chapters,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Chapters in ascending number order.
    pub fn chapters(&self) -> impl Iterator<Item = (u32, &str)> {
        self.chapters
            .iter()
            .map(|(number, summary)| (*number, summary.as_str()))
    }

    pub fn chapter_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.chapters.keys().copied()
    }

    pub fn summary(&self, number: u32) -> Option<&str> {
        self.chapters.get(&number).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutlineRequest {
    pub title: String,
    pub genre: String,
    pub theme: String,
    pub num_chapters: u32,
}

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("failed to render outline prompt: {source}")]
    Prompt {
        #[source]
        source: PromptError,
    },
    #[error("outline request failed: {source}")]
    Client {
        #[source]
        source: ChatClientError,
    },
    #[error("outline reply is not valid JSON: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("outline reply has unexpected shape: {reason}")]
    Shape { reason: String },
}

/// Issues the single non-streaming outline request and parses the reply
/// into a [`StoryOutline`]. Failures are propagated to the caller; no
/// retry is attempted.
pub struct OutlineService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    model: String,
    sampling: SamplingSettings,
}

impl<'a> OutlineService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink, model: impl Into<String>) -> Self {
        Self {
            prompts,
            sink,
            model: model.into(),
            sampling: SamplingSettings::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingSettings) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generate<C: ChatClient>(
        &self,
        client: &C,
        request: &OutlineRequest,
    ) -> Result<(GenerationStatistics, StoryOutline), OutlineError> {
        let system = self
            .prompts
            .format_with(
                "story_outline_system",
                [("num_chapters", request.num_chapters.to_string())],
            )
            .map_err(|source| OutlineError::Prompt { source })?;
        let user = self
            .prompts
            .format_with(
                "story_outline_user",
                [
                    ("title", request.title.trim().to_string()),
                    ("genre", request.genre.trim().to_string()),
                    ("theme", request.theme.trim().to_string()),
                    ("num_chapters", request.num_chapters.to_string()),
                ],
            )
            .map_err(|source| OutlineError::Prompt { source })?;

        self.log(
            LogLevel::Info,
            format!(
                "Requesting a {} chapter outline for \"{}\" from {}.",
                request.num_chapters,
                request.title.trim(),
                self.model
            ),
        );

        let chat_request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .with_sampling(self.sampling);
        let reply = client
            .complete(&chat_request)
            .map_err(|source| OutlineError::Client { source })?;

        let outline = parse_outline(&reply.content, &request.title)?;
        let statistics = reply
            .usage
            .unwrap_or_default()
            .into_statistics(self.model.clone());

        self.log(
            LogLevel::Info,
            format!("Outline parsed: {} chapters.", outline.len()),
        );

        Ok((statistics, outline))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// Parses the model's JSON reply into an outline. The caller-supplied
/// title always replaces whatever the model put under `"title"`.
pub fn parse_outline(body: &str, title: &str) -> Result<StoryOutline, OutlineError> {
    let cleaned = strip_code_fences(body);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|source| OutlineError::Parse { source })?;

    let Value::Object(map) = value else {
        return Err(OutlineError::Shape {
            reason: "reply is not a JSON object".to_string(),
        });
    };

    let mut chapters = BTreeMap::new();
    for (key, value) in map {
        if key.eq_ignore_ascii_case("title") {
            // The user-supplied title is authoritative.
            continue;
        }

        let number: u32 = key.trim().parse().map_err(|_| OutlineError::Shape {
            reason: format!("key `{key}` is neither \"title\" nor a chapter number"),
        })?;
        let summary = match value {
            Value::String(text) => text,
            other => {
                return Err(OutlineError::Shape {
                    reason: format!("summary for chapter {number} is not a string: {other}"),
                })
            }
        };
        chapters.insert(number, summary);
    }

    Ok(StoryOutline::new(title.trim(), chapters))
}

fn strip_code_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag after the opening fence.
    let rest = match rest.find('\n') {
        Some(index) => &rest[index + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
