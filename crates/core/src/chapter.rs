use thiserror::Error;

use crate::client::{
    ChatClient, ChatClientError, ChatMessage, ChatRequest, ChunkIter, SamplingSettings,
    StreamChunk, UsageEnvelope,
};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{PromptError, PromptRegistry};
use crate::stats::GenerationStatistics;
use crate::story::{Character, WritingStyle};

#[derive(Clone, Debug)]
pub struct ChapterRequest<'a> {
    pub chapter_title: String,
    pub chapter_summary: String,
    pub characters: &'a [Character],
    pub setting: &'a str,
    pub style: WritingStyle,
}

/// One element of a chapter stream: either a prose fragment or the
/// side-channel usage record that arrives once, at or near the end.
#[derive(Clone, Debug, PartialEq)]
pub enum ChapterEvent {
    Text(String),
    Usage(GenerationStatistics),
}

#[derive(Debug, Error)]
pub enum ChapterError {
    #[error("failed to render chapter prompt: {source}")]
    Prompt {
        #[source]
        source: PromptError,
    },
    #[error("chapter request failed: {source}")]
    Client {
        #[source]
        source: ChatClientError,
    },
}

/// Builds one streaming request per chapter and demultiplexes the reply
/// into [`ChapterEvent`]s. No content is buffered here; accumulation is
/// the [`crate::story::Story`]'s job.
pub struct ChapterService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    model: String,
    sampling: SamplingSettings,
}

impl<'a> ChapterService<'a> {
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
        request: &ChapterRequest<'_>,
    ) -> Result<ChapterStream, ChapterError> {
        let character_names = request
            .characters
            .iter()
            .map(Character::name)
            .collect::<Vec<_>>()
            .join(", ");

        let system = self
            .prompts
            .format_with(
                "chapter_prose_system",
                [("style", request.style.label().to_string())],
            )
            .map_err(|source| ChapterError::Prompt { source })?;
        let user = self
            .prompts
            .format_with(
                "chapter_prose_user",
                [
                    ("chapter_title", request.chapter_title.trim().to_string()),
                    ("chapter_summary", request.chapter_summary.trim().to_string()),
                    ("characters", character_names),
                    ("setting", request.setting.trim().to_string()),
                ],
            )
            .map_err(|source| ChapterError::Prompt { source })?;

        self.log(
            LogLevel::Info,
            format!(
                "Streaming chapter \"{}\" from {}.",
                request.chapter_title.trim(),
                self.model
            ),
        );

        let chat_request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .with_sampling(self.sampling)
        .streaming();

        let chunks = client
            .stream(&chat_request)
            .map_err(|source| ChapterError::Client { source })?;

        Ok(ChapterStream::new(chunks, self.model.clone()))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// Lazy, single-pass demultiplexer over a transport chunk sequence.
///
/// Non-empty deltas come out as [`ChapterEvent::Text`]; a populated usage
/// envelope comes out as one [`ChapterEvent::Usage`]. Chunks carrying
/// neither are skipped, so an empty usage envelope mid-stream never ends
/// the chapter. A chunk carrying both yields its text before its usage.
pub struct ChapterStream {
    chunks: ChunkIter,
    model: String,
    pending_usage: Option<GenerationStatistics>,
}

impl ChapterStream {
    fn new(chunks: ChunkIter, model: String) -> Self {
        Self {
            chunks,
            model,
            pending_usage: None,
        }
    }

    fn demultiplex(&mut self, chunk: StreamChunk) -> Option<ChapterEvent> {
        let StreamChunk { delta, usage } = chunk;

        let statistics = usage
            .filter(|envelope| *envelope != UsageEnvelope::default())
            .map(|envelope| envelope.into_statistics(self.model.clone()));

        match delta.filter(|text| !text.is_empty()) {
            Some(text) => {
                // Text first; the usage record follows on the next pull.
                self.pending_usage = statistics;
                Some(ChapterEvent::Text(text))
            }
            None => statistics.map(ChapterEvent::Usage),
        }
    }
}

impl Iterator for ChapterStream {
    type Item = Result<ChapterEvent, ChapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(statistics) = self.pending_usage.take() {
            return Some(Ok(ChapterEvent::Usage(statistics)));
        }

        loop {
            match self.chunks.next()? {
                Ok(chunk) => {
                    if let Some(event) = self.demultiplex(chunk) {
                        return Some(Ok(event));
                    }
                }
                Err(source) => return Some(Err(ChapterError::Client { source })),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatReply;
    use crate::logging::VecLogSink;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockStreamClient {
        scripts: Mutex<VecDeque<Vec<Result<StreamChunk, ChatClientError>>>>,
    }

    impl MockStreamClient {
        fn new<I>(scripts: I) -> Self
        where
            I: IntoIterator<Item = Vec<Result<StreamChunk, ChatClientError>>>,
        {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
            }
        }
    }

    impl ChatClient for MockStreamClient {
        fn complete(&self, _request: &ChatRequest) -> Result<ChatReply, ChatClientError> {
            unimplemented!("chapter tests never complete")
        }

        fn stream(&self, request: &ChatRequest) -> Result<ChunkIter, ChatClientError> {
            assert!(request.stream, "chapter requests must be streaming");
            let script = self
                .scripts
                .lock()
                .expect("mock mutex poisoned")
                .pop_front()
                .ok_or_else(|| {
                    ChatClientError::new(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "no more mock streams",
                    ))
                })?;
            Ok(Box::new(script.into_iter()))
        }
    }

    fn usage_envelope() -> UsageEnvelope {
        UsageEnvelope {
            prompt_tokens: 5,
            completion_tokens: 9,
            prompt_time: 0.1,
            completion_time: 0.9,
            total_time: 1.0,
        }
    }

    fn service_request<'a>(
        characters: &'a [Character],
    ) -> ChapterRequest<'a> {
        ChapterRequest {
            chapter_title: "The Road North".into(),
            chapter_summary: "They set out.".into(),
            characters,
            setting: "A quiet village",
            style: WritingStyle::Descriptive,
        }
    }

    fn collect(
        script: Vec<Result<StreamChunk, ChatClientError>>,
    ) -> Vec<Result<ChapterEvent, ChapterError>> {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let service = ChapterService::new(&prompts, &sink, "llama3-8b-8192");
        let characters = vec![Character::new("Mira", "a healer").unwrap()];
        let mock = MockStreamClient::new([script]);
        let stream = service
            .generate(&mock, &service_request(&characters))
            .expect("stream");
        stream.collect()
    }

    #[test]
    fn demultiplexes_text_then_usage() {
        let events = collect(vec![
            Ok(StreamChunk::text("Hello ")),
            Ok(StreamChunk::text("world")),
            Ok(StreamChunk::usage(usage_envelope())),
        ]);

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(ChapterEvent::Text(t)) if t == "Hello "));
        assert!(matches!(&events[1], Ok(ChapterEvent::Text(t)) if t == "world"));
        match &events[2] {
            Ok(ChapterEvent::Usage(stats)) => {
                assert_eq!(stats.input_tokens, 5);
                assert_eq!(stats.output_tokens, 9);
                assert_eq!(stats.model_name, "llama3-8b-8192");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn empty_deltas_and_bare_chunks_are_skipped() {
        let events = collect(vec![
            Ok(StreamChunk::default()),
            Ok(StreamChunk::text("")),
            Ok(StreamChunk::text("prose")),
            Ok(StreamChunk::default()),
        ]);

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(ChapterEvent::Text(t)) if t == "prose"));
    }

    #[test]
    fn empty_usage_envelope_does_not_end_the_stream() {
        let events = collect(vec![
            Ok(StreamChunk::text("before ")),
            Ok(StreamChunk::usage(UsageEnvelope::default())),
            Ok(StreamChunk::text("after")),
        ]);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(ChapterEvent::Text(t)) if t == "before "));
        assert!(matches!(&events[1], Ok(ChapterEvent::Text(t)) if t == "after"));
    }

    #[test]
    fn chunk_with_text_and_usage_yields_text_first() {
        let events = collect(vec![Ok(StreamChunk {
            delta: Some("tail".into()),
            usage: Some(usage_envelope()),
        })]);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(ChapterEvent::Text(t)) if t == "tail"));
        assert!(matches!(&events[1], Ok(ChapterEvent::Usage(_))));
    }

    #[test]
    fn configured_sampling_reaches_the_streaming_request() {
        struct AssertingClient;

        impl ChatClient for AssertingClient {
            fn complete(&self, _request: &ChatRequest) -> Result<ChatReply, ChatClientError> {
                unimplemented!("chapter tests never complete")
            }

            fn stream(&self, request: &ChatRequest) -> Result<ChunkIter, ChatClientError> {
                assert_eq!(request.temperature, 0.3);
                assert_eq!(request.max_tokens, 1024);
                assert_eq!(request.top_p, 0.8);
                let script: Vec<Result<StreamChunk, ChatClientError>> = Vec::new();
                Ok(Box::new(script.into_iter()))
            }
        }

        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let service = ChapterService::new(&prompts, &sink, "llama3-8b-8192").with_sampling(
            SamplingSettings {
                temperature: 0.3,
                max_tokens: 1024,
                top_p: 0.8,
            },
        );
        let characters = vec![Character::new("Mira", "a healer").unwrap()];

        let stream = service
            .generate(&AssertingClient, &service_request(&characters))
            .expect("stream");
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn transport_error_surfaces_mid_stream() {
        let events = collect(vec![
            Ok(StreamChunk::text("partial")),
            Err(ChatClientError::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))),
        ]);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(ChapterEvent::Text(t)) if t == "partial"));
        assert!(matches!(&events[1], Err(ChapterError::Client { .. })));
    }
}
