use thiserror::Error;

use crate::chapter::{ChapterError, ChapterEvent, ChapterRequest, ChapterService};
use crate::client::{ChatClient, SamplingSettings};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::outline::{OutlineError, OutlineRequest, OutlineService};
use crate::prompts::PromptRegistry;
use crate::stats::GenerationStatistics;
use crate::story::{Character, Genre, Story, StoryError, WritingStyle};

pub const MIN_CHAPTERS: u32 = 3;
pub const MAX_CHAPTERS: u32 = 20;
pub const MAX_CHARACTERS: usize = 5;

/// Model identifiers for the two generation stages. The outline stage
/// defaults to the larger model since it must follow the JSON contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSelection {
    pub outline_model: String,
    pub chapter_model: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            outline_model: "llama3-70b-8192".to_string(),
            chapter_model: "llama3-8b-8192".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub title: String,
    pub genre: Genre,
    pub theme: String,
    pub num_chapters: u32,
    pub characters: Vec<Character>,
    pub setting: String,
    pub style: WritingStyle,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub story: Story,
    pub statistics: GenerationStatistics,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("chapter count {requested} is outside the allowed range {MIN_CHAPTERS}..={MAX_CHAPTERS}")]
    InvalidChapterCount { requested: u32 },
    #[error("character count {requested} is outside the allowed range 1..={MAX_CHARACTERS}")]
    InvalidCharacterCount { requested: usize },
    #[error("outline generation failed: {source}")]
    Outline {
        #[source]
        source: OutlineError,
    },
    /// A chapter stage failed. The partially generated story and the
    /// statistics accumulated so far stay inspectable on the error.
    #[error("generation of chapter {number} failed: {source}")]
    Chapter {
        number: u32,
        #[source]
        source: ChapterError,
        partial: Box<Story>,
        statistics: Box<GenerationStatistics>,
    },
    /// The outline and the story content map disagree about the chapter
    /// space. This indicates a bug, not a recoverable runtime condition.
    #[error("story aggregate rejected chapter content: {source}")]
    Inconsistent {
        #[source]
        source: StoryError,
    },
}

/// Hook for live presentation. Called by the orchestrator after each
/// successful append and after each chapter completes, so the core stays
/// testable without a presentation layer.
pub trait RunObserver {
    fn chapter_updated(&self, _number: u32, _content: &str) {}

    /// `fraction` runs from 0.0 to 1.0 over the chapter loop.
    fn progress(&self, _fraction: f64) {}
}

#[derive(Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Sequences the whole run: one outline call, then one streaming chapter
/// call per outline entry, strictly in ascending chapter order, folding
/// every usage record into a running total.
pub struct StoryRunner<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    models: ModelSelection,
    sampling: SamplingSettings,
}

impl<'a> StoryRunner<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            models: ModelSelection::default(),
            sampling: SamplingSettings::default(),
        }
    }

    pub fn with_models(mut self, models: ModelSelection) -> Self {
        self.models = models;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingSettings) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn models(&self) -> &ModelSelection {
        &self.models
    }

    pub fn run<C: ChatClient>(
        &self,
        client: &C,
        request: &RunRequest,
        observer: &dyn RunObserver,
    ) -> Result<RunOutcome, RunError> {
        if !(MIN_CHAPTERS..=MAX_CHAPTERS).contains(&request.num_chapters) {
            return Err(RunError::InvalidChapterCount {
                requested: request.num_chapters,
            });
        }
        if request.characters.is_empty() || request.characters.len() > MAX_CHARACTERS {
            return Err(RunError::InvalidCharacterCount {
                requested: request.characters.len(),
            });
        }

        let outline_service = OutlineService::new(self.prompts, self.sink, &self.models.outline_model)
            .with_sampling(self.sampling);
        let outline_request = OutlineRequest {
            title: request.title.clone(),
            genre: request.genre.label().to_string(),
            theme: request.theme.clone(),
            num_chapters: request.num_chapters,
        };
        let (outline_stats, outline) = outline_service
            .generate(client, &outline_request)
            .map_err(|source| RunError::Outline { source })?;

        let mut story = Story::new(outline, request.characters.clone(), request.setting.clone());
        let mut totals = outline_stats;

        let chapter_service = ChapterService::new(self.prompts, self.sink, &self.models.chapter_model)
            .with_sampling(self.sampling);
        let plan: Vec<(u32, String)> = story
            .outline()
            .chapters()
            .map(|(number, summary)| (number, summary.to_string()))
            .collect();
        let chapter_count = plan.len();

        for (index, (number, summary)) in plan.into_iter().enumerate() {
            let chapter_request = ChapterRequest {
                chapter_title: format!("Chapter {number}"),
                chapter_summary: summary,
                characters: request.characters.as_slice(),
                setting: request.setting.as_str(),
                style: request.style,
            };

            let stream = match chapter_service.generate(client, &chapter_request) {
                Ok(stream) => stream,
                Err(source) => {
                    return Err(RunError::Chapter {
                        number,
                        source,
                        partial: Box::new(story),
                        statistics: Box::new(totals),
                    })
                }
            };

            for event in stream {
                match event {
                    Ok(ChapterEvent::Text(fragment)) => {
                        story
                            .append_content(number, &fragment)
                            .map_err(|source| RunError::Inconsistent { source })?;
                        observer
                            .chapter_updated(number, story.chapter_content(number).unwrap_or(""));
                    }
                    Ok(ChapterEvent::Usage(statistics)) => totals.combine(&statistics),
                    Err(source) => {
                        return Err(RunError::Chapter {
                            number,
                            source,
                            partial: Box::new(story),
                            statistics: Box::new(totals),
                        })
                    }
                }
            }

            observer.progress((index + 1) as f64 / chapter_count as f64);
        }

        self.sink.log(LogRecord::new(
            LogLevel::Info,
            format!(
                "Run complete: {} chapters, {} tokens generated.",
                chapter_count,
                totals.output_tokens
            ),
        ));

        Ok(RunOutcome {
            story,
            statistics: totals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        ChatClientError, ChatReply, ChatRequest, ChunkIter, StreamChunk, UsageEnvelope,
    };
    use crate::logging::VecLogSink;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        replies: Mutex<VecDeque<ChatReply>>,
        streams: Mutex<VecDeque<Vec<Result<StreamChunk, ChatClientError>>>>,
    }

    impl ScriptedClient {
        fn new(
            replies: Vec<ChatReply>,
            streams: Vec<Vec<Result<StreamChunk, ChatClientError>>>,
        ) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                streams: Mutex::new(streams.into()),
            }
        }
    }

    impl ChatClient for ScriptedClient {
        fn complete(&self, _request: &ChatRequest) -> Result<ChatReply, ChatClientError> {
            self.replies
                .lock()
                .expect("mock mutex poisoned")
                .pop_front()
                .ok_or_else(|| {
                    ChatClientError::new(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "no scripted reply",
                    ))
                })
        }

        fn stream(&self, _request: &ChatRequest) -> Result<ChunkIter, ChatClientError> {
            let script = self
                .streams
                .lock()
                .expect("mock mutex poisoned")
                .pop_front()
                .ok_or_else(|| {
                    ChatClientError::new(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "no scripted stream",
                    ))
                })?;
            Ok(Box::new(script.into_iter()))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        updates: Mutex<Vec<(u32, String)>>,
        fractions: Mutex<Vec<f64>>,
    }

    impl RunObserver for RecordingObserver {
        fn chapter_updated(&self, number: u32, content: &str) {
            self.updates
                .lock()
                .unwrap()
                .push((number, content.to_string()));
        }

        fn progress(&self, fraction: f64) {
            self.fractions.lock().unwrap().push(fraction);
        }
    }

    fn usage(tokens: u64) -> UsageEnvelope {
        UsageEnvelope {
            prompt_tokens: tokens,
            completion_tokens: tokens * 2,
            prompt_time: 0.5,
            completion_time: 1.0,
            total_time: 1.5,
        }
    }

    fn outline_reply() -> ChatReply {
        ChatReply {
            content: r#"{"title":"ignored","1":"opening","2":"closing","3":"coda"}"#.to_string(),
            usage: Some(usage(10)),
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            title: "My Tale".into(),
            genre: Genre::Fantasy,
            theme: "loyalty".into(),
            num_chapters: 3,
            characters: vec![Character::new("Mira", "a healer").unwrap()],
            setting: "A quiet village".into(),
            style: WritingStyle::Narrative,
        }
    }

    #[test]
    fn runs_outline_then_all_chapters_in_order() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let runner = StoryRunner::new(&prompts, &sink);

        let client = ScriptedClient::new(
            vec![outline_reply()],
            vec![
                vec![
                    Ok(StreamChunk::text("One ")),
                    Ok(StreamChunk::text("done.")),
                    Ok(StreamChunk::usage(usage(5))),
                ],
                vec![
                    Ok(StreamChunk::text("Two done.")),
                    Ok(StreamChunk::usage(usage(6))),
                ],
                vec![
                    Ok(StreamChunk::text("Three done.")),
                    Ok(StreamChunk::usage(usage(7))),
                ],
            ],
        );
        let observer = RecordingObserver::default();

        let outcome = runner.run(&client, &request(), &observer).expect("run");

        assert_eq!(outcome.story.chapter_content(1), Some("One done."));
        assert_eq!(outcome.story.chapter_content(2), Some("Two done."));
        assert_eq!(outcome.story.chapter_content(3), Some("Three done."));

        // outline usage + three chapter usages
        assert_eq!(outcome.statistics.input_tokens, 10 + 5 + 6 + 7);
        assert_eq!(outcome.statistics.output_tokens, 2 * (10 + 5 + 6 + 7));
        assert_eq!(outcome.statistics.model_name, "llama3-70b-8192");

        let updates = observer.updates.lock().unwrap();
        assert_eq!(updates[0], (1, "One ".to_string()));
        assert_eq!(updates[1], (1, "One done.".to_string()));
        let fractions = observer.fractions.lock().unwrap();
        assert_eq!(*fractions, vec![1.0 / 3.0, 2.0 / 3.0, 1.0]);
    }

    #[test]
    fn chapter_failure_keeps_partial_story() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let runner = StoryRunner::new(&prompts, &sink);

        let client = ScriptedClient::new(
            vec![outline_reply()],
            vec![
                vec![
                    Ok(StreamChunk::text("One done.")),
                    Ok(StreamChunk::usage(usage(5))),
                ],
                vec![
                    Ok(StreamChunk::text("Two part")),
                    Err(ChatClientError::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    ))),
                ],
            ],
        );

        let error = runner
            .run(&client, &request(), &NullObserver)
            .expect_err("should fail");

        match error {
            RunError::Chapter {
                number,
                partial,
                statistics,
                ..
            } => {
                assert_eq!(number, 2);
                assert_eq!(partial.chapter_content(1), Some("One done."));
                assert_eq!(partial.chapter_content(2), Some("Two part"));
                assert_eq!(partial.chapter_content(3), Some(""));
                assert_eq!(statistics.input_tokens, 15);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn outline_failure_halts_the_run() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let runner = StoryRunner::new(&prompts, &sink);

        let client = ScriptedClient::new(
            vec![ChatReply {
                content: "not json".to_string(),
                usage: None,
            }],
            vec![],
        );

        let error = runner
            .run(&client, &request(), &NullObserver)
            .expect_err("should fail");
        assert!(matches!(
            error,
            RunError::Outline {
                source: OutlineError::Parse { .. }
            }
        ));
    }

    #[test]
    fn bounds_are_validated_before_any_request() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let runner = StoryRunner::new(&prompts, &sink);
        let client = ScriptedClient::new(vec![], vec![]);

        let mut too_few = request();
        too_few.num_chapters = 2;
        assert!(matches!(
            runner.run(&client, &too_few, &NullObserver),
            Err(RunError::InvalidChapterCount { requested: 2 })
        ));

        let mut no_characters = request();
        no_characters.characters.clear();
        assert!(matches!(
            runner.run(&client, &no_characters, &NullObserver),
            Err(RunError::InvalidCharacterCount { requested: 0 })
        ));
    }
}
