pub mod chapter;
pub mod characters;
pub mod client;
pub mod config;
pub mod export;
pub mod logging;
pub mod outline;
pub mod prompts;
pub mod run;
pub mod stats;
pub mod story;

pub use chapter::{ChapterError, ChapterEvent, ChapterRequest, ChapterService, ChapterStream};
pub use characters::{random_character, random_character_with};
pub use client::{
    ChatClient, ChatClientError, ChatMessage, ChatReply, ChatRequest, ChunkIter, SamplingSettings,
    StreamChunk, UsageEnvelope,
};
pub use config::{ApiConfig, Config, ConfigError, ConfigStore, StoryDefaults};
pub use export::{markdown_bytes, write_markdown, ExportError};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink, VecLogSink,
};
pub use outline::{OutlineError, OutlineRequest, OutlineService, StoryOutline};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptTemplate};
pub use run::{
    ModelSelection, NullObserver, RunError, RunObserver, RunOutcome, RunRequest, StoryRunner,
    MAX_CHAPTERS, MAX_CHARACTERS, MIN_CHAPTERS,
};
pub use stats::GenerationStatistics;
pub use story::{Character, CharacterError, Genre, Story, StoryError, WritingStyle};
