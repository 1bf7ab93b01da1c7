use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use storyforge_adapters::{AdapterError, GroqClient};
use storyforge_core::{
    random_character, write_markdown, Character, CharacterError, ConfigStore, ExportError, Genre,
    LogLevel, LogRecord, LogSink, ModelSelection, PromptRegistry, RunError, RunObserver,
    RunRequest, StdoutLogSink, Story, StoryRunner, WritingStyle, MAX_CHARACTERS,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink = StdoutLogSink::new();

    match cli.command {
        Command::Run(args) => run_story(&cli.config, args, &sink),
        Command::Character(args) => run_character(args),
        Command::Config(command) => handle_config(&cli.config, command),
    }
}

fn run_story(config_path: &Path, args: RunArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let config = store.config();

    let api_key = resolve_api_key(args.api_key.as_deref(), &config.api.api_key)?;
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| config.api.base_url.clone());
    let client = GroqClient::new(&api_key, &base_url, config.api.timeout)?;

    let genre = parse_choice::<Genre>(args.genre.as_deref(), &config.story.genre, Genre::Fantasy)?;
    let style = parse_choice::<WritingStyle>(
        args.style.as_deref(),
        &config.story.style,
        WritingStyle::Descriptive,
    )?;
    let theme = args
        .theme
        .clone()
        .unwrap_or_else(|| config.story.theme.clone());
    let setting = args
        .setting
        .clone()
        .unwrap_or_else(|| config.story.setting.clone());
    let num_chapters = args.chapters.unwrap_or(config.story.num_chapters);

    let mut characters = Vec::new();
    for spec in &args.character {
        characters.push(parse_character_spec(spec)?);
    }
    for _ in 0..args.random_characters {
        characters.push(random_character());
    }
    if characters.is_empty() {
        let character = random_character();
        sink.log(LogRecord::new(
            LogLevel::Info,
            format!(
                "No characters given; invented {}, {}.",
                character.name(),
                character.description()
            ),
        ));
        characters.push(character);
    }

    let models = ModelSelection {
        outline_model: args
            .outline_model
            .clone()
            .unwrap_or_else(|| config.api.outline_model.clone()),
        chapter_model: args
            .chapter_model
            .clone()
            .unwrap_or_else(|| config.api.chapter_model.clone()),
    };

    let prompts = match &args.prompt_dir {
        Some(dir) => PromptRegistry::with_custom_directories(&[dir])?,
        None => PromptRegistry::new()?,
    };
    let runner = StoryRunner::new(&prompts, sink)
        .with_models(models)
        .with_sampling(config.api.sampling());

    let request = RunRequest {
        title: args.title.clone(),
        genre,
        theme,
        num_chapters,
        characters,
        setting,
        style,
    };

    let observer = ConsoleObserver::default();
    match runner.run(&client, &request, &observer) {
        Ok(outcome) => {
            println!();
            write_story(&args.output, &outcome.story, sink)?;
            println!("\n{}", outcome.statistics.report());
            Ok(())
        }
        Err(RunError::Chapter {
            number,
            source,
            partial,
            statistics,
        }) => {
            println!();
            sink.log(LogRecord::new(
                LogLevel::Error,
                format!("Chapter {number} failed; keeping what was generated so far."),
            ));
            write_story(&args.output, &partial, sink)?;
            println!("\n{}", statistics.report());
            Err(CliError::Run(RunError::Chapter {
                number,
                source,
                partial,
                statistics,
            }))
        }
        Err(other) => Err(CliError::Run(other)),
    }
}

fn run_character(args: CharacterArgs) -> Result<(), CliError> {
    let count = args.count.clamp(1, MAX_CHARACTERS);
    for _ in 0..count {
        let character = random_character();
        println!("{}: {}", character.name(), character.description());
    }
    Ok(())
}

fn handle_config(config_path: &Path, command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => {
            let store = ConfigStore::open(config_path.to_path_buf())?;
            let mut shown = store.config().clone();
            if !shown.api.api_key.is_empty() {
                shown.api.api_key = "<set>".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
        ConfigCommand::Set(args) => {
            let mut store = ConfigStore::open(config_path.to_path_buf())?;
            let config = store.config_mut();
            if let Some(api_key) = args.api_key {
                config.api.api_key = api_key;
            }
            if let Some(base_url) = args.base_url {
                config.api.base_url = base_url;
            }
            if let Some(model) = args.outline_model {
                config.api.outline_model = model;
            }
            if let Some(model) = args.chapter_model {
                config.api.chapter_model = model;
            }
            if let Some(genre) = args.genre {
                genre.parse::<Genre>().map_err(CliError::InvalidArgument)?;
                config.story.genre = genre;
            }
            if let Some(style) = args.style {
                style
                    .parse::<WritingStyle>()
                    .map_err(CliError::InvalidArgument)?;
                config.story.style = style;
            }
            if let Some(theme) = args.theme {
                config.story.theme = theme;
            }
            if let Some(setting) = args.setting {
                config.story.setting = setting;
            }
            if let Some(chapters) = args.chapters {
                config.story.num_chapters = chapters;
            }
            store.save()?;
            println!("Configuration written to {}", store.path().display());
            Ok(())
        }
    }
}

fn write_story(output: &Path, story: &Story, sink: &dyn LogSink) -> Result<(), CliError> {
    let document = story.render_document();
    write_markdown(output, &document)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("Story written to {}.", output.display()),
    ));
    Ok(())
}

/// Flag beats environment beats config file.
fn resolve_api_key(flag: Option<&str>, configured: &str) -> Result<String, CliError> {
    if let Some(key) = flag {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }
    if let Ok(key) = std::env::var("GROQ_API_KEY") {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }
    if !configured.trim().is_empty() {
        return Ok(configured.trim().to_string());
    }
    Err(CliError::Adapter(AdapterError::MissingApiKey))
}

fn parse_choice<T>(flag: Option<&str>, configured: &str, fallback: T) -> Result<T, CliError>
where
    T: std::str::FromStr<Err = String>,
{
    let value = flag
        .map(str::to_string)
        .or_else(|| {
            let trimmed = configured.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });
    match value {
        Some(raw) => raw.parse().map_err(CliError::InvalidArgument),
        None => Ok(fallback),
    }
}

fn parse_character_spec(spec: &str) -> Result<Character, CliError> {
    let (name, description) = spec.split_once(':').ok_or_else(|| {
        CliError::InvalidArgument(format!(
            "character `{spec}` must look like NAME:DESCRIPTION"
        ))
    })?;
    Ok(Character::new(name, description)?)
}

/// Prints chapter prose to the terminal as it streams in. Tracks how
/// much of each chapter has already been printed so only the new suffix
/// is written on every update.
#[derive(Default)]
struct ConsoleObserver {
    state: Mutex<(u32, usize)>,
}

impl RunObserver for ConsoleObserver {
    fn chapter_updated(&self, number: u32, content: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.0 != number {
            println!("\n## Chapter {number}\n");
            *state = (number, 0);
        }
        // Content is append-only, so the stored length is a valid boundary.
        print!("{}", &content[state.1..]);
        let _ = io::stdout().flush();
        state.1 = content.len();
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] storyforge_core::ConfigError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("prompt error: {0}")]
    Prompt(#[from] storyforge_core::PromptError),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("invalid character: {0}")]
    Character(#[from] CharacterError),
    #[error("generation failed: {0}")]
    Run(#[from] RunError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("failed to render config: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Parser)]
#[command(
    name = "storyforge",
    version,
    about = "Generate multi-chapter stories with Groq-hosted chat models"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a complete story and write it to a markdown file
    Run(RunArgs),
    /// Print randomly generated characters
    Character(CharacterArgs),
    /// Inspect or update the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
struct RunArgs {
    /// Story title
    title: String,
    /// Genre, e.g. "Fantasy" or "Science Fiction"
    #[arg(long)]
    genre: Option<String>,
    /// Theme the story should explore
    #[arg(long)]
    theme: Option<String>,
    /// Number of chapters (3 to 20)
    #[arg(long, value_name = "N")]
    chapters: Option<u32>,
    /// Story setting
    #[arg(long)]
    setting: Option<String>,
    /// Writing style, e.g. "Descriptive" or "Minimalist"
    #[arg(long)]
    style: Option<String>,
    /// Add a character as NAME:DESCRIPTION (repeatable, up to 5 total)
    #[arg(long, value_name = "SPEC")]
    character: Vec<String>,
    /// Add this many randomly generated characters
    #[arg(long, value_name = "N", default_value_t = 0)]
    random_characters: usize,
    /// Output file for the rendered story
    #[arg(long, value_name = "FILE", default_value = "story.md")]
    output: PathBuf,
    /// API key; falls back to GROQ_API_KEY, then the config file
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,
    /// Override the API base URL
    #[arg(long, value_name = "URL", help_heading = "Advanced")]
    base_url: Option<String>,
    /// Model used for the outline stage
    #[arg(long, value_name = "MODEL", help_heading = "Advanced")]
    outline_model: Option<String>,
    /// Model used for the chapter stages
    #[arg(long, value_name = "MODEL", help_heading = "Advanced")]
    chapter_model: Option<String>,
    /// Directory of TOML files overriding the built-in prompts
    #[arg(long, value_name = "DIR", help_heading = "Advanced")]
    prompt_dir: Option<PathBuf>,
}

#[derive(Args)]
struct CharacterArgs {
    /// How many characters to generate
    #[arg(long, value_name = "N", default_value_t = 1)]
    count: usize,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the current configuration (API key redacted)
    Show,
    /// Update configuration values
    Set(ConfigSetArgs),
}

#[derive(Args)]
struct ConfigSetArgs {
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
    #[arg(long, value_name = "MODEL")]
    outline_model: Option<String>,
    #[arg(long, value_name = "MODEL")]
    chapter_model: Option<String>,
    #[arg(long)]
    genre: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    setting: Option<String>,
    #[arg(long, value_name = "N")]
    chapters: Option<u32>,
}
