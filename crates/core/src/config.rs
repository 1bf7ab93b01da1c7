use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::client::SamplingSettings;

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_outline_model() -> String {
    "llama3-70b-8192".to_string()
}

fn default_chapter_model() -> String {
    "llama3-8b-8192".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_top_p() -> f32 {
    1.0
}

fn default_timeout() -> u64 {
    600
}

fn default_num_chapters() -> u32 {
    10
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Model-access settings. The API key may stay empty here and be
/// supplied via flag or environment instead; the adapter rejects
/// construction when no key is found anywhere.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_outline_model")]
    pub outline_model: String,
    #[serde(default = "default_chapter_model")]
    pub chapter_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ApiConfig {
    /// Sampling parameters for outgoing requests.
    pub fn sampling(&self) -> SamplingSettings {
        SamplingSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            outline_model: default_outline_model(),
            chapter_model: default_chapter_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoryDefaults {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default = "default_num_chapters")]
    pub num_chapters: u32,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub style: String,
}

impl Default for StoryDefaults {
    fn default() -> Self {
        Self {
            title: String::new(),
            genre: String::new(),
            theme: String::new(),
            num_chapters: default_num_chapters(),
            setting: String::new(),
            style: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub story: StoryDefaults,
}

impl Config {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_input_yields_defaults() {
        let config = Config::from_json_str("").unwrap();
        assert_eq!(config.api.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.api.outline_model, "llama3-70b-8192");
        assert_eq!(config.story.num_chapters, 10);
    }

    #[test]
    fn partial_config_backfills_defaults() {
        let config = Config::from_json_str(r#"{"api":{"api_key":"gsk_test"}}"#).unwrap();
        assert_eq!(config.api.api_key, "gsk_test");
        assert_eq!(config.api.chapter_model, "llama3-8b-8192");
        assert_eq!(config.api.timeout, 600);
    }

    #[test]
    fn sampling_settings_come_from_the_api_section() {
        let config = Config::from_json_str(
            r#"{"api":{"temperature":0.2,"max_tokens":512,"top_p":0.9}}"#,
        )
        .unwrap();
        let sampling = config.api.sampling();
        assert_eq!(sampling.temperature, 0.2);
        assert_eq!(sampling.max_tokens, 512);
        assert_eq!(sampling.top_p, 0.9);
    }

    #[test]
    fn store_round_trips() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");

        let mut store = ConfigStore::open(&path).unwrap();
        store.config_mut().api.api_key = "gsk_123".into();
        store.config_mut().story.title = "My Tale".into();
        store.save().unwrap();

        let reloaded = ConfigStore::open(&path).unwrap();
        assert_eq!(reloaded.config().api.api_key, "gsk_123");
        assert_eq!(reloaded.config().story.title, "My Tale");
    }
}
