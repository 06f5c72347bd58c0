use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_LLM_PROFILE: &str = "openai";

fn default_timeout() -> u64 {
    600
}

fn default_interface_format() -> String {
    "OpenAI".to_string()
}

fn default_translator_model() -> String {
    "gpt-3.5-turbo-1106".to_string()
}

fn default_adjuster_model() -> String {
    "gpt-4-1106-preview".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_attempts() -> usize {
    5
}

fn default_pipeline_timeout_secs() -> u64 {
    100
}

fn default_min_words() -> usize {
    1
}

fn default_max_words() -> usize {
    700
}

fn default_temperature() -> f32 {
    0.25
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid pipeline settings: {0}")]
    Invalid(String),
}

/// Connection settings for one completion endpoint. The API key is not part
/// of the profile; it is supplied per submission.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_interface_format")]
    pub interface_format: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            interface_format: default_interface_format(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_translator_model")]
    pub translator_model: String,
    #[serde(default = "default_adjuster_model")]
    pub adjuster_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            translator_model: default_translator_model(),
            adjuster_model: default_adjuster_model(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: 0,
            timeout_secs: default_pipeline_timeout_secs(),
            min_words: default_min_words(),
            max_words: default_max_words(),
            default_temperature: default_temperature(),
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.min_words > self.max_words {
            return Err(ConfigError::Invalid(format!(
                "min_words ({}) exceeds max_words ({})",
                self.min_words, self.max_words
            )));
        }
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(ConfigError::Invalid(format!(
                "default_temperature {} is outside [0, 1]",
                self.default_temperature
            )));
        }
        if self.translator_model.trim().is_empty() || self.adjuster_model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "model identifiers must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config with the stock OpenAI profile filled in.
    pub fn with_default_profile() -> Self {
        let mut config = Self::default();
        config.ensure_default_profile();
        config
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn remove_llm_profile(&mut self, name: &str) -> Option<LlmConfig> {
        self.llm_profiles.remove(name)
    }

    pub fn ensure_default_profile(&mut self) {
        if self.llm_profiles.is_empty() {
            self.llm_profiles
                .insert(DEFAULT_LLM_PROFILE.to_string(), LlmConfig::default());
        }
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(input)?;
        config.pipeline.validate()?;
        Ok(config)
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

    /// A store holding `config` for `path` without reading the file.
    pub fn with_config(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config,
        }
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

    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if self.path.exists() {
            self.config = Config::from_path(&self.path)?;
        } else {
            self.config = Config::default();
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .and_then(|name| self.config.llm_profiles.get(name).map(|_| name))
    }

    /// Picks the requested profile, then the most recently used one, then the
    /// first configured one.
    pub fn resolve_llm_interface(&self, requested: Option<&str>) -> Option<String> {
        if let Some(name) = requested.map(str::trim).filter(|name| !name.is_empty()) {
            return Some(name.to_string());
        }
        if let Some(name) = self.last_llm_interface() {
            return Some(name.to_string());
        }
        self.config.llm_profiles.keys().next().cloned()
    }

    pub fn ensure_recent_defaults(&mut self) {
        self.config.ensure_default_profile();
        if self
            .config
            .recent
            .last_llm_interface
            .as_ref()
            .map(|name| self.config.llm_profiles.contains_key(name))
            != Some(true)
        {
            let next = self.config.llm_profiles.keys().next().cloned();
            self.config.recent.last_llm_interface = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "llm_profiles": {
                "openai": {
                    "base_url": "https://api.openai.com/v1",
                    "interface_format": "OpenAI",
                    "timeout": 120
                }
            },
            "pipeline": {
                "translator_model": "gpt-3.5-turbo-1106",
                "adjuster_model": "gpt-4-1106-preview",
                "max_attempts": 3,
                "timeout_secs": 60
            },
            "recent": { "last_llm_interface": "openai" }
        }"#;

        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.llm_profiles["openai"].timeout, 120);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.max_words, 700);
        assert_eq!(config.pipeline.max_tokens, 1000);
        assert_eq!(config.recent.last_llm_interface.as_deref(), Some("openai"));
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = Config::from_json_str("   ").unwrap();
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.pipeline.timeout(), Duration::from_secs(100));
        assert_eq!(config.pipeline.retry_delay(), Duration::ZERO);
    }

    #[test]
    fn rejects_inverted_word_limits() {
        let json = r#"{ "pipeline": { "min_words": 10, "max_words": 5 } }"#;
        let err = Config::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_attempts() {
        let json = r#"{ "pipeline": { "max_attempts": 0 } }"#;
        assert!(Config::from_json_str(json).is_err());
    }

    #[test]
    fn store_persists_config() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("nested").join("config.json");

        let mut store = ConfigStore::open(config_path.clone()).unwrap();
        store.config_mut().upsert_llm_profile(
            "local",
            LlmConfig {
                base_url: "http://localhost:11434".into(),
                interface_format: "Ollama".into(),
                timeout: 30,
            },
        );
        store.touch_llm_interface("local");
        store.save().unwrap();

        let store = ConfigStore::open(config_path).unwrap();
        assert_eq!(store.last_llm_interface(), Some("local"));
        assert_eq!(store.config().llm_profiles["local"].timeout, 30);
    }

    #[test]
    fn ensure_recent_defaults_adds_stock_profile() {
        let temp = tempdir().unwrap();
        let mut store = ConfigStore::open(temp.path().join("missing.json")).unwrap();
        store.ensure_recent_defaults();
        assert_eq!(store.last_llm_interface(), Some(DEFAULT_LLM_PROFILE));
        assert_eq!(
            store.resolve_llm_interface(None).as_deref(),
            Some(DEFAULT_LLM_PROFILE)
        );
        assert_eq!(
            store.resolve_llm_interface(Some(" azure ")).as_deref(),
            Some("azure")
        );
    }

    #[test]
    fn credentials_are_never_serialized() {
        let serialized = serde_json::to_string(&Config::with_default_profile()).unwrap();
        assert!(!serialized.contains("api_key"));
    }
}
