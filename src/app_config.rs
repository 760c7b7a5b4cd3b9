use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::default::Default;

use crate::validation::markers::CompletionMarker;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Model requested from the backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Which channels take part in a batch run
    #[serde(default)]
    pub mode: TranslateMode,

    /// Worker pool settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Backend relay settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Channel selection for a batch run
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslateMode {
    // @mode: Stateless key-pooled channel only
    #[default]
    Api,
    // @mode: Per-credential session channel only
    Token,
    // @mode: Both cohorts on the same cursor
    Both,
}

impl TranslateMode {
    pub fn uses_api(&self) -> bool {
        matches!(self, Self::Api | Self::Both)
    }

    pub fn uses_token(&self) -> bool {
        matches!(self, Self::Token | Self::Both)
    }

    // @returns: Lowercase mode identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Token => "token",
            Self::Both => "both",
        }
    }
}

impl std::fmt::Display for TranslateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TranslateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "token" => Ok(Self::Token),
            "both" => Ok(Self::Both),
            _ => Err(anyhow!("Invalid translate mode: {}", s)),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchConfig {
    /// Fixed fan-out of the api channel
    #[serde(default = "default_api_workers")]
    pub api_workers: usize,

    /// Retries after the first attempt of a retryable failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step in milliseconds (wait = step * attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Lower bound of each session worker start delay draw
    #[serde(default = "default_stagger_min_ms")]
    pub stagger_min_ms: u64,

    /// Upper bound of each session worker start delay draw
    #[serde(default = "default_stagger_max_ms")]
    pub stagger_max_ms: u64,

    /// Seconds between credential reloads during a session run (0 disables)
    #[serde(default = "default_credential_refresh_secs")]
    pub credential_refresh_secs: u64,

    /// Regex every translated unit must match (case-insensitive)
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,

    /// Regex every summary must match (case-insensitive)
    #[serde(default = "default_summary_marker")]
    pub summary_marker: String,

    /// Route session channel calls through the backend's proxy
    #[serde(default)]
    pub use_proxy: bool,

    /// Translate units again even when a translation exists
    #[serde(default)]
    pub retranslate_existing: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            api_workers: default_api_workers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            stagger_min_ms: default_stagger_min_ms(),
            stagger_max_ms: default_stagger_max_ms(),
            credential_refresh_secs: default_credential_refresh_secs(),
            completion_marker: default_completion_marker(),
            summary_marker: default_summary_marker(),
            use_proxy: false,
            retranslate_existing: false,
        }
    }
}

/// Backend relay configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    // @field: Relay base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    // @field: Request timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Bearer token for the relay
    #[serde(default = "String::new")]
    pub api_key: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            api_key: String::new(),
        }
    }
}

/// Prompt templates
///
/// Placeholders: `{{text}}` (or `{{input}}`), `{{source_language}}`, `{{target_language}}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_translation_template")]
    pub translation_template: String,

    #[serde(default = "default_summary_template")]
    pub summary_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            translation_template: default_translation_template(),
            summary_template: default_summary_template(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_api_workers() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_stagger_min_ms() -> u64 {
    5000
}

fn default_stagger_max_ms() -> u64 {
    20000
}

fn default_credential_refresh_secs() -> u64 {
    30
}

fn default_completion_marker() -> String {
    crate::validation::markers::DEFAULT_COMPLETION_MARKER.to_string()
}

fn default_summary_marker() -> String {
    crate::validation::markers::DEFAULT_SUMMARY_MARKER.to_string()
}

fn default_endpoint() -> String {
    "http://localhost:8787".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_translation_template() -> String {
    "Translate the following chapter from {{source_language}} to {{target_language}}. \
Keep paragraph breaks. Put the translated chapter title on the first line. \
Finish with the line \"End of chapter\".\n\n{{text}}"
        .to_string()
}

fn default_summary_template() -> String {
    "Summarise the following {{target_language}} chapter in {{target_language}}. \
Finish with the line \"End of summary\".\n\n{{text}}"
        .to_string()
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        // Validate languages
        let _source_name = crate::language_utils::get_language_name(&self.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.target_language)?;

        if self.model.trim().is_empty() {
            return Err(anyhow!("Model name must not be empty"));
        }

        if self.mode.uses_api() && self.batch.api_workers == 0 {
            return Err(anyhow!("api_workers must be greater than 0 in '{}' mode", self.mode));
        }

        if self.batch.stagger_min_ms > self.batch.stagger_max_ms {
            return Err(anyhow!(
                "stagger_min_ms ({}) must not exceed stagger_max_ms ({})",
                self.batch.stagger_min_ms,
                self.batch.stagger_max_ms
            ));
        }

        CompletionMarker::new(&self.batch.completion_marker)?;
        CompletionMarker::new(&self.batch.summary_marker)?;

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "zh".to_string(),
            target_language: "vi".to_string(),
            model: default_model(),
            mode: TranslateMode::default(),
            batch: BatchConfig::default(),
            backend: BackendConfig::default(),
            prompts: PromptConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
