//! Runtime configuration loaded from TOML.
//!
//! ```toml
//! app_name = "assistant"
//!
//! [run]
//! streaming = "partial"
//! max_turns = 10
//! on_max_turns = "suspend"
//!
//! [retry]
//! max_attempts = 5
//!
//! [store]
//! path = "sessions.db"
//!
//! [deny]
//! tools = ["shell"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use policy::ToolPolicy;
use serde::{Deserialize, Serialize};
use storage::{InMemorySessionStore, SessionStore, SqliteSessionStore};

use crate::model::{Modality, RetryConfig};

/// How events reach the caller of [`Runner::run`](crate::Runner::run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Buffer everything and deliver it after the terminal event.
    #[default]
    None,
    /// Deliver events as they are appended, including partial model text.
    Partial,
    /// Like `Partial`, and accept live input while the invocation runs.
    Bidi,
}

impl StreamingMode {
    pub fn is_streaming(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// What an LLM agent does when it runs out of model turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxTurnsPolicy {
    #[default]
    Fail,
    Suspend,
}

/// Per-invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub streaming: StreamingMode,
    /// Model calls allowed per LLM agent run before `on_max_turns` applies.
    pub max_turns: u32,
    pub on_max_turns: MaxTurnsPolicy,
    pub response_modality: Modality,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            streaming: StreamingMode::None,
            max_turns: 20,
            on_max_turns: MaxTurnsPolicy::Fail,
            response_modality: Modality::Text,
        }
    }
}

impl RunConfig {
    pub fn with_streaming(mut self, streaming: StreamingMode) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_on_max_turns(mut self, policy: MaxTurnsPolicy) -> Self {
        self.on_max_turns = policy;
        self
    }

    pub fn with_response_modality(mut self, modality: Modality) -> Self {
        self.response_modality = modality;
        self
    }
}

/// Where sessions are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. Sessions live in memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn open(&self) -> Result<Arc<dyn SessionStore>, ConfigError> {
        match &self.path {
            Some(path) => {
                let store = SqliteSessionStore::open(path)
                    .map_err(|e| ConfigError::Invalid(format!("store {}: {e}", path.display())))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(InMemorySessionStore::new())),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Settings for invocations started with
    /// [`Runner::run_with_defaults`](crate::Runner::run_with_defaults).
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Tool rules (allow/deny).
    #[serde(flatten)]
    pub policy: ToolPolicy,
}

fn default_app_name() -> String {
    "app".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// In-memory sessions, default run settings, every tool allowed.
    pub fn default_config() -> Self {
        Self {
            app_name: default_app_name(),
            run: RunConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
            policy: ToolPolicy::permissive(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".into()));
        }
        if self.run.max_turns == 0 {
            return Err(ConfigError::Invalid("run.max_turns must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        self.policy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("{0} is not configured")]
    Missing(&'static str),
}
