//! Configuration loading, validation, and management for taskloom agents.
//!
//! Settings come from a TOML file (usually `taskloom.toml`) with environment
//! variable overrides, and are validated before an agent is built from them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `max_iterations`.
pub const ENV_MAX_ITERATIONS: &str = "TASKLOOM_MAX_ITERATIONS";
/// Environment variable overriding `system_prompt`.
pub const ENV_SYSTEM_PROMPT: &str = "TASKLOOM_SYSTEM_PROMPT";
/// Environment variable overriding `stream_buffer`.
pub const ENV_STREAM_BUFFER: &str = "TASKLOOM_STREAM_BUFFER";

/// The root configuration structure for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// System prompt pinned at the head of every model call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Sampling temperature forwarded to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Max tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum model calls per run (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Capacity of the streaming event channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// How tool calls within one step are executed
    #[serde(default)]
    pub tool_concurrency: ToolConcurrency,

    /// Reasoning (ReAct) loop settings
    #[serde(default)]
    pub react: ReactConfig,

    /// Conversation memory retention policy
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_stream_buffer() -> usize {
    10
}
fn default_max_reprompts() -> u32 {
    1
}
fn default_window() -> usize {
    50
}

/// Execution strategy for the tool calls of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolConcurrency {
    /// Run independent calls concurrently and wait for all of them (default)
    #[default]
    Parallel,
    /// Run calls one after another in request order
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactConfig {
    /// Clarifying re-prompts allowed after an unparseable response
    #[serde(default = "default_max_reprompts")]
    pub max_reprompts: u32,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_reprompts: default_max_reprompts(),
        }
    }
}

/// Built-in importance scoring for the selective policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceKind {
    /// User turns outrank assistant turns, which outrank tool output
    #[default]
    RoleWeighted,
    /// Longer messages score higher
    Length,
}

/// Conversation memory retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MemoryConfig {
    /// Keep everything (explicit opt-out of trimming)
    All,
    /// Keep the most recent `max_messages`
    Window { max_messages: usize },
    /// Collapse the oldest block into a summary past `trigger` messages
    Summarize {
        trigger: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keep_recent: Option<usize>,
    },
    /// Keep the `top_k` most important plus the `keep_recent` newest
    Selective {
        top_k: usize,
        keep_recent: usize,
        #[serde(default)]
        importance: ImportanceKind,
    },
    /// Keep the newest messages that fit an estimated token budget
    TokenBudget { max_tokens: usize },
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::Window {
            max_messages: default_window(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            max_iterations: default_max_iterations(),
            stream_buffer: default_stream_buffer(),
            tool_concurrency: ToolConcurrency::default(),
            react: ReactConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl AgentSettings {
    /// Load from `path`, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::load_from(path)?;
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `TASKLOOM_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("{ENV_MAX_ITERATIONS} must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_STREAM_BUFFER) {
            self.stream_buffer = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("{ENV_STREAM_BUFFER} must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(prompt) = lookup(ENV_SYSTEM_PROMPT) {
            self.system_prompt = Some(prompt);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "stream_buffer must be at least 1".into(),
            ));
        }
        match &self.memory {
            MemoryConfig::Window { max_messages: 0 } => Err(ConfigError::ValidationError(
                "memory.max_messages must be at least 1".into(),
            )),
            MemoryConfig::Summarize { trigger, keep_recent } => {
                if *trigger < 2 {
                    return Err(ConfigError::ValidationError(
                        "memory.trigger must be at least 2".into(),
                    ));
                }
                if keep_recent.is_some_and(|k| k == 0 || k >= *trigger) {
                    return Err(ConfigError::ValidationError(
                        "memory.keep_recent must be between 1 and trigger - 1".into(),
                    ));
                }
                Ok(())
            }
            MemoryConfig::Selective { top_k, keep_recent, .. } if top_k + keep_recent == 0 => {
                Err(ConfigError::ValidationError(
                    "memory.top_k + memory.keep_recent must be > 0".into(),
                ))
            }
            MemoryConfig::TokenBudget { max_tokens: 0 } => Err(ConfigError::ValidationError(
                "memory.max_tokens must be > 0".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let settings = AgentSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_iterations, 10);
        assert_eq!(settings.stream_buffer, 10);
        assert_eq!(settings.react.max_reprompts, 1);
        assert_eq!(settings.memory, MemoryConfig::Window { max_messages: 50 });
    }

    #[test]
    fn config_roundtrip_toml() {
        let settings = AgentSettings {
            system_prompt: Some("Be brief.".into()),
            memory: MemoryConfig::Selective {
                top_k: 3,
                keep_recent: 2,
                importance: ImportanceKind::Length,
            },
            ..AgentSettings::default()
        };
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        let parsed: AgentSettings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn parses_memory_policies() {
        let settings = AgentSettings::from_toml_str(
            r#"
max_iterations = 4
tool_concurrency = "sequential"

[react]
max_reprompts = 2

[memory]
policy = "summarize"
trigger = 12
keep_recent = 4
"#,
        )
        .unwrap();
        assert_eq!(settings.max_iterations, 4);
        assert_eq!(settings.tool_concurrency, ToolConcurrency::Sequential);
        assert_eq!(settings.react.max_reprompts, 2);
        assert_eq!(
            settings.memory,
            MemoryConfig::Summarize {
                trigger: 12,
                keep_recent: Some(4)
            }
        );
    }

    #[test]
    fn invalid_values_rejected() {
        let hot = AgentSettings {
            temperature: Some(5.0),
            ..AgentSettings::default()
        };
        assert!(hot.validate().is_err());

        let zero = AgentSettings {
            max_iterations: 0,
            ..AgentSettings::default()
        };
        assert!(zero.validate().is_err());

        let window = AgentSettings {
            memory: MemoryConfig::Window { max_messages: 0 },
            ..AgentSettings::default()
        };
        assert!(window.validate().is_err());

        let summarize = AgentSettings {
            memory: MemoryConfig::Summarize {
                trigger: 4,
                keep_recent: Some(4),
            },
            ..AgentSettings::default()
        };
        assert!(summarize.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let settings = AgentSettings::load_from(Path::new("/nonexistent/taskloom.toml")).unwrap();
        assert_eq!(settings, AgentSettings::default());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations = 3\n[memory]\npolicy = \"all\"").unwrap();
        let settings = AgentSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.max_iterations, 3);
        assert_eq!(settings.memory, MemoryConfig::All);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations = \"many\"").unwrap();
        let err = AgentSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_ITERATIONS, "7"),
            (ENV_SYSTEM_PROMPT, "You are terse."),
        ]);
        let mut settings = AgentSettings::default();
        settings
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.max_iterations, 7);
        assert_eq!(settings.system_prompt.as_deref(), Some("You are terse."));

        let bad: HashMap<&str, &str> = HashMap::from([(ENV_STREAM_BUFFER, "lots")]);
        assert!(settings
            .apply_overrides(|k| bad.get(k).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AgentSettings::default_toml();
        assert!(toml_str.contains("max_iterations = 10"));
        assert!(toml_str.contains("policy = \"window\""));
    }
}
