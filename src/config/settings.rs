//! Application settings

use crate::core::dispatcher::LineEnding;
use crate::core::engine::EngineConfig;
use crate::core::rules::{ActionKind, Condition, ConditionId, RuleTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No usable configuration directory on this platform
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read or written
    #[error("Config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for [`AppConfig`]
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser error
        #[source]
        source: toml::de::Error,
    },

    /// Serialization failed
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial endpoint
    pub port: PortSettings,
    /// Engine tuning
    pub engine: EngineSettings,
    /// Seed patterns and conditions
    pub rules: RuleSettings,
    /// Stored command list
    pub commands: Vec<String>,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Serial endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            name: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Terminator for dispatched commands
    pub line_ending: LineEnding,
    /// Lines kept for trace export (0 = none)
    pub history_limit: usize,
    /// Surface unterminated input after an idle read
    pub flush_partial_lines: bool,
    /// Length of one script `delay` unit in milliseconds
    pub delay_unit_ms: u64,
    /// Notification channel capacity
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            line_ending: LineEnding::Cr,
            history_limit: 10_000,
            flush_partial_lines: true,
            delay_unit_ms: 1000,
            event_capacity: 1024,
        }
    }
}

/// Seed rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Watched substrings
    pub patterns: Vec<String>,
    /// Conditions
    pub conditions: Vec<ConditionConfig>,
}

/// One condition in the config file
///
/// ```toml
/// [[rules.conditions]]
/// id = 1
/// pattern = "login:"
/// action = "root"
/// kind = "command"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Condition id
    pub id: ConditionId,
    /// Trigger substring
    pub pattern: String,
    /// Command text or event payload
    pub action: String,
    /// What to do on a match
    pub kind: ActionKind,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (e.g., "info", "serialwatch_core=debug")
    pub level: String,
    /// Emit JSON records
    pub json: bool,
    /// Also write logs to this file; relative paths live under [`super::log_dir`]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Log file location with relative paths placed under the log directory
    pub fn resolved_file(&self) -> Option<PathBuf> {
        let file = self.file.as_ref()?;
        if file.is_relative() {
            if let Some(dir) = super::log_dir() {
                return Some(dir.join(file));
            }
        }
        Some(file.clone())
    }
}

impl AppConfig {
    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::default_config_path().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::default_config_path().ok_or(ConfigError::NoConfigDir)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.save_to(&path)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.name.trim().is_empty() {
            return Err(invalid("port.name", "must not be empty"));
        }
        if self.port.baud_rate == 0 {
            return Err(invalid("port.baud_rate", "must be positive"));
        }
        if self.port.read_timeout_ms == 0 {
            return Err(invalid("port.read_timeout_ms", "must be positive"));
        }
        if self.engine.event_capacity == 0 {
            return Err(invalid("engine.event_capacity", "must be positive"));
        }
        if self.rules.patterns.iter().any(String::is_empty) {
            return Err(invalid("rules.patterns", "empty pattern"));
        }

        let mut seen = HashSet::new();
        for condition in &self.rules.conditions {
            if condition.pattern.is_empty() {
                return Err(invalid(
                    "rules.conditions",
                    format!("condition {} has an empty pattern", condition.id),
                ));
            }
            if !seen.insert(condition.id) {
                return Err(invalid(
                    "rules.conditions",
                    format!("duplicate id {}", condition.id),
                ));
            }
        }
        Ok(())
    }

    /// Insert a condition, replacing any entry with the same id
    pub fn set_condition(&mut self, condition: ConditionConfig) {
        self.rules.conditions.retain(|c| c.id != condition.id);
        self.rules.conditions.push(condition);
    }

    /// Build the engine configuration
    pub fn engine_config(&self) -> EngineConfig {
        let mut rules = RuleTable::new();
        rules.set_patterns(self.rules.patterns.iter().cloned());
        for c in &self.rules.conditions {
            rules.add_condition(c.id, Condition::new(&c.pattern, &c.action, c.kind));
        }

        EngineConfig {
            port: self.port.name.clone(),
            baud_rate: self.port.baud_rate,
            read_timeout: Duration::from_millis(self.port.read_timeout_ms),
            line_ending: self.engine.line_ending,
            history_limit: self.engine.history_limit,
            flush_partial_lines: self.engine.flush_partial_lines,
            delay_unit: Duration::from_millis(self.engine.delay_unit_ms),
            event_capacity: self.engine.event_capacity,
            rules,
            commands: self.commands.clone(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
