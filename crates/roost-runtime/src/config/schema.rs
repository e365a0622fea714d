//! Configuration schema definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use roost_framework::{FrameworkSettings, Timeouts};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoostConfig {
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bot behaviour.
    #[serde(default)]
    pub bot: BotConfig,

    /// Time budgets.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Persistence backend.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RoostConfig {
    /// Framework settings derived from the `bot` and `timeouts` sections.
    pub fn framework_settings(&self) -> FrameworkSettings {
        FrameworkSettings {
            admins: Arc::new(self.bot.admins.iter().cloned().collect()),
            command_prefix: self.bot.command_prefix.clone(),
            config_room_name: self.bot.config_room_name.clone(),
            timeouts: self.timeouts.to_timeouts(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as used in filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// The matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation period of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files to keep; `0` keeps everything.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `roost_framework = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    5
}

// =============================================================================
// Bot
// =============================================================================

/// Bot behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Users that pass every ACL check and may invite the bot anywhere.
    #[serde(default)]
    pub admins: BTreeSet<String>,

    /// Rooms any user may invite the bot into.
    #[serde(default)]
    pub allowed_invite_rooms: BTreeSet<String>,

    /// Prefix of chat commands.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Name of auto-created private config rooms.
    #[serde(default = "default_config_room_name")]
    pub config_room_name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admins: BTreeSet::new(),
            allowed_invite_rooms: BTreeSet::new(),
            command_prefix: default_command_prefix(),
            config_room_name: default_config_room_name(),
        }
    }
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_config_room_name() -> String {
    "Bot configuration".to_string()
}

// =============================================================================
// Timeouts
// =============================================================================

/// Time budgets, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Whole handling of one inbound event.
    #[serde(default = "default_event_secs")]
    pub event_secs: u64,

    /// Delivery of one text message to every module of a room.
    #[serde(default = "default_broadcast_secs")]
    pub broadcast_secs: u64,

    /// Destroying every module of a room the bot left.
    #[serde(default = "default_leave_secs")]
    pub leave_secs: u64,

    /// Waiting for one plugin task to stop.
    #[serde(default = "default_task_join_secs")]
    pub task_join_secs: u64,

    /// Waiting for a created room to show up in local state.
    #[serde(default = "default_room_visible_secs")]
    pub room_visible_secs: u64,

    /// One plugin's `setup()` or `init()` hook.
    #[serde(default = "default_setup_secs")]
    pub setup_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            event_secs: default_event_secs(),
            broadcast_secs: default_broadcast_secs(),
            leave_secs: default_leave_secs(),
            task_join_secs: default_task_join_secs(),
            room_visible_secs: default_room_visible_secs(),
            setup_secs: default_setup_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Budget of one dispatched event.
    pub fn event(&self) -> Duration {
        Duration::from_secs(self.event_secs)
    }

    /// Framework budgets.
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            broadcast: Duration::from_secs(self.broadcast_secs),
            leave: Duration::from_secs(self.leave_secs),
            task_join: Duration::from_secs(self.task_join_secs),
            room_visible: Duration::from_secs(self.room_visible_secs),
            setup: Duration::from_secs(self.setup_secs),
        }
    }
}

fn default_event_secs() -> u64 {
    60
}

fn default_broadcast_secs() -> u64 {
    20
}

fn default_leave_secs() -> u64 {
    5
}

fn default_task_join_secs() -> u64 {
    10
}

fn default_room_visible_secs() -> u64 {
    30
}

fn default_setup_secs() -> u64 {
    30
}

// =============================================================================
// Storage
// =============================================================================

/// Persistence backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; nothing survives a restart.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database path for the SQLite backend.
    #[serde(default)]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_framework_budgets() {
        let config = RoostConfig::default();
        assert_eq!(config.timeouts.to_timeouts(), Timeouts::default());
        assert_eq!(config.timeouts.event(), Duration::from_secs(60));

        let settings = config.framework_settings();
        assert_eq!(settings.command_prefix, "!");
        assert!(settings.admins.is_empty());
    }

    #[test]
    fn test_admins_reach_framework_settings() {
        let mut config = RoostConfig::default();
        config.bot.admins.insert("@admin:test".to_string());
        assert!(config.framework_settings().is_admin("@admin:test"));
    }
}
