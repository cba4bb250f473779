//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/teamlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/teamlens/` (~/.config/teamlens/)
//! - State/Logs: `$XDG_STATE_HOME/teamlens/` (~/.local/state/teamlens/)
//!
//! Transcripts are read from the Claude data root, resolved in this order:
//! 1. `[sources] claude_dir` in the config file
//! 2. `CLAUDE_CONFIG_DIR`
//! 3. `~/.claude`

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Where transcripts live
    #[serde(default)]
    pub sources: SourcesConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Spawn-pairing thresholds
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Pagination and slice limits
    #[serde(default)]
    pub query: QueryConfig,

    /// Parse cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transcript source locations
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SourcesConfig {
    /// Override for the Claude data root (the directory holding `projects/`)
    pub claude_dir: Option<PathBuf>,
}

impl SourcesConfig {
    /// Resolve the Claude data root using config, then env, then the default.
    pub fn claude_root(&self) -> PathBuf {
        if let Some(dir) = &self.claude_dir {
            return expand_tilde(dir);
        }
        std::env::var_os("CLAUDE_CONFIG_DIR")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".claude"))
    }

    /// Directory holding one subdirectory per project.
    pub fn projects_dir(&self) -> PathBuf {
        self.claude_root().join("projects")
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3337".to_string()
}

/// Time windows used when pairing spawn calls with sub-agent transcripts.
///
/// All values are milliseconds.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationConfig {
    /// How far before a spawn call an agent's first event may start
    #[serde(default = "default_spawn_slack_ms")]
    pub spawn_slack_ms: i64,

    /// How far after a spawn call an agent's first event may start
    #[serde(default = "default_spawn_window_ms")]
    pub spawn_window_ms: i64,

    /// Maximum distance between an unnamed lead spawn and an agent's first event
    #[serde(default = "default_proximity_ms")]
    pub proximity_ms: i64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            spawn_slack_ms: default_spawn_slack_ms(),
            spawn_window_ms: default_spawn_window_ms(),
            proximity_ms: default_proximity_ms(),
        }
    }
}

fn default_spawn_slack_ms() -> i64 {
    2_000
}

fn default_spawn_window_ms() -> i64 {
    120_000
}

fn default_proximity_ms() -> i64 {
    5_000
}

/// Query layer limits
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct QueryConfig {
    /// Page size used when the request does not give one
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Upper bound on a requested page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Number of events returned with a teammate detail
    #[serde(default = "default_teammate_event_limit")]
    pub teammate_event_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            teammate_event_limit: default_teammate_event_limit(),
        }
    }
}

fn default_page_size() -> usize {
    100
}

fn default_max_page_size() -> usize {
    500
}

fn default_teammate_event_limit() -> usize {
    100
}

/// Parse cache configuration
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct CacheConfig {
    /// Maximum number of parsed sessions kept in memory (0 = never evict)
    #[serde(default)]
    pub max_sessions: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write rotating log files under the state directory
    #[serde(default = "default_true")]
    pub file: bool,

    /// Also write logs to stderr
    #[serde(default = "default_true")]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: true,
            stderr: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the query layer misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.query.max_page_size == 0 {
            return Err(Error::Config(
                "query.max_page_size must be greater than 0".to_string(),
            ));
        }
        if self.query.default_page_size == 0
            || self.query.default_page_size > self.query.max_page_size
        {
            return Err(Error::Config(
                "query.default_page_size must be between 1 and query.max_page_size".to_string(),
            ));
        }
        if self.correlation.spawn_slack_ms < 0
            || self.correlation.spawn_window_ms < 0
            || self.correlation.proximity_ms < 0
        {
            return Err(Error::Config(
                "correlation windows must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/teamlens/config.toml` (~/.config/teamlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("teamlens").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/teamlens/` (~/.local/state/teamlens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("teamlens")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/teamlens/teamlens.log` (~/.local/state/teamlens/teamlens.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("teamlens.log")
    }
}
