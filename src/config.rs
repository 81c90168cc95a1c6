//! Configuration management for shell-exec.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::execution::{
    Executor, GracePeriods, LocalTransport, DEFAULT_DRAIN_GRACE, DEFAULT_KILL_GRACE,
    DEFAULT_TIMEOUT,
};
use crate::masking::MaskRule;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution settings.
    pub execution: ExecutionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Execution configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Default timeout in seconds; `null` waits forever.
    pub default_timeout_secs: Option<u64>,
    /// Time drainers may flush after a normal exit, in milliseconds.
    pub drain_grace_ms: u64,
    /// Time allowed after a forced kill, in milliseconds.
    pub kill_grace_ms: u64,
    /// Masking rule applied to every logged command.
    pub log_mask_re: Option<String>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: Some(DEFAULT_TIMEOUT.as_secs()),
            drain_grace_ms: DEFAULT_DRAIN_GRACE.as_millis() as u64,
            kill_grace_ms: DEFAULT_KILL_GRACE.as_millis() as u64,
            log_mask_re: None,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Parse a timeout in seconds where `0` means no timeout.
fn parse_timeout_secs(secs: u64) -> Option<u64> {
    (secs > 0).then_some(secs)
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(timeout) = std::env::var("SHELL_EXEC_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.execution.default_timeout_secs = parse_timeout_secs(secs);
            }
        }

        if let Ok(mask) = std::env::var("SHELL_EXEC_MASK") {
            if !mask.is_empty() {
                self.execution.log_mask_re = Some(mask);
            }
        }

        if let Ok(level) = std::env::var("SHELL_EXEC_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(secs) = args.timeout {
            self.execution.default_timeout_secs = parse_timeout_secs(secs);
        }

        if let Some(ref mask) = args.mask {
            self.execution.log_mask_re = Some(mask.clone());
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Default timeout as a duration.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.execution.default_timeout_secs.map(Duration::from_secs)
    }

    /// Grace periods for the local transport.
    pub fn grace(&self) -> GracePeriods {
        GracePeriods {
            drain: Duration::from_millis(self.execution.drain_grace_ms),
            kill: Duration::from_millis(self.execution.kill_grace_ms),
        }
    }

    /// Build a local executor from this configuration.
    pub fn build_executor(&self) -> Result<Executor<LocalTransport>, ConfigError> {
        let transport = LocalTransport::new().with_grace(self.grace());
        let mut executor =
            Executor::with_transport(transport).default_timeout(self.default_timeout());

        if let Some(ref pattern) = self.execution.log_mask_re {
            let rule = MaskRule::new(pattern).map_err(ConfigError::InvalidMask)?;
            executor = executor.mask_rule(rule);
        }

        Ok(executor)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Masking rule does not compile.
    InvalidMask(crate::ExecError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidMask(e) => write!(f, "invalid log_mask_re: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
