//! Execution request building and representation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use super::result::OutputChunk;
use crate::error::ExecError;
use crate::masking::MaskRule;
use crate::Result;

/// How long an execution may run before it is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Use the executor's configured default.
    #[default]
    Default,
    /// Kill the process after the given duration.
    Limit(Duration),
    /// Wait for the process indefinitely.
    Unlimited,
}

impl TimeoutPolicy {
    /// Resolve against the executor default. `None` means no timeout.
    pub fn resolve(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Default => default,
            Self::Limit(duration) => Some(duration),
            Self::Unlimited => None,
        }
    }
}

impl From<Duration> for TimeoutPolicy {
    fn from(duration: Duration) -> Self {
        Self::Limit(duration)
    }
}

impl From<Option<Duration>> for TimeoutPolicy {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Self::Unlimited, Self::Limit)
    }
}

/// A command to be executed as a local process.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The command line to execute (through the platform shell).
    pub command: String,
    /// Payload written to the process stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    /// Capture stdout (otherwise it is discarded).
    pub open_stdout: bool,
    /// Capture stderr (otherwise it is discarded).
    pub open_stderr: bool,
    /// Log the command and its output at info instead of debug.
    pub verbose: bool,
    /// Per-call masking rule, applied after the executor's default rule.
    pub mask_rule: Option<MaskRule>,
    /// Maximum execution time.
    pub timeout: TimeoutPolicy,
    /// Working directory override (if any).
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set.
    pub env: HashMap<String, String>,
    /// Receives every output chunk as it is read.
    pub output_tx: Option<mpsc::Sender<OutputChunk>>,
}

impl ExecutionRequest {
    /// Create a new request with the given command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
            open_stdout: true,
            open_stderr: true,
            verbose: false,
            mask_rule: None,
            timeout: TimeoutPolicy::Default,
            working_dir: None,
            env: HashMap::new(),
            output_tx: None,
        }
    }

    /// Set the stdin payload.
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Set whether stdout is captured.
    pub fn open_stdout(mut self, open: bool) -> Self {
        self.open_stdout = open;
        self
    }

    /// Set whether stderr is captured.
    pub fn open_stderr(mut self, open: bool) -> Self {
        self.open_stderr = open;
        self
    }

    /// Set verbose logging.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the per-call masking rule.
    pub fn mask_rule(mut self, rule: MaskRule) -> Self {
        self.mask_rule = Some(rule);
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, timeout: impl Into<TimeoutPolicy>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Wait for the process without a time limit.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = TimeoutPolicy::Unlimited;
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Stream output chunks to the given channel while executing.
    pub fn stream_to(mut self, tx: mpsc::Sender<OutputChunk>) -> Self {
        self.output_tx = Some(tx);
        self
    }

    /// Check the request before launching anything.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(())
    }
}
