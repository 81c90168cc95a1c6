//! Error types for shell-exec.

use std::time::Duration;

use thiserror::Error;

use crate::execution::ExecResult;

/// Main error type for shell-exec operations.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Command was empty after trimming whitespace.
    #[error("command is empty")]
    EmptyCommand,

    /// Masking rule failed to compile.
    #[error("invalid mask rule: {0}")]
    InvalidMaskRule(#[from] regex::Error),

    /// The process could not be started.
    #[error("failed to spawn {cmd:?}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while feeding or talking to the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The process did not exit within the timeout, even after a forced kill.
    #[error("wait for {:?} during {}s: no return code!\n{}", .result.cmd(), format_timeout(.timeout), .result)]
    Timeout {
        result: Box<ExecResult>,
        timeout: Option<Duration>,
    },

    /// Writing the stdin payload failed for a reason other than a closed pipe.
    #[error("failed to send stdin to {:?}: {source}", .result.cmd())]
    Stdin {
        result: Box<ExecResult>,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process failed.
    #[error("failed to wait for {:?}: {source}", .result.cmd())]
    Wait {
        result: Box<ExecResult>,
        #[source]
        source: std::io::Error,
    },

    /// Forced termination failed for a reason other than the process being gone.
    #[error("failed to kill {:?}: {source}", .result.cmd())]
    Kill {
        result: Box<ExecResult>,
        #[source]
        source: std::io::Error,
    },

    /// The command finished with an unexpected exit code or unexpected stderr.
    #[error("{message}")]
    CalledProcess {
        result: Box<ExecResult>,
        expected: Vec<i32>,
        message: String,
    },

    /// An exit code was already recorded and a different one was offered.
    #[error("exit code already received: {current}, refusing {new}")]
    ExitCodeAlreadySet { current: i32, new: i32 },

    /// Output was appended after the exit code was recorded.
    #[error("final exit code received, result is read-only")]
    ResultFinalized,

    /// Captured stdout is not valid in the requested format.
    #[error("{cmd:?} stdout is not valid {format}: {reason}")]
    Deserialize {
        cmd: String,
        format: &'static str,
        reason: String,
    },
}

impl ExecError {
    /// The (possibly partial) result attached to this error, if any.
    pub fn result(&self) -> Option<&ExecResult> {
        match self {
            Self::Timeout { result, .. }
            | Self::Stdin { result, .. }
            | Self::Wait { result, .. }
            | Self::Kill { result, .. }
            | Self::CalledProcess { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Whether this is a timeout failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn format_timeout(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("{}", t.as_secs_f64()),
        None => "unlimited".to_string(),
    }
}

/// Convenience Result type for shell-exec operations.
pub type Result<T> = std::result::Result<T, ExecError>;
