//! Execution result types.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::de::DeserializeOwned;

use crate::error::ExecError;
use crate::Result;

/// Maximum number of chunks shown in full by the brief output.
const BRIEF_MAX_CHUNKS: usize = 7;

/// Chunks kept from each end when the brief output is shortened.
const BRIEF_EDGE_CHUNKS: usize = 3;

/// Result of command execution.
///
/// Output is kept as the sequence of chunks (normally lines) in the order
/// they were read. The exit code is the terminal marker: once it is set the
/// result is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    cmd: String,
    stdin: Option<String>,
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    exit_code: Option<i32>,
    timestamp: Option<SystemTime>,
}

impl ExecResult {
    /// Create an empty result for the given (already masked) command.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    /// Attach the stdin payload that was sent, for display.
    pub fn with_stdin(mut self, stdin: &[u8]) -> Self {
        self.stdin = Some(String::from_utf8_lossy(stdin).trim().to_string());
        self
    }

    /// Command as shown in logs.
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Stdin payload, if any was sent.
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Raw stdout chunks.
    pub fn stdout(&self) -> &[Vec<u8>] {
        &self.stdout
    }

    /// Raw stderr chunks.
    pub fn stderr(&self) -> &[Vec<u8>] {
        &self.stderr
    }

    /// Exit code, if the process is known to have finished.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Time at which the exit code was recorded.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Whether the exit code has been recorded.
    pub fn is_finalized(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Check if command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Append a stdout chunk.
    pub fn append_stdout(&mut self, chunk: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.stdout.push(chunk);
        Ok(())
    }

    /// Append a stderr chunk.
    pub fn append_stderr(&mut self, chunk: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.stderr.push(chunk);
        Ok(())
    }

    /// Append a chunk to the given stream.
    pub fn append(&mut self, source: OutputSource, chunk: Vec<u8>) -> Result<()> {
        match source {
            OutputSource::Stdout => self.append_stdout(chunk),
            OutputSource::Stderr => self.append_stderr(chunk),
        }
    }

    /// Record the exit code.
    ///
    /// Setting the same code again is a no-op; a different code is an error.
    pub fn set_exit_code(&mut self, code: i32) -> Result<()> {
        match self.exit_code {
            Some(current) if current == code => Ok(()),
            Some(current) => Err(ExecError::ExitCodeAlreadySet { current, new: code }),
            None => {
                self.exit_code = Some(code);
                self.timestamp = Some(SystemTime::now());
                Ok(())
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_finalized() {
            return Err(ExecError::ResultFinalized);
        }
        Ok(())
    }

    /// Stdout as a single byte buffer.
    pub fn stdout_bin(&self) -> Vec<u8> {
        self.stdout.concat()
    }

    /// Stderr as a single byte buffer.
    pub fn stderr_bin(&self) -> Vec<u8> {
        self.stderr.concat()
    }

    /// Stdout decoded as UTF-8 (lossy), surrounding whitespace trimmed.
    pub fn stdout_str(&self) -> String {
        decode_trimmed(&self.stdout_bin())
    }

    /// Stderr decoded as UTF-8 (lossy), surrounding whitespace trimmed.
    pub fn stderr_str(&self) -> String {
        decode_trimmed(&self.stderr_bin())
    }

    /// Shortened stdout for error messages: first and last lines only.
    pub fn stdout_brief(&self) -> String {
        brief(&self.stdout)
    }

    /// Shortened stderr for error messages: first and last lines only.
    pub fn stderr_brief(&self) -> String {
        brief(&self.stderr)
    }

    /// Stdout lines.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout_str().lines().map(str::to_string).collect()
    }

    /// Parse stdout as JSON.
    pub fn stdout_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.stdout_str()).map_err(|e| self.deserialize_error("JSON", e))
    }

    /// Parse stdout as YAML.
    pub fn stdout_yaml<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_str(&self.stdout_str()).map_err(|e| self.deserialize_error("YAML", e))
    }

    fn deserialize_error(&self, format: &'static str, err: impl fmt::Display) -> ExecError {
        tracing::error!(
            cmd = %self.cmd,
            format,
            stdout = %self.stdout_str(),
            "stdout deserialization failed"
        );
        ExecError::Deserialize {
            cmd: self.cmd.clone(),
            format,
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exit_code = match self.exit_code {
            Some(code) => code.to_string(),
            None => "None".to_string(),
        };
        write!(
            f,
            "ExecResult(\n\tcmd={:?},\n\tstdout=\n'{}',\n\tstderr=\n'{}',\n\texit_code={}\n)",
            self.cmd,
            self.stdout_brief(),
            self.stderr_brief(),
            exit_code
        )
    }
}

fn decode_trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn brief(chunks: &[Vec<u8>]) -> String {
    if chunks.len() <= BRIEF_MAX_CHUNKS {
        return decode_trimmed(&chunks.concat());
    }

    let mut joined = chunks[..BRIEF_EDGE_CHUNKS].concat();
    joined.extend_from_slice(b"...\n");
    joined.extend(chunks[chunks.len() - BRIEF_EDGE_CHUNKS..].concat());
    decode_trimmed(&joined)
}

/// Source of output data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Streaming output chunk from execution.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Raw bytes.
    pub raw: Vec<u8>,
    /// Decoded text (best effort).
    pub text: String,
    /// Stream source.
    pub source: OutputSource,
}

impl OutputChunk {
    /// Create a new output chunk.
    pub fn new(raw: Vec<u8>, source: OutputSource) -> Self {
        let text = String::from_utf8_lossy(&raw).into_owned();
        Self { raw, text, source }
    }

    /// Create a stdout chunk.
    pub fn stdout(raw: Vec<u8>) -> Self {
        Self::new(raw, OutputSource::Stdout)
    }

    /// Create a stderr chunk.
    pub fn stderr(raw: Vec<u8>) -> Self {
        Self::new(raw, OutputSource::Stderr)
    }
}

/// Shared, thread-safe handle to the result of one execution.
///
/// The two drainer tasks and the wait/terminate logic each hold a clone.
/// Each stream has exactly one writer.
#[derive(Debug, Clone)]
pub struct ResultSink {
    inner: Arc<Mutex<ExecResult>>,
}

impl ResultSink {
    /// Wrap a fresh result.
    pub fn new(result: ExecResult) -> Self {
        Self {
            inner: Arc::new(Mutex::new(result)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecResult> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk to the given stream.
    pub fn append(&self, source: OutputSource, chunk: Vec<u8>) -> Result<()> {
        self.lock().append(source, chunk)
    }

    /// Record the exit code.
    pub fn set_exit_code(&self, code: i32) -> Result<()> {
        self.lock().set_exit_code(code)
    }

    /// Command as shown in logs.
    pub fn cmd(&self) -> String {
        self.lock().cmd().to_string()
    }

    /// Current exit code.
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code()
    }

    /// Copy of the result as accumulated so far.
    pub fn snapshot(&self) -> ExecResult {
        self.lock().clone()
    }
}
