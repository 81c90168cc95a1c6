//! Local process launching.

use std::io;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::request::ExecutionRequest;
use crate::error::ExecError;
use crate::logging::verbose_event;
use crate::Result;

/// A launched local process and its output endpoints.
///
/// Streams are present only if they were requested open.
#[derive(Debug)]
pub struct ExecutionHandle {
    /// The running process.
    pub child: Child,
    /// Process ID (absent if the process was already reaped).
    pub pid: Option<u32>,
    /// Readable stdout pipe.
    pub stdout: Option<ChildStdout>,
    /// Readable stderr pipe.
    pub stderr: Option<ChildStderr>,
    /// Masked command line for display.
    pub cmd: String,
    /// Stdin payload that is being sent, if any.
    pub stdin: Option<Vec<u8>>,
    /// Task writing the stdin payload and closing the pipe.
    pub stdin_feeder: Option<JoinHandle<io::Result<()>>>,
}

/// Build the platform shell invocation for a command line.
fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    }
}

/// Whether a write error means the child already closed its stdin.
pub(crate) fn is_closed_pipe(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::BrokenPipe {
        return true;
    }

    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return matches!(code, libc::EPIPE | libc::ESHUTDOWN | libc::EINVAL);
    }

    // Windows reports a closed pipe on write as EINVAL.
    #[cfg(windows)]
    if err.kind() == io::ErrorKind::InvalidInput {
        return true;
    }

    false
}

/// Spawn the request's command and start feeding its stdin payload.
///
/// Stdin is always piped. With a payload, a feeder task writes it and closes
/// the pipe while output is drained; without one the pipe stays open inside
/// the returned child.
pub async fn launch(request: &ExecutionRequest, cmd_for_log: &str) -> Result<ExecutionHandle> {
    verbose_event!(request.verbose, cmd = %cmd_for_log, "Executing command");

    let mut cmd = shell_command(&request.command);
    cmd.stdin(Stdio::piped())
        .stdout(if request.open_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(if request.open_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .envs(&request.env)
        .kill_on_drop(true);

    if let Some(dir) = &request.working_dir {
        cmd.current_dir(dir);
    }

    // The shell leads its own process group so a timeout kill reaches the
    // commands it forked.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        cmd: cmd_for_log.to_string(),
        source,
    })?;
    let pid = child.id();
    debug!(cmd = %cmd_for_log, pid, "process spawned");

    let stdin_feeder = match (&request.stdin, child.stdin.take()) {
        (Some(payload), Some(stdin)) => Some(tokio::spawn(feed_stdin(stdin, payload.clone()))),
        (None, stdin) => {
            child.stdin = stdin;
            None
        }
        (Some(_), None) => None,
    };

    Ok(ExecutionHandle {
        pid,
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
        cmd: cmd_for_log.to_string(),
        stdin: request.stdin.clone(),
        stdin_feeder,
    })
}

/// Write the payload and close stdin.
///
/// A child that closed its end is tolerated. Any other failure is returned;
/// the caller is expected to kill the child.
async fn feed_stdin(mut stdin: ChildStdin, payload: Vec<u8>) -> io::Result<()> {
    if let Err(e) = stdin.write_all(&payload).await {
        if !is_closed_pipe(&e) {
            error!(error = %e, "STDIN send failed");
            return Err(e);
        }
        warn!(error = %e, "STDIN send failed: closed pipe");
    }

    if let Err(e) = stdin.flush().await {
        if !is_closed_pipe(&e) {
            error!(error = %e, "STDIN close failed");
            return Err(e);
        }
    }

    // Dropping the handle closes the pipe; the child observes end-of-input.
    drop(stdin);
    Ok(())
}
