//! Wait/terminate state machine.
//!
//! ```text
//! Running -> Exited
//!         -> TimedOut -> Exited            (exited right at the deadline)
//!                     -> Terminating -> ExitedAfterKill
//!                                    -> KillFailed
//!                                    -> (timeout error)
//! ```

use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::drain::Drainers;
use super::result::{ExecResult, ResultSink};
use crate::error::ExecError;
use crate::Result;

/// Default time given to drainers after a normal exit.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Default time given to the process and drainers after a forced kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// States of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Waiting for the process within the timeout.
    Running,
    /// Process exited on its own.
    Exited,
    /// Timeout elapsed without an exit code.
    TimedOut,
    /// Kill sent, waiting for the process to go away.
    Terminating,
    /// Kill raced with a natural exit; the exit code is valid.
    ExitedAfterKill,
    /// The kill itself failed.
    KillFailed,
}

impl ExecState {
    /// Whether this state produced a usable exit code.
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited | Self::ExitedAfterKill)
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Exited => "exited",
            Self::TimedOut => "timed out",
            Self::Terminating => "terminating",
            Self::ExitedAfterKill => "exited after kill",
            Self::KillFailed => "kill failed",
        };
        f.write_str(name)
    }
}

/// Grace windows used around process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriods {
    /// How long drainers may keep flushing after a normal exit.
    pub drain: Duration,
    /// How long to wait for the process (and drainers) after a kill.
    pub kill: Duration,
}

impl Default for GracePeriods {
    fn default() -> Self {
        Self {
            drain: DEFAULT_DRAIN_GRACE,
            kill: DEFAULT_KILL_GRACE,
        }
    }
}

/// Minimal process control needed by the state machine.
pub(crate) trait ProcessControl {
    /// Wait for exit and return the exit code.
    async fn wait(&mut self) -> io::Result<i32>;
    /// Return the exit code if the process has exited.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
    /// Send a forced kill without waiting.
    fn start_kill(&mut self) -> io::Result<()>;
    /// Process ID, for logging.
    fn id(&self) -> Option<u32>;
}

/// Exit code of a finished process.
///
/// On Unix a process killed by a signal reports `-signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

impl ProcessControl for Child {
    async fn wait(&mut self) -> io::Result<i32> {
        Child::wait(self).await.map(exit_code_of)
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Child::try_wait(self).map(|status| status.map(exit_code_of))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = Child::id(self) {
            // Best-effort kill of the whole process group; the leader's own
            // kill below decides success.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
        Child::start_kill(self)
    }

    fn id(&self) -> Option<u32> {
        Child::id(self)
    }
}

/// Run the state machine while a stdin feeder task is still writing.
///
/// A feeder that fails with anything but a closed pipe stops the drainers,
/// kills the process and surfaces as [`ExecError::Stdin`] carrying the
/// output captured so far. Otherwise the feeder is left to finish (or is
/// aborted once the process is done) and the state machine decides.
pub(crate) async fn reconcile_with_feeder<P: ProcessControl>(
    process: &mut P,
    drainers: Drainers,
    sink: &ResultSink,
    timeout: Option<Duration>,
    grace: GracePeriods,
    feeder: Option<JoinHandle<io::Result<()>>>,
) -> Result<Reconciled> {
    let Some(mut feeder) = feeder else {
        return wait_and_reconcile(process, drainers, sink, timeout, grace).await;
    };

    let mut reconcile = Box::pin(wait_and_reconcile(
        &mut *process,
        drainers,
        sink,
        timeout,
        grace,
    ));

    let fed = tokio::select! {
        reconciled = &mut reconcile => {
            feeder.abort();
            return reconciled;
        }
        fed = &mut feeder => fed,
    };

    let source = match fed {
        Ok(Err(e)) => e,
        Ok(Ok(())) => return reconcile.await,
        Err(e) => {
            debug!(error = %e, "stdin feeder ended abnormally");
            return reconcile.await;
        }
    };

    // Dropping the state machine aborts the drainers it owns.
    drop(reconcile);
    let pid = process.id();
    error!(cmd = %sink.cmd(), pid, error = %source, "stdin feed failed, killing process");
    if let Err(kill_err) = process.start_kill() {
        warn!(pid, error = %kill_err, "failed to kill process after stdin failure");
    }

    Err(ExecError::Stdin {
        result: Box::new(sink.snapshot()),
        source,
    })
}

/// Final result together with the state that produced it.
#[derive(Debug)]
pub(crate) struct Reconciled {
    pub result: ExecResult,
    pub state: ExecState,
}

fn transition(state: &mut ExecState, next: ExecState, pid: Option<u32>) {
    trace!(pid, from = %state, to = %next, "execution state change");
    *state = next;
}

/// Wait for the process, escalate on timeout and finalize the result.
///
/// `timeout` of `None` waits indefinitely.
pub(crate) async fn wait_and_reconcile<P: ProcessControl>(
    process: &mut P,
    mut drainers: Drainers,
    sink: &ResultSink,
    timeout: Option<Duration>,
    grace: GracePeriods,
) -> Result<Reconciled> {
    let pid = process.id();
    let mut state = ExecState::Running;

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, process.wait()).await.ok(),
        None => Some(process.wait().await),
    };

    let mut exit_code = match waited {
        Some(Ok(code)) => Some(code),
        Some(Err(e)) => {
            drainers.abort();
            return Err(ExecError::Wait {
                result: Box::new(sink.snapshot()),
                source: e,
            });
        }
        None => {
            transition(&mut state, ExecState::TimedOut, pid);
            // The process may have exited right at the deadline.
            process.try_wait().ok().flatten()
        }
    };

    if let Some(code) = exit_code {
        transition(&mut state, ExecState::Exited, pid);
        return finalize(drainers, sink, code, grace.drain, state).await;
    }

    transition(&mut state, ExecState::Terminating, pid);
    if let Err(kill_err) = process.start_kill() {
        exit_code = process.try_wait().ok().flatten();
        if let Some(code) = exit_code {
            warn!(
                cmd = %sink.cmd(),
                pid,
                "command completed just after timeout: please validate timeout"
            );
            transition(&mut state, ExecState::ExitedAfterKill, pid);
            return finalize(drainers, sink, code, grace.drain, state).await;
        }

        transition(&mut state, ExecState::KillFailed, pid);
        drainers.abort();
        return Err(ExecError::Kill {
            result: Box::new(sink.snapshot()),
            source: kill_err,
        });
    }

    // Reap the killed process and let the drainers flush in the same window.
    let (reaped, flushed) = tokio::join!(
        tokio::time::timeout(grace.kill, process.wait()),
        drainers.join(grace.kill)
    );
    if !flushed {
        debug!(pid, "drainers still running after kill grace, cancelling");
    }
    drainers.abort();

    match reaped {
        Ok(Ok(code)) => debug!(pid, code, "killed process reaped"),
        Ok(Err(e)) => debug!(pid, error = %e, "failed to reap killed process"),
        Err(_) => warn!(pid, "process did not exit after kill"),
    }

    let result = sink.snapshot();
    debug!(
        cmd = %result.cmd(),
        ?timeout,
        stdout = %result.stdout_brief(),
        stderr = %result.stderr_brief(),
        "wait for command: no return code"
    );
    Err(ExecError::Timeout {
        result: Box::new(result),
        timeout,
    })
}

async fn finalize(
    mut drainers: Drainers,
    sink: &ResultSink,
    code: i32,
    grace: Duration,
    state: ExecState,
) -> Result<Reconciled> {
    if !drainers.join(grace).await {
        debug!("drainers still running after exit grace, cancelling");
        drainers.abort();
    }
    sink.set_exit_code(code)?;
    Ok(Reconciled {
        result: sink.snapshot(),
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    use tokio::time::Instant;

    enum KillBehavior {
        Exits,
        Ignored,
        Fails(io::ErrorKind),
    }

    /// Scripted process for driving the state machine.
    struct FakeProcess {
        code: i32,
        exit_at: Option<Instant>,
        kill: KillBehavior,
        killed: bool,
        polls: VecDeque<Option<i32>>,
        kill_calls: usize,
    }

    impl FakeProcess {
        fn new(kill: KillBehavior) -> Self {
            Self {
                code: 0,
                exit_at: None,
                kill,
                killed: false,
                polls: VecDeque::new(),
                kill_calls: 0,
            }
        }

        fn exits_after(mut self, delay: Duration, code: i32) -> Self {
            self.exit_at = Some(Instant::now() + delay);
            self.code = code;
            self
        }

        fn polls(mut self, polls: impl IntoIterator<Item = Option<i32>>) -> Self {
            self.polls = polls.into_iter().collect();
            self
        }
    }

    impl ProcessControl for FakeProcess {
        async fn wait(&mut self) -> io::Result<i32> {
            loop {
                if self.killed {
                    return Ok(-9);
                }
                if let Some(at) = self.exit_at {
                    if Instant::now() >= at {
                        return Ok(self.code);
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            Ok(self.polls.pop_front().flatten())
        }

        fn start_kill(&mut self) -> io::Result<()> {
            self.kill_calls += 1;
            match self.kill {
                KillBehavior::Exits => {
                    self.killed = true;
                    Ok(())
                }
                KillBehavior::Ignored => Ok(()),
                KillBehavior::Fails(kind) => Err(io::Error::new(kind, "kill failed")),
            }
        }

        fn id(&self) -> Option<u32> {
            Some(4242)
        }
    }

    fn short_grace() -> GracePeriods {
        GracePeriods {
            drain: Duration::from_millis(100),
            kill: Duration::from_millis(100),
        }
    }

    fn sink_with_output() -> (ResultSink, Drainers) {
        let sink = ResultSink::new(ExecResult::new("fake"));
        let drainers = Drainers::spawn(
            Some(Cursor::new(b"partial\n".to_vec())),
            Some(Cursor::new(b"warning\n".to_vec())),
            &sink,
            false,
            None,
        );
        (sink, drainers)
    }

    #[tokio::test]
    async fn test_exit_within_budget() {
        let mut process =
            FakeProcess::new(KillBehavior::Exits).exits_after(Duration::from_millis(10), 7);
        let (sink, drainers) = sink_with_output();

        let outcome = wait_and_reconcile(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_secs(5)),
            short_grace(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.state, ExecState::Exited);
        assert_eq!(outcome.result.exit_code(), Some(7));
        assert_eq!(outcome.result.stdout_str(), "partial");
        assert_eq!(outcome.result.stderr_str(), "warning");
        assert_eq!(process.kill_calls, 0);
    }

    #[tokio::test]
    async fn test_unbounded_wait() {
        let mut process =
            FakeProcess::new(KillBehavior::Exits).exits_after(Duration::from_millis(20), 0);
        let sink = ResultSink::new(ExecResult::new("fake"));

        let outcome =
            wait_and_reconcile(&mut process, Drainers::default(), &sink, None, short_grace())
                .await
                .unwrap();

        assert!(outcome.result.success());
    }

    #[tokio::test]
    async fn test_exit_at_deadline_is_success() {
        // wait() never resolves in time, but the late poll sees the exit.
        let mut process = FakeProcess::new(KillBehavior::Exits).polls([Some(0)]);
        let (sink, drainers) = sink_with_output();

        let outcome = wait_and_reconcile(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_millis(20)),
            short_grace(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.state, ExecState::Exited);
        assert!(outcome.result.success());
        assert_eq!(process.kill_calls, 0);
    }

    #[tokio::test]
    async fn test_kill_races_natural_exit() {
        let mut process = FakeProcess::new(KillBehavior::Fails(io::ErrorKind::InvalidInput))
            .polls([None, Some(3)]);
        let (sink, drainers) = sink_with_output();

        let outcome = wait_and_reconcile(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_millis(20)),
            short_grace(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.state, ExecState::ExitedAfterKill);
        assert!(outcome.state.is_exited());
        assert_eq!(outcome.result.exit_code(), Some(3));
        assert_eq!(process.kill_calls, 1);
    }

    #[tokio::test]
    async fn test_kill_failure_propagates() {
        let mut process = FakeProcess::new(KillBehavior::Fails(io::ErrorKind::PermissionDenied));
        let (sink, drainers) = sink_with_output();

        let err = wait_and_reconcile(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_millis(20)),
            short_grace(),
        )
        .await
        .unwrap_err();

        match err {
            ExecError::Kill { result, source } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
                assert!(result.exit_code().is_none());
            }
            other => panic!("expected kill failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_after_kill_keeps_partial_output() {
        let mut process = FakeProcess::new(KillBehavior::Exits);
        let (sink, drainers) = sink_with_output();

        let err = wait_and_reconcile(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_millis(20)),
            short_grace(),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        let result = err.result().unwrap();
        assert!(result.exit_code().is_none());
        assert_eq!(result.stdout_str(), "partial");
        assert_eq!(process.kill_calls, 1);
    }

    #[tokio::test]
    async fn test_timeout_when_kill_is_ignored() {
        let mut process = FakeProcess::new(KillBehavior::Ignored);
        let sink = ResultSink::new(ExecResult::new("fake"));
        // A stream that never reaches EOF.
        let (_writer, reader) = tokio::io::duplex(64);
        let drainers = Drainers::spawn(Some(reader), None::<Cursor<Vec<u8>>>, &sink, false, None);

        let started = Instant::now();
        let err = wait_and_reconcile(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_millis(20)),
            short_grace(),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            ExecError::Timeout { timeout, .. } => {
                assert_eq!(timeout, Some(Duration::from_millis(20)))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_feeder_failure_kills_and_keeps_partial_output() {
        let mut process = FakeProcess::new(KillBehavior::Exits);
        let (sink, drainers) = sink_with_output();
        let feeder = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "write refused"))
        });

        let err = reconcile_with_feeder(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_secs(5)),
            short_grace(),
            Some(feeder),
        )
        .await
        .unwrap_err();

        match err {
            ExecError::Stdin { result, source } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
                assert_eq!(result.stdout_str(), "partial");
                assert!(result.exit_code().is_none());
            }
            other => panic!("expected stdin failure, got {other:?}"),
        }
        assert_eq!(process.kill_calls, 1);
    }

    #[tokio::test]
    async fn test_feeder_failure_with_failing_kill() {
        let mut process = FakeProcess::new(KillBehavior::Fails(io::ErrorKind::PermissionDenied));
        let sink = ResultSink::new(ExecResult::new("fake"));
        let feeder = tokio::spawn(async { Err(io::Error::other("disk on fire")) });

        let err = reconcile_with_feeder(
            &mut process,
            Drainers::default(),
            &sink,
            Some(Duration::from_secs(5)),
            short_grace(),
            Some(feeder),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExecError::Stdin { .. }));
        assert!(err.result().is_some());
        assert_eq!(process.kill_calls, 1);
    }

    #[tokio::test]
    async fn test_feeder_success_lets_process_finish() {
        let mut process =
            FakeProcess::new(KillBehavior::Exits).exits_after(Duration::from_millis(30), 0);
        let (sink, drainers) = sink_with_output();
        let feeder = tokio::spawn(async { Ok(()) });

        let outcome = reconcile_with_feeder(
            &mut process,
            drainers,
            &sink,
            Some(Duration::from_secs(5)),
            short_grace(),
            Some(feeder),
        )
        .await
        .unwrap();

        assert_eq!(outcome.state, ExecState::Exited);
        assert!(outcome.result.success());
        assert_eq!(process.kill_calls, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_of_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), -9);
        assert_eq!(exit_code_of(ExitStatus::from_raw(2 << 8)), 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ExecState::ExitedAfterKill.to_string(), "exited after kill");
        assert!(!ExecState::KillFailed.is_exited());
    }
}
