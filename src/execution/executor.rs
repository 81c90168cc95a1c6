//! Command execution facade.

use std::fmt;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::error;

use super::request::{ExecutionRequest, TimeoutPolicy};
use super::result::ExecResult;
use super::transport::{LocalTransport, Transport};
use crate::error::ExecError;
use crate::logging::verbose_event;
use crate::masking::{mask_command, MaskRule};
use crate::Result;

/// Default execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Exit codes accepted by [`CheckPolicy::default`].
const DEFAULT_EXPECTED: &[i32] = &[0];

/// What a checked execution expects from the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPolicy {
    /// Acceptable exit codes. Empty means `[0]`.
    pub expected: Vec<i32>,
    /// Return an error on mismatch (otherwise only log it).
    pub raise_on_err: bool,
    /// Extra text prepended to the mismatch message.
    pub error_info: Option<String>,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            expected: DEFAULT_EXPECTED.to_vec(),
            raise_on_err: true,
            error_info: None,
        }
    }
}

impl CheckPolicy {
    /// Create a policy expecting exit code 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the acceptable exit codes.
    pub fn expected(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.expected = codes.into_iter().collect();
        self
    }

    /// Set whether a mismatch is returned as an error.
    pub fn raise_on_err(mut self, raise: bool) -> Self {
        self.raise_on_err = raise;
        self
    }

    /// Set extra error context.
    pub fn error_info(mut self, info: impl Into<String>) -> Self {
        self.error_info = Some(info.into());
        self
    }

    fn expected_codes(&self) -> Vec<i32> {
        if self.expected.is_empty() {
            DEFAULT_EXPECTED.to_vec()
        } else {
            self.expected.clone()
        }
    }

    fn prefix(&self) -> String {
        self.error_info
            .as_deref()
            .map(|info| format!("{}\n", info))
            .unwrap_or_default()
    }
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "None".to_string(), |c| c.to_string())
}

/// Runs commands one at a time.
///
/// Every execution holds the executor's lock from launch until the result
/// is final, so a single executor never has two commands in flight. Use
/// separate executors for parallel work, and share one through an `Arc`
/// where exclusivity is wanted.
pub struct Executor<T: Transport = LocalTransport> {
    transport: T,
    mask_rule: Option<MaskRule>,
    default_timeout: Option<Duration>,
    lock: Mutex<()>,
}

impl Executor<LocalTransport> {
    /// Create an executor running local processes.
    pub fn new() -> Self {
        Self::with_transport(LocalTransport::new())
    }
}

impl Default for Executor<LocalTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Executor<T> {
    /// Create an executor over the given transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            mask_rule: None,
            default_timeout: Some(DEFAULT_TIMEOUT),
            lock: Mutex::new(()),
        }
    }

    /// Set the masking rule applied to every logged command.
    pub fn mask_rule(mut self, rule: MaskRule) -> Self {
        self.mask_rule = Some(rule);
        self
    }

    /// Set the timeout used by requests with [`TimeoutPolicy::Default`].
    /// `None` disables it.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The executor-wide masking rule.
    pub fn default_mask_rule(&self) -> Option<&MaskRule> {
        self.mask_rule.as_ref()
    }

    /// The configured default timeout.
    pub fn configured_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Loggable form of `command` under this executor's rule and `call_rule`.
    pub fn mask_command(&self, command: &str, call_rule: Option<&MaskRule>) -> String {
        mask_command(command, self.mask_rule.as_ref(), call_rule)
    }

    /// Acquire exclusive use of the executor.
    ///
    /// Operations on the returned guard do not lock again, so several
    /// commands can be chained without another caller slipping in between.
    pub async fn lock(&self) -> ExecutorGuard<'_, T> {
        ExecutorGuard {
            executor: self,
            _guard: self.lock.lock().await,
        }
    }

    /// Launch a command without waiting for it.
    ///
    /// This does not take the executor lock; the caller owns the handle.
    pub async fn execute_async(&self, request: &ExecutionRequest) -> Result<T::Handle> {
        request.validate()?;
        let cmd_for_log = self.mask_command(&request.command, request.mask_rule.as_ref());
        self.transport.launch(request, &cmd_for_log).await
    }

    /// Execute a command and wait for its exit code.
    pub async fn execute(
        &self,
        command: &str,
        verbose: bool,
        timeout: impl Into<TimeoutPolicy>,
    ) -> Result<ExecResult> {
        self.lock().await.execute(command, verbose, timeout).await
    }

    /// Execute a fully specified request and wait for its exit code.
    pub async fn execute_request(&self, request: &ExecutionRequest) -> Result<ExecResult> {
        self.lock().await.execute_request(request).await
    }

    /// Execute and check the exit code against `policy`.
    pub async fn check_call(
        &self,
        request: &ExecutionRequest,
        policy: &CheckPolicy,
    ) -> Result<ExecResult> {
        self.lock().await.check_call(request, policy).await
    }

    /// Execute, check the exit code and require empty stderr.
    pub async fn check_stderr(
        &self,
        request: &ExecutionRequest,
        policy: &CheckPolicy,
    ) -> Result<ExecResult> {
        self.lock().await.check_stderr(request, policy).await
    }
}

impl<T: Transport + fmt::Debug> fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("transport", &self.transport)
            .field("mask_rule", &self.mask_rule)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to an [`Executor`]; released on drop.
pub struct ExecutorGuard<'a, T: Transport = LocalTransport> {
    executor: &'a Executor<T>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, T: Transport> ExecutorGuard<'a, T> {
    /// Launch a command without waiting for it.
    pub async fn execute_async(&self, request: &ExecutionRequest) -> Result<T::Handle> {
        self.executor.execute_async(request).await
    }

    /// Execute a command and wait for its exit code.
    pub async fn execute(
        &self,
        command: &str,
        verbose: bool,
        timeout: impl Into<TimeoutPolicy>,
    ) -> Result<ExecResult> {
        let request = ExecutionRequest::new(command)
            .verbose(verbose)
            .timeout(timeout);
        self.execute_request(&request).await
    }

    /// Execute a fully specified request and wait for its exit code.
    ///
    /// Emits one summary line with the masked command and exit code,
    /// whether the command finished or timed out.
    pub async fn execute_request(&self, request: &ExecutionRequest) -> Result<ExecResult> {
        request.validate()?;
        let executor = self.executor;
        let cmd_for_log = executor.mask_command(&request.command, request.mask_rule.as_ref());
        let timeout = request.timeout.resolve(executor.default_timeout);

        let handle = executor.transport.launch(request, &cmd_for_log).await?;
        let outcome = executor
            .transport
            .wait_and_reconcile(handle, request, timeout)
            .await;

        let exit_code = match &outcome {
            Ok(result) => result.exit_code(),
            Err(e) => e.result().and_then(ExecResult::exit_code),
        };
        verbose_event!(
            request.verbose,
            "Command {:?} exit code: {}",
            cmd_for_log,
            display_code(exit_code)
        );

        outcome
    }

    /// Execute and check the exit code against `policy`.
    pub async fn check_call(
        &self,
        request: &ExecutionRequest,
        policy: &CheckPolicy,
    ) -> Result<ExecResult> {
        let expected = policy.expected_codes();
        let result = self.execute_request(request).await?;

        let matches = result
            .exit_code()
            .is_some_and(|code| expected.contains(&code));
        if matches {
            return Ok(result);
        }

        let message = format!(
            "{}Command {:?} returned exit code {} while expected {:?}",
            policy.prefix(),
            result.cmd(),
            display_code(result.exit_code()),
            expected
        );
        error!("{}", message);

        if policy.raise_on_err {
            return Err(ExecError::CalledProcess {
                result: Box::new(result),
                expected,
                message,
            });
        }
        Ok(result)
    }

    /// Execute, check the exit code and require empty stderr.
    pub async fn check_stderr(
        &self,
        request: &ExecutionRequest,
        policy: &CheckPolicy,
    ) -> Result<ExecResult> {
        let result = self.check_call(request, policy).await?;
        if result.stderr().is_empty() {
            return Ok(result);
        }

        let message = format!(
            "{}Command {:?} STDERR while not expected\n\texit code: {}",
            policy.prefix(),
            result.cmd(),
            display_code(result.exit_code())
        );
        error!("{}", message);

        if policy.raise_on_err {
            return Err(ExecError::CalledProcess {
                result: Box::new(result),
                expected: policy.expected_codes(),
                message,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_new() {
        let executor = Executor::new();
        assert_eq!(executor.configured_timeout(), Some(DEFAULT_TIMEOUT));
        assert!(executor.default_mask_rule().is_none());
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(3600));
    }

    #[test]
    fn test_check_policy_defaults() {
        let policy = CheckPolicy::default();
        assert_eq!(policy.expected, vec![0]);
        assert!(policy.raise_on_err);
        assert_eq!(policy.prefix(), "");

        let policy = CheckPolicy::new().expected(Vec::new()).error_info("context");
        assert_eq!(policy.expected_codes(), vec![0]);
        assert_eq!(policy.prefix(), "context\n");
    }

    #[test]
    fn test_mask_command_uses_both_rules() {
        let executor = Executor::new().mask_rule(MaskRule::new(r"-u (\S+)").unwrap());
        let call_rule = MaskRule::new(r"-p (\S+)").unwrap();
        assert_eq!(
            executor.mask_command("db -u admin -p secret", Some(&call_rule)),
            "db -u <*masked*> -p <*masked*>"
        );
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let executor = Executor::new();
        let err = executor
            .execute("   ", false, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));

        // The lock was released on the error path.
        let _guard = executor.lock().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_guard_chains_without_deadlock() {
        let executor = Executor::new();
        let guard = executor.lock().await;

        let first = guard
            .execute("echo one", false, Duration::from_secs(5))
            .await
            .unwrap();
        let second = guard
            .check_call(&ExecutionRequest::new("echo two"), &CheckPolicy::default())
            .await
            .unwrap();

        assert_eq!(first.stdout_str(), "one");
        assert_eq!(second.stdout_str(), "two");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_call_mismatch() {
        let executor = Executor::new();
        let err = executor
            .check_call(
                &ExecutionRequest::new("exit 2"),
                &CheckPolicy::new().error_info("while testing"),
            )
            .await
            .unwrap_err();

        match err {
            ExecError::CalledProcess {
                result,
                expected,
                message,
            } => {
                assert_eq!(result.exit_code(), Some(2));
                assert_eq!(expected, vec![0]);
                assert!(message.starts_with("while testing\n"));
                assert!(message.contains("returned exit code 2"));
            }
            other => panic!("expected CalledProcess, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_call_expected_codes_and_no_raise() {
        let executor = Executor::new();

        let result = executor
            .check_call(
                &ExecutionRequest::new("exit 2"),
                &CheckPolicy::new().expected([0, 2]),
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code(), Some(2));

        let result = executor
            .check_call(
                &ExecutionRequest::new("exit 5"),
                &CheckPolicy::new().raise_on_err(false),
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code(), Some(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_stderr() {
        let executor = Executor::new();

        let result = executor
            .check_stderr(&ExecutionRequest::new("echo clean"), &CheckPolicy::default())
            .await
            .unwrap();
        assert!(result.stderr().is_empty());

        let err = executor
            .check_stderr(
                &ExecutionRequest::new("echo noisy >&2"),
                &CheckPolicy::default(),
            )
            .await
            .unwrap_err();
        match err {
            ExecError::CalledProcess { result, message, .. } => {
                assert_eq!(result.stderr_str(), "noisy");
                assert!(message.contains("STDERR while not expected"));
            }
            other => panic!("expected CalledProcess, got {other:?}"),
        }
    }
}
