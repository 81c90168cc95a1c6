//! Transports that know how to run a command.
//!
//! The executor is generic over a [`Transport`]. Only the local process
//! transport exists today; a remote transport would provide its own handle
//! type and reproduce the same wait/terminate semantics over its channel.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::drain::Drainers;
use super::launcher::{self, ExecutionHandle};
use super::reconcile::{self, GracePeriods};
use super::request::ExecutionRequest;
use super::result::{ExecResult, ResultSink};
use crate::Result;

/// A way of launching commands and collecting their results.
pub trait Transport: Send + Sync {
    /// Live execution returned by [`Transport::launch`].
    type Handle: Send;

    /// Start the command described by `request`.
    ///
    /// `cmd_for_log` is the masked command line; it is the only form of the
    /// command that may be logged.
    fn launch(
        &self,
        request: &ExecutionRequest,
        cmd_for_log: &str,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Drain output, wait for completion within `timeout` (`None` = forever)
    /// and produce the final result.
    fn wait_and_reconcile(
        &self,
        handle: Self::Handle,
        request: &ExecutionRequest,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ExecResult>> + Send;
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport {
    grace: GracePeriods,
}

impl LocalTransport {
    /// Create a local transport with default grace periods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the grace periods.
    pub fn with_grace(mut self, grace: GracePeriods) -> Self {
        self.grace = grace;
        self
    }

    /// Current grace periods.
    pub fn grace(&self) -> GracePeriods {
        self.grace
    }
}

impl Transport for LocalTransport {
    type Handle = ExecutionHandle;

    async fn launch(
        &self,
        request: &ExecutionRequest,
        cmd_for_log: &str,
    ) -> Result<ExecutionHandle> {
        launcher::launch(request, cmd_for_log).await
    }

    async fn wait_and_reconcile(
        &self,
        handle: ExecutionHandle,
        request: &ExecutionRequest,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let ExecutionHandle {
            mut child,
            stdout,
            stderr,
            cmd,
            stdin,
            stdin_feeder,
            ..
        } = handle;

        let mut result = ExecResult::new(cmd);
        if let Some(payload) = &stdin {
            result = result.with_stdin(payload);
        }
        let sink = ResultSink::new(result);

        let drainers = Drainers::spawn(
            stdout,
            stderr,
            &sink,
            request.verbose,
            request.output_tx.clone(),
        );

        let pid = child.id();
        let reconciled = reconcile::reconcile_with_feeder(
            &mut child,
            drainers,
            &sink,
            timeout,
            self.grace,
            stdin_feeder,
        )
        .await?;
        debug!(pid, state = %reconciled.state, "execution reconciled");
        Ok(reconciled.result)
    }
}
