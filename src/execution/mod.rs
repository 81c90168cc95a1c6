//! Command execution engine.
//!
//! This module provides command execution capabilities:
//! - Launching local processes with optional stdin
//! - Concurrent capture of stdout and stderr
//! - Timeout handling with forced termination
//! - Exit-code and stderr checks
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_exec::execution::{CheckPolicy, ExecutionRequest, Executor};
//! use shell_exec::MaskRule;
//!
//! # async fn run() -> shell_exec::Result<()> {
//! let executor = Executor::new();
//!
//! // Simple execution
//! let result = executor.execute("echo hello", false, Duration::from_secs(5)).await?;
//! println!("Output: {}", result.stdout_str());
//!
//! // Request with options, password hidden from logs
//! let request = ExecutionRequest::new("mysql --password=secret -e 'select 1'")
//!     .mask_rule(MaskRule::new(r"--password=(\S+)")?)
//!     .timeout(Duration::from_secs(60));
//! executor.check_call(&request, &CheckPolicy::default()).await?;
//! # Ok(())
//! # }
//! ```

mod drain;
mod executor;
mod launcher;
mod reconcile;
mod request;
mod result;
mod transport;

pub use drain::{Drainers, StreamDrainer};
pub use executor::{CheckPolicy, Executor, ExecutorGuard, DEFAULT_TIMEOUT};
pub use launcher::{launch, ExecutionHandle};
pub use reconcile::{
    exit_code_of, ExecState, GracePeriods, DEFAULT_DRAIN_GRACE, DEFAULT_KILL_GRACE,
};
pub use request::{ExecutionRequest, TimeoutPolicy};
pub use result::{ExecResult, OutputChunk, OutputSource, ResultSink};
pub use transport::{LocalTransport, Transport};
