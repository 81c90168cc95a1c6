//! # shell-exec
//!
//! Run shell commands with bounded waits, captured output and masked logs.
//!
//! This crate launches a command as a child process, feeds it optional stdin,
//! drains stdout and stderr concurrently and reconciles the final exit code
//! with a timeout that ends in a forced kill. Commands are only ever logged
//! after masking, so secrets passed on the command line stay out of logs.
//!
//! ## Features
//!
//! - **Bounded waits**: every run either yields an exit code or a timeout
//!   error carrying the partial output
//! - **Concurrent draining**: stdout and stderr are read in parallel so a
//!   chatty child never blocks on a full pipe
//! - **Masking**: capture groups of a regex are replaced before logging
//! - **Serialized runs**: one executor runs one command at a time
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_exec::{CheckPolicy, ExecutionRequest, Executor, MaskRule};
//!
//! #[tokio::main]
//! async fn main() -> shell_exec::Result<()> {
//!     shell_exec::logging::try_init().ok();
//!
//!     let executor = Executor::new().mask_rule(MaskRule::new(r"--token=(\S+)")?);
//!
//!     let result = executor.execute("uname -a", false, Duration::from_secs(5)).await?;
//!     println!("{}", result.stdout_str());
//!
//!     let request = ExecutionRequest::new("deploy --token=abc").verbose(true);
//!     executor.check_call(&request, &CheckPolicy::default()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod masking;

// Re-export commonly used types
pub use error::{ExecError, Result};
pub use execution::{
    CheckPolicy, ExecResult, ExecutionRequest, Executor, ExecutorGuard, LocalTransport,
    OutputChunk, OutputSource, TimeoutPolicy, Transport,
};
pub use masking::{mask_command, MaskRule, MASK_MARKER};
