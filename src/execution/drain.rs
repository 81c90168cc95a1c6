//! Concurrent draining of process output streams.
//!
//! Each opened stream gets its own tokio task that reads line by line until
//! end-of-stream and appends every chunk to the shared [`ResultSink`]. The
//! tasks run alongside the wait for process exit and are joined (or
//! aborted) by the wait/terminate logic.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::result::{OutputChunk, OutputSource, ResultSink};
use crate::logging::verbose_event;

/// Reads one output stream into the result sink.
pub struct StreamDrainer<R> {
    reader: R,
    source: OutputSource,
    sink: ResultSink,
    verbose: bool,
    output_tx: Option<mpsc::Sender<OutputChunk>>,
}

impl<R: AsyncRead + Unpin + Send + 'static> StreamDrainer<R> {
    /// Create a drainer for one stream.
    pub fn new(reader: R, source: OutputSource, sink: ResultSink) -> Self {
        Self {
            reader,
            source,
            sink,
            verbose: false,
            output_tx: None,
        }
    }

    /// Log every chunk at info instead of debug.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Also forward every chunk to a channel.
    pub fn output_channel(mut self, tx: Option<mpsc::Sender<OutputChunk>>) -> Self {
        self.output_tx = tx;
        self
    }

    /// Read until end-of-stream.
    ///
    /// Returns when:
    /// - The pipe is closed (read returns 0)
    /// - A read error occurs
    /// - The sink refuses more data (result already finalized)
    pub async fn run(self) {
        let source = self.source;
        let mut output_tx = self.output_tx;
        let mut reader = BufReader::new(self.reader);

        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    debug!(stream = %source, "drainer: EOF");
                    break;
                }
                Ok(n) => {
                    trace!(stream = %source, "drainer: read {} bytes", n);
                    verbose_event!(
                        self.verbose,
                        stream = %source,
                        "{}",
                        String::from_utf8_lossy(&line).trim_end()
                    );

                    if let Some(tx) = &output_tx {
                        if tx.send(OutputChunk::new(line.clone(), source)).await.is_err() {
                            debug!(stream = %source, "drainer: output channel closed");
                            output_tx = None;
                        }
                    }

                    if let Err(e) = self.sink.append(source, line) {
                        debug!(stream = %source, error = %e, "drainer: result closed");
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream = %source, error = %e, "drainer: read failed");
                    break;
                }
            }
        }
    }

    /// Run the drainer as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// The set of drainer tasks belonging to one execution.
///
/// Remaining tasks are aborted on drop.
#[derive(Debug, Default)]
pub struct Drainers {
    handles: Vec<JoinHandle<()>>,
}

impl Drainers {
    /// Start one drainer per present stream.
    pub fn spawn<O, E>(
        stdout: Option<O>,
        stderr: Option<E>,
        sink: &ResultSink,
        verbose: bool,
        output_tx: Option<mpsc::Sender<OutputChunk>>,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let mut handles = Vec::with_capacity(2);

        if let Some(stdout) = stdout {
            handles.push(
                StreamDrainer::new(stdout, OutputSource::Stdout, sink.clone())
                    .verbose(verbose)
                    .output_channel(output_tx.clone())
                    .spawn(),
            );
        }
        if let Some(stderr) = stderr {
            handles.push(
                StreamDrainer::new(stderr, OutputSource::Stderr, sink.clone())
                    .verbose(verbose)
                    .output_channel(output_tx)
                    .spawn(),
            );
        }

        Self { handles }
    }

    /// Number of drainers not yet joined.
    pub fn pending(&self) -> usize {
        self.handles.len()
    }

    /// Wait up to `grace` for all drainers to finish.
    ///
    /// Returns `true` if every drainer finished in time. Task failures are
    /// swallowed.
    pub async fn join(&mut self, grace: Duration) -> bool {
        let handles = &mut self.handles;
        let wait_all = async {
            while let Some(handle) = handles.first_mut() {
                if let Err(e) = handle.await {
                    debug!(error = %e, "drainer task ended abnormally");
                }
                handles.remove(0);
            }
        };
        tokio::time::timeout(grace, wait_all).await.is_ok()
    }

    /// Cancel all remaining drainers. Safe to call repeatedly.
    pub fn abort(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Drainers {
    fn drop(&mut self) {
        self.abort();
    }
}
