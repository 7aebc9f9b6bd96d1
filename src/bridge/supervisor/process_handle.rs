//! Everything attached to one live agent process.

use std::io;
use std::time::Duration;

use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

use super::termination::TerminationWatcher;
use crate::bridge::actor::{ReaderTaskHandle, StderrSummary, StderrWatcherHandle};

/// Pipes and tasks of one spawned process.
///
/// Owned exclusively by the supervisor's process slot. Whichever path takes
/// it out of the slot (stop, failed startup, termination) tears it down.
pub(crate) struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    reader: Option<ReaderTaskHandle>,
    stderr: Option<StderrWatcherHandle>,
    watcher: Option<TerminationWatcher>,
}

impl ProcessHandle {
    pub(crate) fn new(
        pid: Option<u32>,
        stdin: ChildStdin,
        reader: ReaderTaskHandle,
        stderr: StderrWatcherHandle,
        watcher: TerminationWatcher,
    ) -> Self {
        Self {
            pid,
            stdin: Some(stdin),
            reader: Some(reader),
            stderr: Some(stderr),
            watcher: Some(watcher),
        }
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one encoded line and flush it.
    pub(crate) async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Tear down after the process exited on its own.
    ///
    /// Lets the reader reach EOF and stderr flush, each bounded by `grace`,
    /// so messages and OOM lines written just before exit are not lost.
    pub(crate) async fn release(mut self, grace: Duration) -> StderrSummary {
        self.stdin = None;
        if let Some(reader) = self.reader.take() {
            reader.join_with_grace(grace).await;
        }
        let summary = match self.stderr.take() {
            Some(stderr) => stderr.finalize(grace).await,
            None => StderrSummary::default(),
        };
        // The watcher task is the caller and already past its kill branch,
        // so dropping the handle only detaches it.
        self.watcher = None;
        summary
    }

    /// Tear down a live process.
    ///
    /// Cancels the reader, writes `farewell` best-effort, closes stdin, then
    /// kills and reaps the child.
    pub(crate) async fn shutdown(mut self, farewell: Option<&str>, grace: Duration) {
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }

        if let Some(line) = farewell {
            match tokio::time::timeout(grace, self.write_line(line)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(
                    target: "agent_bridge::bridge::supervisor",
                    "Could not deliver stop command: {}",
                    e
                ),
                Err(_) => debug!(
                    target: "agent_bridge::bridge::supervisor",
                    "Timed out delivering stop command"
                ),
            }
        }
        self.stdin = None;

        if let Some(watcher) = self.watcher.take() {
            watcher.terminate().await;
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}
