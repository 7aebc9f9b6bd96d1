//! Background task for the agent's stderr.
//!
//! Every line is forwarded to the log. The watcher also keeps a short tail of
//! recent lines and remembers whether any line matched an out-of-memory
//! signature, so the termination path can classify the exit.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use super::super::classifier::OomClassifier;

const TAIL_LINES: usize = 20;

#[derive(Debug, Default)]
struct StderrState {
    tail: VecDeque<String>,
    oom_detected: bool,
}

/// What stderr showed before the process went away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StderrSummary {
    pub(crate) tail: Vec<String>,
    pub(crate) oom_detected: bool,
}

pub(crate) struct StderrWatcherHandle {
    join_handle: JoinHandle<()>,
    state: Arc<Mutex<StderrState>>,
}

impl StderrWatcherHandle {
    /// Let the task flush remaining output for up to `grace`, then snapshot.
    pub(crate) async fn finalize(self, grace: Duration) -> StderrSummary {
        let mut join_handle = self.join_handle;
        if tokio::time::timeout(grace, &mut join_handle).await.is_err() {
            debug!(
                target: "agent_bridge::bridge::stderr",
                "Stderr still open after {:?}, aborting watcher",
                grace
            );
            join_handle.abort();
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        StderrSummary {
            tail: state.tail.iter().cloned().collect(),
            oom_detected: state.oom_detected,
        }
    }

    pub(crate) fn abort(&self) {
        self.join_handle.abort();
    }
}

pub(crate) fn spawn_stderr_watcher<R>(
    stderr: R,
    classifier: Arc<OomClassifier>,
    pid: Option<u32>,
) -> StderrWatcherHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let state = Arc::new(Mutex::new(StderrState::default()));
    let join_handle = tokio::spawn(watch_stderr(stderr, classifier, Arc::clone(&state), pid));
    StderrWatcherHandle { join_handle, state }
}

async fn watch_stderr<R>(
    stderr: R,
    classifier: Arc<OomClassifier>,
    state: Arc<Mutex<StderrState>>,
    pid: Option<u32>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                warn!(target: "agent_bridge::bridge::stderr", "[agent {}] {}", pid, line);

                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                if classifier.matches_stderr(line) {
                    state.oom_detected = true;
                }
                if state.tail.len() == TAIL_LINES {
                    state.tail.pop_front();
                }
                state.tail.push_back(line.to_string());
            }
            Err(e) => {
                debug!(
                    target: "agent_bridge::bridge::stderr",
                    "Stderr read error: {}",
                    e
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn flags_out_of_memory_signature() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let handle = spawn_stderr_watcher(reader, Arc::new(OomClassifier::default()), Some(1));

        writer
            .write_all(b"<--- Last few GCs --->\nFATAL ERROR: JavaScript heap out of memory\n")
            .await
            .unwrap();
        drop(writer);

        let summary = handle.finalize(Duration::from_secs(5)).await;
        assert!(summary.oom_detected);
        assert_eq!(summary.tail.len(), 2);
    }

    #[tokio::test]
    async fn ordinary_output_is_not_flagged() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let handle = spawn_stderr_watcher(reader, Arc::new(OomClassifier::default()), None);

        writer.write_all(b"warning: something\r\n\n").await.unwrap();
        drop(writer);

        let summary = handle.finalize(Duration::from_secs(5)).await;
        assert!(!summary.oom_detected);
        assert_eq!(summary.tail, vec!["warning: something".to_string()]);
    }

    #[tokio::test]
    async fn tail_is_bounded() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let handle = spawn_stderr_watcher(reader, Arc::new(OomClassifier::default()), None);

        for i in 0..(TAIL_LINES + 5) {
            writer
                .write_all(format!("line {}\n", i).as_bytes())
                .await
                .unwrap();
        }
        drop(writer);

        let summary = handle.finalize(Duration::from_secs(5)).await;
        assert_eq!(summary.tail.len(), TAIL_LINES);
        assert_eq!(summary.tail[0], "line 5");
    }

    #[tokio::test]
    async fn finalize_gives_up_on_open_pipe() {
        let (_writer, reader) = tokio::io::duplex(64);
        let handle = spawn_stderr_watcher(reader, Arc::new(OomClassifier::default()), None);

        let summary = handle.finalize(Duration::from_millis(20)).await;
        assert_eq!(summary, StderrSummary::default());
    }
}
