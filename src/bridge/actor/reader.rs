//! Reader task for the agent's stdout.
//!
//! The Reader Task:
//! - Runs in a spawned tokio task
//! - Reassembles newline-delimited lines from raw pipe chunks
//! - Decodes each line and hands it to the MessageRouter
//! - Drops lines it cannot decode, with a warning
//! - Stops on EOF, read error, or cancellation
//!
//! The reader never fails waiters itself. A closed stdout means the process
//! is going away; the termination watcher classifies that and closes the
//! router once the reader has drained.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::super::protocol::{DecodeError, LineBuffer, decode_line};
use super::{Delivery, MessageRouter};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Handle to a running Reader Task.
///
/// Dropping the handle cancels the loop.
pub(crate) struct ReaderTaskHandle {
    join_handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl ReaderTaskHandle {
    /// Ask the loop to stop at its next await point.
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for the loop to reach EOF on its own, up to `grace`.
    ///
    /// After the grace period the loop is cancelled and awaited.
    pub(crate) async fn join_with_grace(mut self, grace: Duration) {
        let Some(mut join_handle) = self.join_handle.take() else {
            return;
        };
        if tokio::time::timeout(grace, &mut join_handle).await.is_err() {
            debug!(
                target: "agent_bridge::bridge::reader",
                "Reader still running after {:?}, cancelling",
                grace
            );
            self.cancel_token.cancel();
            let _ = join_handle.await;
        }
    }
}

impl Drop for ReaderTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a reader task that decodes `stdout` and routes each message.
pub(crate) fn spawn_reader_task<R>(stdout: R, router: Arc<MessageRouter>) -> ReaderTaskHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let cancel_token = CancellationToken::new();
    let token_clone = cancel_token.clone();

    let join_handle = tokio::spawn(reader_loop(stdout, router, token_clone));

    ReaderTaskHandle {
        join_handle: Some(join_handle),
        cancel_token,
    }
}

async fn reader_loop<R>(mut stdout: R, router: Arc<MessageRouter>, cancel_token: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(
                    target: "agent_bridge::bridge::reader",
                    "Reader task cancelled, shutting down"
                );
                break;
            }

            result = stdout.read(&mut chunk) => {
                match result {
                    Ok(0) => {
                        if !lines.remainder().is_empty() {
                            warn!(
                                target: "agent_bridge::bridge::reader",
                                "Dropping {} bytes of unterminated output at EOF",
                                lines.remainder().len()
                            );
                        }
                        debug!(
                            target: "agent_bridge::bridge::reader",
                            "Agent stdout closed"
                        );
                        break;
                    }
                    Ok(n) => {
                        for line in lines.push(&chunk[..n]) {
                            handle_line(&line, &router);
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "agent_bridge::bridge::reader",
                            "Reader error: {}, stopping",
                            e
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Decode a single line and route it.
fn handle_line(line: &[u8], router: &MessageRouter) {
    match decode_line(line) {
        Ok(message) => {
            let kind = message.kind();
            match router.deliver(message) {
                Delivery::AuthDropped => {}
                delivery => debug!(
                    target: "agent_bridge::bridge::reader",
                    "Routed {} ({:?})",
                    kind,
                    delivery
                ),
            }
        }
        Err(DecodeError::Empty) => {}
        Err(e) => {
            warn!(
                target: "agent_bridge::bridge::reader",
                "Dropping agent output line: {} ({})",
                e,
                String::from_utf8_lossy(line)
            );
        }
    }
}
