//! Termination watcher task.
//!
//! The watcher owns the `Child` and waits for it to exit. A natural exit
//! invokes the supervisor's termination callback with the generation the
//! watcher was spawned for. A kill request instead terminates the child
//! (SIGTERM, then SIGKILL after the grace period on Unix) and reaps it
//! without invoking the callback.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::classifier::ExitInfo;

/// Handle to the watcher task. Dropping it kills the child.
pub(crate) struct TerminationWatcher {
    kill_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl TerminationWatcher {
    pub(crate) fn spawn<F, Fut>(
        child: Child,
        generation: u64,
        grace: Duration,
        on_exit: F,
    ) -> Self
    where
        F: FnOnce(u64, ExitInfo) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let kill_token = CancellationToken::new();
        let join_handle = tokio::spawn(watch_child(
            child,
            generation,
            grace,
            kill_token.clone(),
            on_exit,
        ));
        Self {
            kill_token,
            join_handle: Some(join_handle),
        }
    }

    /// Kill the child and wait until it has been reaped.
    pub(crate) async fn terminate(mut self) {
        self.kill_token.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

impl Drop for TerminationWatcher {
    fn drop(&mut self) {
        self.kill_token.cancel();
    }
}

async fn watch_child<F, Fut>(
    mut child: Child,
    generation: u64,
    grace: Duration,
    kill_token: CancellationToken,
    on_exit: F,
) where
    F: FnOnce(u64, ExitInfo) -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        status = child.wait() => {
            let exit = match status {
                Ok(status) => ExitInfo::from_status(&status),
                Err(e) => {
                    warn!(
                        target: "agent_bridge::bridge::termination",
                        "Failed to wait for agent process: {}",
                        e
                    );
                    ExitInfo::unknown()
                }
            };
            debug!(
                target: "agent_bridge::bridge::termination",
                "Agent process (generation {}) exited: {}",
                generation,
                exit
            );
            on_exit(generation, exit).await;
        }
        _ = kill_token.cancelled() => {
            kill_with_escalation(&mut child, grace).await;
        }
    }
}

/// Terminate `child` and reap it.
///
/// Unix: SIGTERM, then SIGKILL if still alive after `grace`.
/// Other platforms: immediate kill.
async fn kill_with_escalation(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(
                    target: "agent_bridge::bridge::termination",
                    "Failed to send SIGTERM to {}: {}",
                    pid,
                    e
                );
            }
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                debug!(
                    target: "agent_bridge::bridge::termination",
                    "Agent process {} stopped after SIGTERM: {:?}",
                    pid,
                    status.map(|s| ExitInfo::from_status(&s))
                );
                return;
            }
            warn!(
                target: "agent_bridge::bridge::termination",
                "Agent process {} ignored SIGTERM for {:?}, sending SIGKILL",
                pid,
                grace
            );
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        debug!(
            target: "agent_bridge::bridge::termination",
            "Kill failed (already exited?): {}",
            e
        );
    }
    let _ = child.wait().await;
}
