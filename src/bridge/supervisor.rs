//! Process supervisor and host-facing bridge API.
//!
//! `AgentBridge` keeps at most one agent process alive. Each `start()` bumps
//! the process generation; the termination watcher of a process carries the
//! generation it was spawned for, and its callback is ignored once a newer
//! process owns the slot.
//!
//! Locking: the process slot is a tokio mutex held while writing to stdin
//! and while the handle is swapped in or out. Router state has its own std
//! mutex and is never held across an await.

mod launch;
mod process_handle;
mod termination;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use tokio::sync::{Mutex, broadcast};

use self::launch::LaunchPlan;
use self::process_handle::ProcessHandle;
use self::termination::TerminationWatcher;
use super::actor::{MessageRouter, spawn_reader_task, spawn_stderr_watcher};
use super::auth::AuthEvent;
use super::classifier::{ExitInfo, OomClassifier};
use super::protocol::{InboundMessage, OutboundCommand, encode_line};
use super::query::{
    CommandSink, QueryContext, QueryEventSender, QueryOutcome, QueryRequest, ToolHandler,
    run_query,
};
use crate::config::{BridgeSettings, BridgeVariant};
use crate::error::{BridgeError, BridgeResult};

struct ProcessSlot {
    generation: u64,
    handle: Option<ProcessHandle>,
}

pub(crate) struct BridgeInner {
    settings: BridgeSettings,
    classifier: Arc<OomClassifier>,
    router: Arc<MessageRouter>,
    slot: Mutex<ProcessSlot>,
    running: AtomicBool,
    interrupted: AtomicBool,
    query_gate: Mutex<()>,
}

/// Supervises one agent process and runs queries against it.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AgentBridge {
    inner: Arc<BridgeInner>,
}

impl AgentBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        let classifier = Arc::new(OomClassifier::new(&settings.oom));
        Self {
            inner: Arc::new(BridgeInner {
                settings,
                classifier,
                router: Arc::new(MessageRouter::new()),
                slot: Mutex::new(ProcessSlot {
                    generation: 0,
                    handle: None,
                }),
                running: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                query_gate: Mutex::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    pub fn variant(&self) -> BridgeVariant {
        self.inner.settings.variant
    }

    /// True between a successful spawn and stop/termination.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Generation of the most recently spawned process (0 before the first).
    pub async fn process_generation(&self) -> u64 {
        self.inner.slot.lock().await.generation
    }

    /// Receive auth events that arrive while no query is waiting.
    pub fn subscribe_auth(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.router.subscribe_auth()
    }

    /// Spawn the agent and wait for its `init` message.
    ///
    /// No-op when a process is already running. If startup fails after the
    /// spawn, the new process is torn down before the error is returned.
    pub async fn start(&self) -> BridgeResult<()> {
        let generation = {
            let mut slot = self.inner.slot.lock().await;
            if slot.handle.is_some() {
                return Ok(());
            }

            self.inner.router.reset();

            let plan = LaunchPlan::resolve(&self.inner.settings)?;
            let mut child = plan.spawn()?;

            slot.generation += 1;
            let generation = slot.generation;
            let pid = child.id();

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| BridgeError::spawn("Failed to capture stdin"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| BridgeError::spawn("Failed to capture stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| BridgeError::spawn("Failed to capture stderr"))?;

            let stderr = spawn_stderr_watcher(stderr, Arc::clone(&self.inner.classifier), pid);
            let weak = Arc::downgrade(&self.inner);
            let watcher = TerminationWatcher::spawn(
                child,
                generation,
                self.inner.settings.timeouts.shutdown_grace(),
                move |generation, exit| async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_termination(generation, exit).await;
                    }
                },
            );
            let reader = spawn_reader_task(stdout, Arc::clone(&self.inner.router));

            slot.handle = Some(ProcessHandle::new(pid, stdin, reader, stderr, watcher));
            self.inner.running.store(true, Ordering::SeqCst);

            info!(
                target: "agent_bridge::bridge::supervisor",
                "Agent process started: {} (pid {:?}, generation {})",
                plan.program.display(),
                pid,
                generation
            );
            generation
        };

        match self.inner.await_init().await {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(
                    target: "agent_bridge::bridge::supervisor",
                    "Agent startup failed: {}",
                    error
                );
                self.inner.teardown(Some(generation)).await;
                Err(error)
            }
        }
    }

    /// Stop the agent process.
    ///
    /// A query waiting on the bridge fails with [`BridgeError::Stopped`].
    pub async fn stop(&self) {
        self.inner.teardown(None).await;
    }

    /// `stop()` then `start()`, e.g. to pick up a changed environment.
    pub async fn restart(&self) -> BridgeResult<()> {
        self.stop().await;
        self.start().await
    }

    /// Run one query to completion.
    ///
    /// Progress is sent to `events`; tool calls are answered by `tools`.
    /// Only one query may run at a time.
    pub async fn query<T: ToolHandler>(
        &self,
        request: QueryRequest,
        events: &QueryEventSender,
        tools: &T,
    ) -> BridgeResult<QueryOutcome> {
        if !self.is_running() {
            return Err(BridgeError::NotRunning);
        }
        let _gate = self
            .inner
            .query_gate
            .try_lock()
            .map_err(|_| BridgeError::QueryInProgress)?;

        let timeouts = &self.inner.settings.timeouts;
        let ctx = QueryContext {
            router: &self.inner.router,
            sink: self.inner.as_ref(),
            interrupted: &self.inner.interrupted,
            query_timeout: timeouts.query(),
            drain_timeout: timeouts.drain(),
        };

        let result = run_query(ctx, request, events, tools).await;
        if let Err(error) = &result {
            warn!(target: "agent_bridge::bridge::supervisor", "Query failed: {}", error);
        }
        result
    }

    /// Ask the agent to wrap up the current query.
    ///
    /// Best-effort: the running `query()` still returns through its normal
    /// path, usually with a partial `result`.
    pub async fn interrupt(&self) {
        if !self.is_running() {
            return;
        }
        self.inner.interrupted.store(true, Ordering::SeqCst);
        if let Err(error) = self.inner.send_command(&OutboundCommand::Interrupt).await {
            debug!(
                target: "agent_bridge::bridge::supervisor",
                "Interrupt not sent: {}",
                error
            );
        }
    }

    /// Answer an `auth_required` prompt with the chosen method.
    pub async fn authenticate(&self, method_id: impl Into<String>) -> BridgeResult<()> {
        if !self.variant().supports_auth() {
            info!(
                target: "agent_bridge::bridge::supervisor",
                "Ignoring authenticate: variant has no auth handshake"
            );
            return Ok(());
        }
        if !self.is_running() {
            return Err(BridgeError::NotRunning);
        }
        self.inner
            .send_command(&OutboundCommand::Authenticate {
                method_id: method_id.into(),
            })
            .await
    }

    /// Let the agent pre-create session state before the first query.
    pub async fn warmup_session(
        &self,
        cwd: Option<String>,
        models: Option<Vec<String>>,
    ) -> BridgeResult<()> {
        if !self.is_running() {
            return Err(BridgeError::NotRunning);
        }
        self.inner
            .send_command(&OutboundCommand::Warmup { cwd, models })
            .await
    }
}

impl BridgeInner {
    async fn await_init(&self) -> BridgeResult<()> {
        let message = self
            .router
            .wait_for_message(Some(self.settings.timeouts.startup()))
            .await?;
        match message {
            InboundMessage::Init { session_id } => {
                info!(
                    target: "agent_bridge::bridge::supervisor",
                    "Agent ready (session {})",
                    session_id
                );
            }
            other => {
                warn!(
                    target: "agent_bridge::bridge::supervisor",
                    "Unexpected first message from agent: {}",
                    other.kind()
                );
                if other.is_auth() {
                    self.router.dispatch_auth(&other);
                }
            }
        }
        Ok(())
    }

    /// Take the process out of the slot and shut it down.
    ///
    /// With `only` set, nothing happens unless that generation still owns
    /// the slot.
    async fn teardown(&self, only: Option<u64>) {
        let handle = {
            let mut slot = self.slot.lock().await;
            if only.is_some_and(|generation| generation != slot.generation) {
                return;
            }
            self.running.store(false, Ordering::SeqCst);
            slot.handle.take()
        };
        self.router.close(BridgeError::Stopped);

        let Some(handle) = handle else {
            return;
        };
        let pid = handle.pid();
        let farewell = encode_line(&OutboundCommand::Stop).ok();
        handle
            .shutdown(farewell.as_deref(), self.settings.timeouts.shutdown_grace())
            .await;
        info!(
            target: "agent_bridge::bridge::supervisor",
            "Agent process stopped (pid {:?})",
            pid
        );
    }

    /// Termination callback of the watcher spawned for `generation`.
    pub(crate) async fn handle_termination(&self, generation: u64, exit: ExitInfo) {
        let handle = {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation {
                debug!(
                    target: "agent_bridge::bridge::supervisor",
                    "Ignoring termination of stale generation {} (current {})",
                    generation,
                    slot.generation
                );
                return;
            }
            let Some(handle) = slot.handle.take() else {
                return;
            };
            self.running.store(false, Ordering::SeqCst);
            handle
        };

        // Pipes are flushed with the slot unlocked; commands fail fast with
        // NotRunning meanwhile.
        let summary = handle.release(self.settings.timeouts.stderr_flush()).await;
        let error = self.classifier.classify(summary.oom_detected, exit);
        warn!(
            target: "agent_bridge::bridge::supervisor",
            "Agent process terminated: {}",
            error
        );
        if !summary.tail.is_empty() {
            debug!(
                target: "agent_bridge::bridge::supervisor",
                "Last stderr lines:\n{}",
                summary.tail.join("\n")
            );
        }

        // start() resets the router under the slot lock, so checking the
        // generation under it keeps this error off a newer process.
        let slot = self.slot.lock().await;
        if slot.generation == generation {
            self.router.close(error);
        } else {
            debug!(
                target: "agent_bridge::bridge::supervisor",
                "Generation {} was replaced before its exit was reported",
                generation
            );
        }
    }
}

impl CommandSink for BridgeInner {
    fn send_command(
        &self,
        command: &OutboundCommand,
    ) -> impl Future<Output = BridgeResult<()>> + Send {
        async move {
            let line = encode_line(command)?;
            let mut slot = self.slot.lock().await;
            let handle = slot.handle.as_mut().ok_or(BridgeError::NotRunning)?;
            // A broken pipe means the process is exiting; the termination
            // path reports that to the waiting query.
            if let Err(e) = handle.write_line(&line).await {
                warn!(
                    target: "agent_bridge::bridge::supervisor",
                    "Failed to write {} command: {}",
                    command.kind(),
                    e
                );
            } else {
                debug!(
                    target: "agent_bridge::bridge::supervisor",
                    "Sent {} command",
                    command.kind()
                );
            }
            Ok(())
        }
    }
}
