//! Query state machine.
//!
//! One call to [`run_query`] drives a single logical request: send the
//! `query` command, then consume routed messages until `result` or `error`.
//! Streaming messages become [`QueryEvent`]s on a channel owned by the host,
//! tool requests are answered through a [`ToolHandler`], and an interrupt
//! raised while a tool runs switches the loop into drain mode.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::actor::MessageRouter;
use super::protocol::{InboundMessage, OutboundCommand, RequestId, ToolStatus};
use crate::error::{BridgeError, BridgeResult};

/// Parameters of one `query` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub cwd: Option<String>,
    pub mode: Option<String>,
    pub model: Option<String>,
    /// Session to resume (agent-sdk variant only)
    pub resume: Option<String>,
}

impl QueryRequest {
    pub fn new(prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume = Some(session_id.into());
        self
    }

    /// Same parameters, different prompt. Used for follow-up chaining.
    pub(crate) fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }

    fn into_command(self, id: RequestId) -> OutboundCommand {
        OutboundCommand::Query {
            id,
            prompt: self.prompt,
            system_prompt: self.system_prompt,
            cwd: self.cwd,
            mode: self.mode,
            model: self.model,
            resume: self.resume,
        }
    }
}

/// Terminal success of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub text: String,
    pub session_id: String,
    pub cost_usd: Option<f64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub input: Value,
}

/// Non-terminal progress of a query, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    SessionStarted {
        session_id: String,
    },
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolActivity {
        name: String,
        status: ToolStatus,
        tool_use_id: Option<String>,
        input: Option<Value>,
    },
    ToolResultDisplay {
        tool_use_id: String,
        name: String,
        output: String,
    },
    AuthRequired {
        methods: Vec<Value>,
        auth_url: Option<String>,
    },
    AuthSucceeded,
}

pub type QueryEventSender = mpsc::UnboundedSender<QueryEvent>;
pub type QueryEventReceiver = mpsc::UnboundedReceiver<QueryEvent>;

/// Executes tool calls on the agent's behalf.
///
/// The returned string is sent back verbatim as the `tool_result` payload.
pub trait ToolHandler: Send + Sync {
    fn call_tool(&self, call: ToolCall) -> impl Future<Output = String> + Send;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(ToolCall) -> Fut + Send + Sync,
    Fut: Future<Output = String> + Send,
{
    fn call_tool(&self, call: ToolCall) -> impl Future<Output = String> + Send {
        self(call)
    }
}

/// Answers every tool call with a JSON error, for hosts without tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

impl ToolHandler for NoTools {
    fn call_tool(&self, call: ToolCall) -> impl Future<Output = String> + Send {
        let payload = serde_json::json!({
            "error": format!("tool '{}' is not available in this host", call.name),
        });
        std::future::ready(payload.to_string())
    }
}

/// Where the state machine writes outbound commands.
pub(crate) trait CommandSink: Send + Sync {
    fn send_command(
        &self,
        command: &OutboundCommand,
    ) -> impl Future<Output = BridgeResult<()>> + Send;
}

/// Shared state one query runs against.
pub(crate) struct QueryContext<'a, S> {
    pub(crate) router: &'a MessageRouter,
    pub(crate) sink: &'a S,
    pub(crate) interrupted: &'a AtomicBool,
    pub(crate) query_timeout: Duration,
    pub(crate) drain_timeout: Duration,
}

/// Run one query to its terminal message.
pub(crate) async fn run_query<S, T>(
    ctx: QueryContext<'_, S>,
    request: QueryRequest,
    events: &QueryEventSender,
    tools: &T,
) -> BridgeResult<QueryOutcome>
where
    S: CommandSink,
    T: ToolHandler,
{
    ctx.interrupted.store(false, Ordering::SeqCst);
    let stale = ctx.router.clear_pending();
    if stale > 0 {
        debug!(
            target: "agent_bridge::bridge::query",
            "Discarded {} stale messages from a previous query",
            stale
        );
    }

    let id = RequestId::new();
    debug!(target: "agent_bridge::bridge::query", "Sending query {}", id);
    ctx.sink.send_command(&request.into_command(id)).await?;

    loop {
        let message = ctx.router.wait_for_message(Some(ctx.query_timeout)).await?;
        match message {
            InboundMessage::Init { session_id } => {
                debug!(
                    target: "agent_bridge::bridge::query",
                    "Agent started session {}",
                    session_id
                );
                emit(events, QueryEvent::SessionStarted { session_id });
            }
            InboundMessage::TextDelta { text } => emit(events, QueryEvent::TextDelta { text }),
            InboundMessage::ThinkingDelta { text } => {
                emit(events, QueryEvent::ThinkingDelta { text })
            }
            InboundMessage::ToolUse {
                call_id,
                name,
                input,
            } => {
                if ctx.interrupted.load(Ordering::SeqCst) {
                    info!(
                        target: "agent_bridge::bridge::query",
                        "Skipping tool {} ({}) after interrupt",
                        name,
                        call_id
                    );
                    continue;
                }

                debug!(
                    target: "agent_bridge::bridge::query",
                    "Calling tool {} ({})",
                    name,
                    call_id
                );
                let result = tools
                    .call_tool(ToolCall {
                        call_id: call_id.clone(),
                        name,
                        input,
                    })
                    .await;
                ctx.sink
                    .send_command(&OutboundCommand::ToolResult { call_id, result })
                    .await?;

                if ctx.interrupted.load(Ordering::SeqCst) {
                    return drain_for_terminal(&ctx).await;
                }
            }
            InboundMessage::ToolActivity {
                name,
                status,
                tool_use_id,
                input,
            } => emit(
                events,
                QueryEvent::ToolActivity {
                    name,
                    status,
                    tool_use_id,
                    input,
                },
            ),
            InboundMessage::ToolResultDisplay {
                tool_use_id,
                name,
                output,
            } => emit(
                events,
                QueryEvent::ToolResultDisplay {
                    tool_use_id,
                    name,
                    output,
                },
            ),
            InboundMessage::AuthRequired { methods, auth_url } => {
                emit(events, QueryEvent::AuthRequired { methods, auth_url })
            }
            InboundMessage::AuthSuccess => emit(events, QueryEvent::AuthSucceeded),
            terminal @ (InboundMessage::Result { .. } | InboundMessage::Error { .. }) => {
                return finish(terminal);
            }
        }
    }
}

/// After an interrupt landed during a tool call, wait only for the terminal
/// message. Queued messages are consumed first; everything else is dropped.
async fn drain_for_terminal<S>(ctx: &QueryContext<'_, S>) -> BridgeResult<QueryOutcome> {
    debug!(
        target: "agent_bridge::bridge::query",
        "Interrupted during tool call, draining for result"
    );
    loop {
        let message = ctx.router.wait_for_message(Some(ctx.drain_timeout)).await?;
        if message.is_terminal() {
            return finish(message);
        }
        debug!(
            target: "agent_bridge::bridge::query",
            "Discarding {} while draining",
            message.kind()
        );
    }
}

fn finish(message: InboundMessage) -> BridgeResult<QueryOutcome> {
    match message {
        InboundMessage::Result {
            text,
            session_id,
            cost_usd,
            input_tokens,
            output_tokens,
        } => Ok(QueryOutcome {
            text,
            session_id,
            cost_usd,
            input_tokens,
            output_tokens,
        }),
        InboundMessage::Error { message } => Err(BridgeError::Agent(message)),
        other => Err(BridgeError::Agent(format!(
            "unexpected terminal message: {}",
            other.kind()
        ))),
    }
}

fn emit(events: &QueryEventSender, event: QueryEvent) {
    // A host that dropped its receiver just stops seeing progress.
    let _ = events.send(event);
}
