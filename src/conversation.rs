//! Host-level turn management on top of [`AgentBridge`].
//!
//! A `Conversation` runs one query at a time and adds the policies a chat
//! host layers over the bridge:
//!
//! - a message submitted while a query runs interrupts it and is chained as
//!   a fresh full query once the interrupted one settles
//! - streamed text is accumulated so it survives a failed query
//! - a timeout under the ACP variant sends a best-effort interrupt so the
//!   agent is not left stuck on the abandoned request

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{Mutex, mpsc};

use crate::bridge::{
    AgentBridge, QueryEvent, QueryEventSender, QueryOutcome, QueryRequest, ToolHandler,
};
use crate::config::BridgeVariant;
use crate::error::{BridgeError, BridgeResult};

/// Outcome of one query issued by [`Conversation::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub prompt: String,
    pub result: BridgeResult<QueryOutcome>,
    /// Text streamed before the query finished, kept even on failure
    pub partial_text: String,
}

impl TurnReport {
    /// Best text to show: the final result, or whatever was streamed.
    pub fn display_text(&self) -> &str {
        match &self.result {
            Ok(outcome) if !outcome.text.is_empty() => &outcome.text,
            _ => &self.partial_text,
        }
    }
}

#[derive(Debug, Default)]
struct TurnState {
    busy: bool,
    follow_up: Option<String>,
}

pub struct Conversation {
    bridge: Arc<AgentBridge>,
    state: Mutex<TurnState>,
}

impl Conversation {
    pub fn new(bridge: Arc<AgentBridge>) -> Self {
        Self {
            bridge,
            state: Mutex::new(TurnState::default()),
        }
    }

    pub fn bridge(&self) -> &Arc<AgentBridge> {
        &self.bridge
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.busy
    }

    /// Queue `text` to run after the in-flight query and interrupt it.
    ///
    /// Returns false when nothing is running; the caller should `submit`
    /// instead. A newer follow-up replaces an older unsent one.
    pub async fn queue_follow_up(&self, text: impl Into<String>) -> bool {
        // Held until the interrupt is written; a chained follow-up must never
        // start before it.
        let mut state = self.state.lock().await;
        if !state.busy {
            return false;
        }
        state.follow_up = Some(text.into());
        self.bridge.interrupt().await;
        drop(state);
        info!(
            target: "agent_bridge::conversation",
            "Follow-up queued, interrupt sent"
        );
        true
    }

    /// Run `request`, then any follow-ups queued while it ran.
    ///
    /// Every event is forwarded to `events`. One report per query issued.
    pub async fn submit<T: ToolHandler>(
        &self,
        request: QueryRequest,
        events: &QueryEventSender,
        tools: &T,
    ) -> Vec<TurnReport> {
        {
            let mut state = self.state.lock().await;
            state.busy = true;
            state.follow_up = None;
        }

        let mut reports = Vec::new();
        let mut current = request;
        loop {
            let report = self.run_turn(current.clone(), events, tools).await;
            if matches!(report.result, Err(BridgeError::Timeout { .. }))
                && self.bridge.variant() == BridgeVariant::Acp
            {
                debug!(
                    target: "agent_bridge::conversation",
                    "Interrupting agent after timeout"
                );
                self.bridge.interrupt().await;
            }
            reports.push(report);

            let next = {
                let mut state = self.state.lock().await;
                let next = state.follow_up.take();
                state.busy = next.is_some();
                next
            };
            match next {
                Some(text) => {
                    info!(
                        target: "agent_bridge::conversation",
                        "Chaining follow-up query"
                    );
                    current = current.with_prompt(text);
                }
                None => break,
            }
        }
        reports
    }

    async fn run_turn<T: ToolHandler>(
        &self,
        request: QueryRequest,
        events: &QueryEventSender,
        tools: &T,
    ) -> TurnReport {
        let prompt = request.prompt.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut partial_text = String::new();
        let mut forward = |event: QueryEvent| {
            if let QueryEvent::TextDelta { text } = &event {
                partial_text.push_str(text);
            }
            let _ = events.send(event);
        };

        let query = self.bridge.query(request, &tx, tools);
        tokio::pin!(query);
        let result = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => forward(event),
                result = &mut query => break result,
            }
        };
        while let Ok(event) = rx.try_recv() {
            forward(event);
        }

        TurnReport {
            prompt,
            result,
            partial_text,
        }
    }
}
