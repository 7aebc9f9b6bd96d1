//! Out-of-band authentication notifications.
//!
//! `auth_required` and `auth_success` can arrive while no query is waiting
//! (for example right after startup). They are fanned out to subscribers
//! over a broadcast channel instead of being queued for the next query.

use serde_json::Value;
use tokio::sync::broadcast;

use super::protocol::InboundMessage;

const AUTH_CHANNEL_CAPACITY: usize = 16;

/// Authentication state change reported by the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// The agent needs the user to sign in with one of `methods`
    Required {
        methods: Vec<Value>,
        auth_url: Option<String>,
    },
    /// A previous `Required` was satisfied
    Succeeded,
}

impl AuthEvent {
    pub fn from_message(message: &InboundMessage) -> Option<Self> {
        match message {
            InboundMessage::AuthRequired { methods, auth_url } => Some(AuthEvent::Required {
                methods: methods.clone(),
                auth_url: auth_url.clone(),
            }),
            InboundMessage::AuthSuccess => Some(AuthEvent::Succeeded),
            _ => None,
        }
    }
}

/// Subscription point for auth events.
#[derive(Debug)]
pub(crate) struct AuthListeners {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthListeners {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(AUTH_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Returns false when nobody is listening; the event is dropped.
    pub(crate) fn dispatch(&self, event: AuthEvent) -> bool {
        if self.tx.receiver_count() == 0 {
            log::warn!(
                target: "agent_bridge::bridge::auth",
                "Dropping auth event with no listener: {:?}",
                event
            );
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

impl Default for AuthListeners {
    fn default() -> Self {
        Self::new()
    }
}
