//! Single-slot correlation between the reader task and the query loop.
//!
//! The agent speaks a strictly sequential protocol: one query at a time, and
//! each message belongs to whoever is waiting right now. The router therefore
//! keeps at most one waiter and a FIFO of messages that arrived while nobody
//! waited.
//!
//! Every registration bumps a generation counter. Timeouts carry the
//! generation they were armed for, so a timer that fires after its wait was
//! already satisfied cannot fail a newer wait.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};

use super::super::auth::{AuthEvent, AuthListeners};
use super::super::protocol::InboundMessage;
use crate::error::{BridgeError, BridgeResult};

type WaitSender = oneshot::Sender<BridgeResult<InboundMessage>>;
type WaitReceiver = oneshot::Receiver<BridgeResult<InboundMessage>>;

/// What happened to a message handed to [`MessageRouter::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// A waiting caller received it
    Resumed,
    /// Nobody was waiting; it sits in the pending queue
    Queued,
    /// An auth message went to the auth listeners
    AuthDispatched,
    /// An auth message arrived with no waiter and no listener
    AuthDropped,
    /// The router is closed; the message was discarded
    Discarded,
}

/// Result of trying to register a waiter.
pub(crate) enum Wait {
    /// A queued message was available immediately
    Ready(InboundMessage),
    /// The router is closed with this error
    Closed(BridgeError),
    /// The caller must await `rx`
    Pending { generation: u64, rx: WaitReceiver },
}

struct Waiter {
    generation: u64,
    tx: WaitSender,
}

struct RouterState {
    pending: VecDeque<InboundMessage>,
    waiter: Option<Waiter>,
    generation: u64,
    /// Once set, waits fail with this error until `reset()`
    closed: Option<BridgeError>,
}

/// Routes decoded agent messages to the current waiter.
pub(crate) struct MessageRouter {
    state: std::sync::Mutex<RouterState>,
    auth: AuthListeners,
}

impl MessageRouter {
    pub(crate) fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(RouterState {
                pending: VecDeque::new(),
                waiter: None,
                generation: 0,
                closed: None,
            }),
            auth: AuthListeners::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand a decoded message to the waiter, or queue it.
    ///
    /// Auth messages that arrive with nobody waiting go to the auth listeners
    /// instead of the queue.
    pub(crate) fn deliver(&self, message: InboundMessage) -> Delivery {
        let mut state = self.lock();

        if state.closed.is_some() {
            log::debug!(
                target: "agent_bridge::bridge::router",
                "Discarding {} after router closed",
                message.kind()
            );
            return Delivery::Discarded;
        }

        let message = match state.waiter.take() {
            Some(waiter) => match waiter.tx.send(Ok(message)) {
                Ok(()) => return Delivery::Resumed,
                // Waiter gave up (its future was dropped). Keep the message.
                Err(Ok(message)) => message,
                Err(Err(_)) => return Delivery::Discarded,
            },
            None => message,
        };

        if !message.is_auth() {
            state.pending.push_back(message);
            return Delivery::Queued;
        }

        // Only the broadcast happens outside the lock.
        drop(state);
        if self.dispatch_auth(&message) {
            Delivery::AuthDispatched
        } else {
            Delivery::AuthDropped
        }
    }

    /// Register the single waiter.
    ///
    /// Queued messages are served first, then a latched close error. A new
    /// registration replaces any previous waiter, whose receiver then
    /// resolves as cancelled.
    pub(crate) fn register(&self) -> Wait {
        let mut state = self.lock();

        if let Some(message) = state.pending.pop_front() {
            return Wait::Ready(message);
        }
        if let Some(error) = &state.closed {
            return Wait::Closed(error.clone());
        }

        state.generation += 1;
        let generation = state.generation;
        let (tx, rx) = oneshot::channel();
        if state.waiter.replace(Waiter { generation, tx }).is_some() {
            log::debug!(
                target: "agent_bridge::bridge::router",
                "Waiter superseded by generation {}",
                generation
            );
        }
        Wait::Pending { generation, rx }
    }

    /// Fail the waiter of `generation` with a timeout.
    ///
    /// Returns false if that wait was already satisfied or superseded.
    pub(crate) fn expire(&self, generation: u64, timeout: Duration) -> bool {
        let mut state = self.lock();
        match state.waiter.take() {
            Some(waiter) if waiter.generation == generation => {
                let _ = waiter.tx.send(Err(BridgeError::Timeout { timeout }));
                true
            }
            other => {
                state.waiter = other;
                false
            }
        }
    }

    /// Wait for the next message, optionally bounded by `timeout`.
    pub(crate) async fn wait_for_message(
        &self,
        timeout: Option<Duration>,
    ) -> BridgeResult<InboundMessage> {
        let (generation, mut rx) = match self.register() {
            Wait::Ready(message) => return Ok(message),
            Wait::Closed(error) => return Err(error),
            Wait::Pending { generation, rx } => (generation, rx),
        };

        let Some(limit) = timeout else {
            return flatten(rx.await);
        };

        tokio::select! {
            result = &mut rx => flatten(result),
            _ = tokio::time::sleep(limit) => {
                if !self.expire(generation, limit) {
                    log::debug!(
                        target: "agent_bridge::bridge::router",
                        "Timer for generation {} lost the race to a delivery",
                        generation
                    );
                }
                flatten(rx.await)
            }
        }
    }

    /// Fail the current waiter and every later wait with `error`.
    ///
    /// The first close wins; later calls only fail a waiter that registered
    /// in between (none can, since `register` checks the latch).
    pub(crate) fn close(&self, error: BridgeError) {
        let waiter = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(error.clone());
            }
            state.waiter.take()
        };
        if let Some(waiter) = waiter {
            let _ = waiter.tx.send(Err(error));
        }
    }

    /// Forget everything from a previous process.
    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        state.pending.clear();
        state.waiter = None;
        state.closed = None;
    }

    /// Drop queued messages left over from an earlier query.
    pub(crate) fn clear_pending(&self) -> usize {
        let mut state = self.lock();
        let count = state.pending.len();
        state.pending.clear();
        count
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    #[cfg(test)]
    pub(crate) fn has_waiter(&self) -> bool {
        self.lock().waiter.is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub(crate) fn subscribe_auth(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth.subscribe()
    }

    /// Forward an auth message to listeners. Non-auth messages are ignored.
    pub(crate) fn dispatch_auth(&self, message: &InboundMessage) -> bool {
        match AuthEvent::from_message(message) {
            Some(event) => self.auth.dispatch(event),
            None => false,
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn flatten(
    result: Result<BridgeResult<InboundMessage>, oneshot::error::RecvError>,
) -> BridgeResult<InboundMessage> {
    result.unwrap_or(Err(BridgeError::Stopped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn delta(text: &str) -> InboundMessage {
        InboundMessage::TextDelta {
            text: text.to_string(),
        }
    }

    #[test]
    fn message_without_waiter_is_queued_in_order() {
        let router = MessageRouter::new();
        assert_eq!(router.deliver(delta("a")), Delivery::Queued);
        assert_eq!(router.deliver(delta("b")), Delivery::Queued);
        assert_eq!(router.pending_len(), 2);

        match router.register() {
            Wait::Ready(message) => assert_eq!(message, delta("a")),
            _ => panic!("expected queued message"),
        }
        match router.register() {
            Wait::Ready(message) => assert_eq!(message, delta("b")),
            _ => panic!("expected queued message"),
        }
        assert!(matches!(router.register(), Wait::Pending { .. }));
    }

    #[tokio::test]
    async fn waiting_caller_is_resumed() {
        let router = MessageRouter::new();
        let rx = match router.register() {
            Wait::Pending { rx, .. } => rx,
            _ => panic!("expected pending wait"),
        };
        assert!(router.has_waiter());
        assert_eq!(router.deliver(delta("hi")), Delivery::Resumed);
        assert!(!router.has_waiter());
        assert_eq!(rx.await.unwrap(), Ok(delta("hi")));
    }

    #[test]
    fn stale_timer_does_not_fail_newer_wait() {
        let router = MessageRouter::new();
        let first = match router.register() {
            Wait::Pending { generation, .. } => generation,
            _ => panic!("expected pending wait"),
        };
        let mut second_rx = match router.register() {
            Wait::Pending { generation, rx } => {
                assert!(generation > first);
                rx
            }
            _ => panic!("expected pending wait"),
        };

        assert!(!router.expire(first, Duration::from_millis(1)));
        assert!(router.has_waiter());
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn expire_fails_matching_waiter_with_timeout() {
        let router = MessageRouter::new();
        let (generation, rx) = match router.register() {
            Wait::Pending { generation, rx } => (generation, rx),
            _ => panic!("expected pending wait"),
        };
        let limit = Duration::from_millis(5);
        assert!(router.expire(generation, limit));
        assert_eq!(rx.await.unwrap(), Err(BridgeError::Timeout { timeout: limit }));
        // Expiring twice is a no-op
        assert!(!router.expire(generation, limit));
    }

    #[tokio::test]
    async fn wait_for_message_times_out() {
        let router = MessageRouter::new();
        let limit = Duration::from_millis(30);
        let result = router.wait_for_message(Some(limit)).await;
        assert_eq!(result, Err(BridgeError::Timeout { timeout: limit }));
        assert!(!router.has_waiter());
    }

    #[tokio::test]
    async fn wait_for_message_receives_late_delivery() {
        let router = Arc::new(MessageRouter::new());
        let feeder = Arc::clone(&router);
        tokio::spawn(async move {
            while !feeder.has_waiter() {
                tokio::task::yield_now().await;
            }
            feeder.deliver(delta("late"));
        });

        let result = router
            .wait_for_message(Some(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Ok(delta("late")));
    }

    #[tokio::test]
    async fn close_fails_waiter_and_latches() {
        let router = MessageRouter::new();
        let rx = match router.register() {
            Wait::Pending { rx, .. } => rx,
            _ => panic!("expected pending wait"),
        };
        router.close(BridgeError::Stopped);
        assert_eq!(rx.await.unwrap(), Err(BridgeError::Stopped));

        assert!(matches!(router.register(), Wait::Closed(BridgeError::Stopped)));
        assert_eq!(router.deliver(delta("late")), Delivery::Discarded);

        // First close wins
        router.close(BridgeError::Agent("later".to_string()));
        assert!(matches!(router.register(), Wait::Closed(BridgeError::Stopped)));
    }

    #[test]
    fn queued_messages_are_served_before_close_error() {
        let router = MessageRouter::new();
        router.deliver(delta("last words"));
        router.close(BridgeError::Stopped);

        assert!(matches!(router.register(), Wait::Ready(_)));
        assert!(matches!(router.register(), Wait::Closed(_)));
    }

    #[test]
    fn reset_clears_latch_and_queue() {
        let router = MessageRouter::new();
        router.deliver(delta("old"));
        router.close(BridgeError::Stopped);
        router.reset();

        assert!(!router.is_closed());
        assert_eq!(router.pending_len(), 0);
        assert!(matches!(router.register(), Wait::Pending { .. }));
    }

    #[test]
    fn clear_pending_reports_count() {
        let router = MessageRouter::new();
        router.deliver(delta("a"));
        router.deliver(delta("b"));
        assert_eq!(router.clear_pending(), 2);
        assert_eq!(router.clear_pending(), 0);
    }

    #[test]
    fn dropped_waiter_keeps_message() {
        let router = MessageRouter::new();
        match router.register() {
            Wait::Pending { rx, .. } => drop(rx),
            _ => panic!("expected pending wait"),
        }
        assert_eq!(router.deliver(delta("kept")), Delivery::Queued);
        assert_eq!(router.pending_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_delivery_and_wait_never_strand_a_message() {
        for round in 0..2_000 {
            let router = Arc::new(MessageRouter::new());
            let feeder = Arc::clone(&router);
            let delivered = tokio::spawn(async move { feeder.deliver(delta("result")) });

            let result = router
                .wait_for_message(Some(Duration::from_secs(2)))
                .await;

            assert_eq!(result, Ok(delta("result")), "round {}", round);
            let delivery = delivered.await.unwrap();
            assert!(
                matches!(delivery, Delivery::Resumed | Delivery::Queued),
                "round {}: {:?}",
                round,
                delivery
            );
            assert_eq!(router.pending_len(), 0, "round {}", round);
            assert!(!router.has_waiter(), "round {}", round);
        }
    }

    #[tokio::test]
    async fn auth_without_waiter_goes_to_listeners() {
        let router = MessageRouter::new();
        assert_eq!(router.deliver(InboundMessage::AuthSuccess), Delivery::AuthDropped);

        let mut events = router.subscribe_auth();
        assert_eq!(
            router.deliver(InboundMessage::AuthSuccess),
            Delivery::AuthDispatched
        );
        assert_eq!(events.recv().await.unwrap(), AuthEvent::Succeeded);
        assert_eq!(router.pending_len(), 0);
    }

    #[tokio::test]
    async fn auth_with_waiter_resumes_waiter() {
        let router = MessageRouter::new();
        let rx = match router.register() {
            Wait::Pending { rx, .. } => rx,
            _ => panic!("expected pending wait"),
        };
        assert_eq!(router.deliver(InboundMessage::AuthSuccess), Delivery::Resumed);
        assert_eq!(rx.await.unwrap(), Ok(InboundMessage::AuthSuccess));
    }
}
