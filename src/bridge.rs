//! Agent process bridge.
//!
//! - `protocol`: newline-delimited JSON codec
//! - `actor`: reader task, stderr watcher, message router
//! - `supervisor`: process lifecycle and the host-facing [`AgentBridge`]
//! - `query`: the per-query state machine
//! - `classifier`: crash vs out-of-memory classification
//! - `auth`: listeners for out-of-band auth events

mod actor;
pub mod auth;
pub mod classifier;
pub mod protocol;
pub mod query;
mod supervisor;

pub use auth::AuthEvent;
pub use classifier::{ExitInfo, OomClassifier};
pub use protocol::{InboundMessage, OutboundCommand, RequestId, ToolStatus};
pub use query::{
    NoTools, QueryEvent, QueryEventReceiver, QueryEventSender, QueryOutcome, QueryRequest,
    ToolCall, ToolHandler,
};
pub use supervisor::AgentBridge;
