//! Error handling types for agent-bridge
//!
//! Every failure a `start()` or `query()` caller can observe is a variant of
//! [`BridgeError`]. The type is `Clone` because a single value is handed to a
//! waiting continuation through a oneshot channel and may also be latched by
//! the router for later waits.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::bridge::ExitInfo;

/// Errors surfaced by the agent bridge.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// The configured child program could not be resolved to an executable
    #[error("Agent binary not found: {command}")]
    ChildBinaryNotFound { command: String },

    /// The configured bridge script does not exist
    #[error("Bridge script not found: {}", path.display())]
    BridgeScriptNotFound { path: PathBuf },

    /// The process exists but could not be spawned for another reason
    #[error("Failed to spawn agent process: {message}")]
    Spawn { message: String },

    /// A query was issued while the bridge is stopped
    #[error("Agent bridge is not running")]
    NotRunning,

    /// A second query was issued while one is still in flight
    #[error("A query is already in flight on this bridge")]
    QueryInProgress,

    /// An outbound command could not be serialized
    #[error("Failed to encode command: {message}")]
    Encoding { message: String },

    /// No message arrived within the wait window
    #[error("No message from agent within {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The child terminated for a reason other than memory exhaustion
    #[error("Agent process exited ({exit})")]
    ProcessExited { exit: ExitInfo },

    /// The child terminated and was classified as out-of-memory
    #[error("Agent process ran out of memory ({exit})")]
    OutOfMemory { exit: ExitInfo },

    /// `stop()` was called while a wait was outstanding
    #[error("Agent bridge stopped")]
    Stopped,

    /// The child reported a structured error for the query
    #[error("Agent error: {0}")]
    Agent(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        BridgeError::Encoding {
            message: message.into(),
        }
    }

    /// Create a spawn error
    pub fn spawn(message: impl Into<String>) -> Self {
        BridgeError::Spawn {
            message: message.into(),
        }
    }

    /// True for failures caused by the child going away.
    pub fn is_termination(&self) -> bool {
        matches!(
            self,
            BridgeError::ProcessExited { .. } | BridgeError::OutOfMemory { .. }
        )
    }

    /// Short text suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            BridgeError::ChildBinaryNotFound { .. } => {
                "AI runtime not found. Please reinstall the app."
            }
            BridgeError::BridgeScriptNotFound { .. } => {
                "AI components missing. Please reinstall the app."
            }
            BridgeError::Spawn { .. } => "AI could not be started. Try again.",
            BridgeError::NotRunning => "AI is not running. Try sending your message again.",
            BridgeError::QueryInProgress => "AI is still working on the previous message.",
            BridgeError::Encoding { .. } => "Failed to encode message",
            BridgeError::Timeout { .. } => "AI took too long to respond. Try again.",
            BridgeError::ProcessExited { .. } => {
                "AI stopped unexpectedly. Try sending your message again."
            }
            BridgeError::OutOfMemory { .. } => {
                "Not enough memory for AI chat. Close some apps and try again."
            }
            BridgeError::Stopped => "Response stopped.",
            BridgeError::Agent(_) => "The AI reported an error.",
        }
    }
}
