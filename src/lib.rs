pub mod bridge;
pub mod config;
pub mod conversation;
pub mod error;

// Re-export the main bridge types
pub use bridge::{
    AgentBridge, AuthEvent, ExitInfo, NoTools, QueryEvent, QueryOutcome, QueryRequest, ToolCall,
    ToolHandler,
};
pub use config::{BridgeSettings, BridgeVariant};
pub use conversation::{Conversation, TurnReport};
pub use error::{BridgeError, BridgeResult};
