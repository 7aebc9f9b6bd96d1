//! Messages emitted by the agent child process on stdout.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Every `type` value the decoder accepts.
const KNOWN_TYPES: &[&str] = &[
    "init",
    "text_delta",
    "thinking_delta",
    "tool_use",
    "tool_activity",
    "tool_result_display",
    "result",
    "error",
    "auth_required",
    "auth_success",
];

/// Progress state reported by `tool_activity`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Started,
    Completed,
}

/// A decoded line from the agent.
///
/// Missing payload fields fall back to empty values rather than rejecting
/// the whole line; the agent is the only producer and omits optional data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Init {
        #[serde(default)]
        session_id: String,
    },
    TextDelta {
        #[serde(default)]
        text: String,
    },
    ThinkingDelta {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default = "empty_object")]
        input: Value,
    },
    ToolActivity {
        #[serde(default)]
        name: String,
        #[serde(default)]
        status: ToolStatus,
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResultDisplay {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        output: String,
    },
    Result {
        #[serde(default)]
        text: String,
        #[serde(default)]
        session_id: String,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        input_tokens: u64,
        #[serde(default)]
        output_tokens: u64,
    },
    Error {
        #[serde(default = "unknown_error")]
        message: String,
    },
    AuthRequired {
        #[serde(default)]
        methods: Vec<Value>,
        #[serde(default)]
        auth_url: Option<String>,
    },
    AuthSuccess,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn unknown_error() -> String {
    "Unknown error".to_string()
}

impl InboundMessage {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Init { .. } => "init",
            InboundMessage::TextDelta { .. } => "text_delta",
            InboundMessage::ThinkingDelta { .. } => "thinking_delta",
            InboundMessage::ToolUse { .. } => "tool_use",
            InboundMessage::ToolActivity { .. } => "tool_activity",
            InboundMessage::ToolResultDisplay { .. } => "tool_result_display",
            InboundMessage::Result { .. } => "result",
            InboundMessage::Error { .. } => "error",
            InboundMessage::AuthRequired { .. } => "auth_required",
            InboundMessage::AuthSuccess => "auth_success",
        }
    }

    /// `Result` and `Error` end a query's message stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InboundMessage::Result { .. } | InboundMessage::Error { .. }
        )
    }

    /// Auth handshake messages may arrive outside any query.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            InboundMessage::AuthRequired { .. } | InboundMessage::AuthSuccess
        )
    }
}

/// Why a line did not produce a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("line is not valid UTF-8")]
    NotUtf8,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Decode one line (terminator already removed) into a message.
pub(crate) fn decode_line(line: &[u8]) -> Result<InboundMessage, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing \"type\" discriminator".to_string()))?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(DecodeError::UnknownType(kind.to_string()));
    }

    InboundMessage::deserialize(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}
