//! Commands written to the agent child process on stdin.

use serde::Serialize;

use super::RequestId;
use crate::error::{BridgeError, BridgeResult};

/// A host to agent command. Serialized as one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundCommand {
    Query {
        id: RequestId,
        prompt: String,
        system_prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume: Option<String>,
    },
    ToolResult {
        call_id: String,
        result: String,
    },
    Interrupt,
    Stop,
    Authenticate {
        method_id: String,
    },
    Warmup {
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        models: Option<Vec<String>>,
    },
}

impl OutboundCommand {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::Query { .. } => "query",
            OutboundCommand::ToolResult { .. } => "tool_result",
            OutboundCommand::Interrupt => "interrupt",
            OutboundCommand::Stop => "stop",
            OutboundCommand::Authenticate { .. } => "authenticate",
            OutboundCommand::Warmup { .. } => "warmup",
        }
    }
}

/// Serialize a command into a single newline-terminated line.
pub(crate) fn encode_line(command: &OutboundCommand) -> BridgeResult<String> {
    let mut line =
        serde_json::to_string(command).map_err(|e| BridgeError::encoding(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn encode(command: &OutboundCommand) -> String {
        let line = encode_line(command).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1, "exactly one line");
        line.trim_end().to_string()
    }

    #[test]
    fn unit_commands() {
        assert_snapshot!(encode(&OutboundCommand::Interrupt), @r#"{"type":"interrupt"}"#);
        assert_snapshot!(encode(&OutboundCommand::Stop), @r#"{"type":"stop"}"#);
    }

    #[test]
    fn tool_result_uses_camel_case_call_id() {
        let command = OutboundCommand::ToolResult {
            call_id: "c1".to_string(),
            result: "1".to_string(),
        };
        assert_snapshot!(encode(&command), @r#"{"type":"tool_result","callId":"c1","result":"1"}"#);
    }

    #[test]
    fn authenticate_carries_method_id() {
        let command = OutboundCommand::Authenticate {
            method_id: "claude-login".to_string(),
        };
        assert_snapshot!(encode(&command), @r#"{"type":"authenticate","methodId":"claude-login"}"#);
    }

    #[test]
    fn warmup_omits_absent_fields() {
        let bare = OutboundCommand::Warmup {
            cwd: None,
            models: None,
        };
        assert_snapshot!(encode(&bare), @r#"{"type":"warmup"}"#);

        let full = OutboundCommand::Warmup {
            cwd: Some("/tmp/work".to_string()),
            models: Some(vec!["opus".to_string(), "sonnet".to_string()]),
        };
        assert_snapshot!(
            encode(&full),
            @r#"{"type":"warmup","cwd":"/tmp/work","models":["opus","sonnet"]}"#
        );
    }

    #[test]
    fn query_includes_only_supplied_options() {
        let id = RequestId::new();
        let command = OutboundCommand::Query {
            id,
            prompt: "hi".to_string(),
            system_prompt: "sys".to_string(),
            cwd: None,
            mode: Some("ask".to_string()),
            model: None,
            resume: None,
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&command)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "query",
                "id": id.to_string(),
                "prompt": "hi",
                "systemPrompt": "sys",
                "mode": "ask",
            })
        );
    }

    #[test]
    fn newlines_inside_strings_stay_escaped() {
        let command = OutboundCommand::ToolResult {
            call_id: "c1".to_string(),
            result: "row 1\nrow 2".to_string(),
        };
        let line = encode_line(&command).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains(r#"row 1\nrow 2"#));
    }
}
