//! Scripted stand-in for the agent child process.
//!
//! A `FakeAgent` renders a POSIX `sh` script that prints `init`, then reads
//! commands line by line and answers each one through the first matching
//! rule. Patterns are matched as substrings of the raw JSON command line.

use std::path::{Path, PathBuf};

use agent_bridge::BridgeSettings;
use agent_bridge::config::TimeoutSettings;
use serde_json::Value;

pub const SESSION_ID: &str = "fake-session";

/// Shell statement printing `message` as one line on stdout.
pub fn emit(message: &Value) -> String {
    let line = message.to_string();
    assert!(!line.contains('\''), "fake agent output must not contain single quotes");
    format!("printf '%s\\n' '{}'", line)
}

pub struct FakeAgent {
    startup: Vec<String>,
    rules: Vec<(String, String)>,
    stdin_log: Option<PathBuf>,
}

impl Default for FakeAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAgent {
    pub fn new() -> Self {
        Self {
            startup: vec![emit(&serde_json::json!({
                "type": "init",
                "sessionId": SESSION_ID,
            }))],
            rules: Vec::new(),
            stdin_log: None,
        }
    }

    /// An agent that never reports `init`.
    pub fn silent() -> Self {
        Self {
            startup: Vec::new(),
            rules: Vec::new(),
            stdin_log: None,
        }
    }

    /// Extra shell run after `init` is printed.
    pub fn on_startup(mut self, shell: impl Into<String>) -> Self {
        self.startup.push(shell.into());
        self
    }

    /// Answer commands containing `pattern` with `replies`, in order.
    pub fn reply(self, pattern: &str, replies: &[Value]) -> Self {
        let body = replies.iter().map(emit).collect::<Vec<_>>().join("\n      ");
        self.on(pattern, body)
    }

    /// Run arbitrary shell for commands containing `pattern`.
    pub fn on(mut self, pattern: &str, shell: impl Into<String>) -> Self {
        assert!(
            !pattern.contains(['\'', '*', '?', '[']),
            "patterns are matched literally"
        );
        self.rules.push((pattern.to_string(), shell.into()));
        self
    }

    /// Append every command line received to `path`.
    pub fn log_stdin(mut self, path: &Path) -> Self {
        assert!(!path.to_string_lossy().contains('\''));
        self.stdin_log = Some(path.to_path_buf());
        self
    }

    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");
        for line in &self.startup {
            script.push_str(line);
            script.push('\n');
        }
        script.push_str("while IFS= read -r line; do\n");
        if let Some(log) = &self.stdin_log {
            script.push_str(&format!("  printf '%s\\n' \"$line\" >> '{}'\n", log.display()));
        }
        script.push_str("  case \"$line\" in\n");
        for (pattern, body) in &self.rules {
            script.push_str(&format!("    *'{}'*)\n      {}\n      ;;\n", pattern, body));
        }
        script.push_str("    *'\"type\":\"stop\"'*)\n      exit 0\n      ;;\n");
        script.push_str("  esac\ndone\n");
        script
    }

    /// Write the script into `dir` and return its path.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join("fake_agent.sh");
        std::fs::write(&path, self.render()).expect("write fake agent script");
        path
    }

    /// Settings launching this agent through `sh` with short timeouts.
    pub fn settings(&self, dir: &Path) -> BridgeSettings {
        settings_for_script(self.write(dir))
    }
}

pub fn fast_timeouts() -> TimeoutSettings {
    TimeoutSettings {
        startup_ms: 3_000,
        query_ms: 3_000,
        drain_ms: 1_000,
        shutdown_grace_ms: 500,
        stderr_flush_ms: 500,
    }
}

pub fn settings_for_script(script: PathBuf) -> BridgeSettings {
    BridgeSettings {
        script: Some(script),
        timeouts: fast_timeouts(),
        ..BridgeSettings::with_command(["sh"])
    }
}
