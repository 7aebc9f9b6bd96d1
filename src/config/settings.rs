use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use super::defaults::*;

/// Which flavour of agent script sits on the other end of the pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeVariant {
    /// Agent client protocol bridge: supports the auth handshake
    #[default]
    Acp,
    /// Agent SDK bridge: no auth handshake, supports `resume`
    AgentSdk,
}

impl BridgeVariant {
    pub fn supports_auth(self) -> bool {
        matches!(self, BridgeVariant::Acp)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeSettings {
    pub variant: BridgeVariant,
    /// Program and leading arguments
    pub cmd: Vec<String>,
    /// Bridge script appended after `cmd`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    /// Forward the API key variable to the child
    pub pass_api_key: bool,
    pub api_key_env: String,
    pub env: BTreeMap<String, String>,
    pub env_remove: Vec<String>,
    pub timeouts: TimeoutSettings,
    pub oom: OomSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            variant: BridgeVariant::default(),
            cmd: default_cmd(),
            script: None,
            pass_api_key: false,
            api_key_env: default_api_key_env(),
            env: default_env(),
            env_remove: default_env_remove(),
            timeouts: TimeoutSettings::default(),
            oom: OomSettings::default(),
        }
    }
}

impl BridgeSettings {
    /// Settings that launch `cmd` directly, without a script.
    pub fn with_command<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cmd.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "cmd must name a program".to_string(),
            ));
        }
        self.timeouts.validate()
    }
}

/// Wait windows, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutSettings {
    /// Wait for `init` after spawn
    pub startup_ms: u64,
    /// Wait for each message during a query
    pub query_ms: u64,
    /// Wait for the terminal message after an interrupt during a tool call
    pub drain_ms: u64,
    /// Between SIGTERM and SIGKILL on stop
    pub shutdown_grace_ms: u64,
    /// For stdout/stderr to reach EOF after the process exits
    pub stderr_flush_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            startup_ms: DEFAULT_STARTUP_MS,
            query_ms: DEFAULT_QUERY_MS,
            drain_ms: DEFAULT_DRAIN_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            stderr_flush_ms: DEFAULT_STDERR_FLUSH_MS,
        }
    }
}

impl TimeoutSettings {
    pub fn startup(&self) -> Duration {
        Duration::from_millis(self.startup_ms)
    }

    pub fn query(&self) -> Duration {
        Duration::from_millis(self.query_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn stderr_flush(&self) -> Duration {
        Duration::from_millis(self.stderr_flush_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("startupMs", self.startup_ms),
            ("queryMs", self.query_ms),
            ("drainMs", self.drain_ms),
            ("shutdownGraceMs", self.shutdown_grace_ms),
            ("stderrFlushMs", self.stderr_flush_ms),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Evidence that a termination was an out-of-memory kill.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OomSettings {
    /// Literal substrings searched for in stderr
    pub phrases: Vec<String>,
    /// Signal names (`SIGKILL`) or numbers
    pub signals: Vec<String>,
    pub exit_codes: Vec<i32>,
}

impl Default for OomSettings {
    fn default() -> Self {
        Self {
            phrases: default_oom_phrases(),
            signals: default_oom_signals(),
            exit_codes: default_oom_exit_codes(),
        }
    }
}
