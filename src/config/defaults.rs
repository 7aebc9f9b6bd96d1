//! Default configuration values for agent-bridge.
//!
//! Used as serde field defaults and by `agent-bridge config` to print the
//! effective configuration.

use std::collections::BTreeMap;

pub const DEFAULT_STARTUP_MS: u64 = 30_000;
pub const DEFAULT_QUERY_MS: u64 = 90_000;
pub const DEFAULT_DRAIN_MS: u64 = 10_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;
pub const DEFAULT_STDERR_FLUSH_MS: u64 = 500;

pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// `node --jitless`: the JIT is disabled so the runtime works under hardened
/// runtime entitlements.
pub fn default_cmd() -> Vec<String> {
    vec!["node".to_string(), "--jitless".to_string()]
}

pub fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

pub fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([("NODE_NO_WARNINGS".to_string(), "1".to_string())])
}

pub fn default_env_remove() -> Vec<String> {
    vec!["CLAUDE_CODE_USE_VERTEX".to_string()]
}

pub fn default_oom_phrases() -> Vec<String> {
    vec![
        "FatalProcessOutOfMemory".to_string(),
        "JavaScript heap out of memory".to_string(),
    ]
}

pub fn default_oom_signals() -> Vec<String> {
    vec![
        "SIGKILL".to_string(),
        "SIGABRT".to_string(),
        "SIGTRAP".to_string(),
    ]
}

/// 128 + SIGABRT and 128 + SIGKILL, as reported by a wrapping shell.
pub fn default_oom_exit_codes() -> Vec<i32> {
    vec![134, 137]
}
