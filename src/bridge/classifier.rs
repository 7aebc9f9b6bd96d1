//! Crash and out-of-memory classification for agent process terminations.
//!
//! The agent runtime reports heap exhaustion on stderr before dying, and the
//! OS reports memory kills as specific signals. Either evidence turns a plain
//! `ProcessExited` into `OutOfMemory`. Classification only picks the error
//! variant; the supervisor never restarts on its own.

use std::fmt;
use std::process::ExitStatus;

use regex::RegexSet;

use crate::config::OomSettings;
use crate::error::BridgeError;

/// How a child process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code when the process exited normally
    pub code: Option<i32>,
    /// Terminating signal (Unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn from_status(status: &ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (_, Some(signal)) => match signal_name(signal) {
                Some(name) => write!(f, "signal {} ({})", signal, name),
                None => write!(f, "signal {}", signal),
            },
            (Some(code), None) => write!(f, "exit code {}", code),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> Option<&'static str> {
    nix::sys::signal::Signal::try_from(signal)
        .ok()
        .map(|s| s.as_str())
}

#[cfg(not(unix))]
fn signal_name(_signal: i32) -> Option<&'static str> {
    None
}

/// Parse `"SIGKILL"` or `"9"` into a signal number.
fn parse_signal(name: &str) -> Option<i32> {
    if let Ok(number) = name.parse::<i32>() {
        return Some(number);
    }
    #[cfg(unix)]
    {
        use std::str::FromStr;
        nix::sys::signal::Signal::from_str(name)
            .ok()
            .map(|s| s as i32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Decides between `ProcessExited` and `OutOfMemory`.
#[derive(Debug, Clone)]
pub struct OomClassifier {
    phrases: Option<RegexSet>,
    signals: Vec<i32>,
    exit_codes: Vec<i32>,
}

impl OomClassifier {
    pub fn new(settings: &OomSettings) -> Self {
        let patterns: Vec<String> = settings
            .phrases
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(p))
            .collect();
        let phrases = if patterns.is_empty() {
            None
        } else {
            match RegexSet::new(&patterns) {
                Ok(set) => Some(set),
                Err(e) => {
                    log::warn!(
                        target: "agent_bridge::bridge::classifier",
                        "Ignoring OOM phrases, failed to compile: {}",
                        e
                    );
                    None
                }
            }
        };

        let mut signals = Vec::new();
        for name in &settings.signals {
            match parse_signal(name) {
                Some(signal) => signals.push(signal),
                None => log::warn!(
                    target: "agent_bridge::bridge::classifier",
                    "Ignoring unknown OOM signal name: {}",
                    name
                ),
            }
        }

        Self {
            phrases,
            signals,
            exit_codes: settings.exit_codes.clone(),
        }
    }

    /// True if this stderr text carries a heap-exhaustion signature.
    pub fn matches_stderr(&self, text: &str) -> bool {
        self.phrases
            .as_ref()
            .is_some_and(|set| set.is_match(text))
    }

    /// True if the exit itself looks like a memory kill.
    pub fn is_oom_exit(&self, exit: ExitInfo) -> bool {
        if let Some(signal) = exit.signal {
            return self.signals.contains(&signal);
        }
        exit.code.is_some_and(|code| self.exit_codes.contains(&code))
    }

    /// Produce the error raised to a waiting caller after a termination.
    pub fn classify(&self, stderr_flagged: bool, exit: ExitInfo) -> BridgeError {
        if stderr_flagged || self.is_oom_exit(exit) {
            BridgeError::OutOfMemory { exit }
        } else {
            BridgeError::ProcessExited { exit }
        }
    }
}

impl Default for OomClassifier {
    fn default() -> Self {
        Self::new(&OomSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::v8_fatal("<--- Last few GCs ---> FatalProcessOutOfMemory", true)]
    #[case::node_heap(
        "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory",
        true
    )]
    #[case::ordinary_warning("(node:123) ExperimentalWarning: fetch is experimental", false)]
    #[case::empty("", false)]
    fn stderr_signatures(#[case] text: &str, #[case] expected: bool) {
        let classifier = OomClassifier::default();
        assert_eq!(classifier.matches_stderr(text), expected);
    }

    #[rstest]
    #[case::clean_exit(ExitInfo::with_code(0), false)]
    #[case::error_exit(ExitInfo::with_code(1), false)]
    #[case::shell_abort(ExitInfo::with_code(134), true)]
    #[case::shell_kill(ExitInfo::with_code(137), true)]
    #[case::unknown(ExitInfo::unknown(), false)]
    fn exit_code_classification(#[case] exit: ExitInfo, #[case] expected: bool) {
        assert_eq!(OomClassifier::default().is_oom_exit(exit), expected);
    }

    #[cfg(unix)]
    #[rstest]
    #[case::sigkill(9, true)]
    #[case::sigabrt(6, true)]
    #[case::sigtrap(5, true)]
    #[case::sigterm(15, false)]
    #[case::sigsegv(11, false)]
    fn signal_classification(#[case] signal: i32, #[case] expected: bool) {
        assert_eq!(
            OomClassifier::default().is_oom_exit(ExitInfo::with_signal(signal)),
            expected
        );
    }

    #[test]
    fn stderr_flag_wins_over_clean_exit_code() {
        let classifier = OomClassifier::default();
        let exit = ExitInfo::with_code(1);
        assert_eq!(
            classifier.classify(true, exit),
            BridgeError::OutOfMemory { exit }
        );
        assert_eq!(
            classifier.classify(false, exit),
            BridgeError::ProcessExited { exit }
        );
    }

    #[test]
    fn custom_settings_replace_defaults() {
        let settings = OomSettings {
            phrases: vec!["MemoryError".to_string()],
            signals: vec!["15".to_string(), "NOT_A_SIGNAL".to_string()],
            exit_codes: vec![],
        };
        let classifier = OomClassifier::new(&settings);
        assert!(classifier.matches_stderr("Traceback ... MemoryError"));
        assert!(!classifier.matches_stderr("FatalProcessOutOfMemory"));
        assert!(classifier.is_oom_exit(ExitInfo::with_signal(15)));
        assert!(!classifier.is_oom_exit(ExitInfo::with_code(137)));
    }

    #[test]
    fn phrases_are_matched_literally() {
        let settings = OomSettings {
            phrases: vec!["out of memory (heap)".to_string()],
            signals: vec![],
            exit_codes: vec![],
        };
        let classifier = OomClassifier::new(&settings);
        assert!(classifier.matches_stderr("fatal: out of memory (heap)"));
        assert!(!classifier.matches_stderr("fatal: out of memory heap"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_info_display_names_signals() {
        assert_eq!(ExitInfo::with_signal(9).to_string(), "signal 9 (SIGKILL)");
        assert_eq!(ExitInfo::with_code(3).to_string(), "exit code 3");
        assert_eq!(ExitInfo::unknown().to_string(), "unknown exit status");
    }
}
