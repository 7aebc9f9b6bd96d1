//! Spawning the agent process.
//!
//! Resolves the configured program and script, derives the child
//! environment, and spawns with all three stdio streams piped.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};

/// A resolved program invocation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LaunchPlan {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<OsString>,
    pub(crate) env: BTreeMap<OsString, OsString>,
}

impl LaunchPlan {
    /// Check preconditions and build the invocation.
    pub(crate) fn resolve(settings: &BridgeSettings) -> BridgeResult<Self> {
        let (name, leading) = settings.cmd.split_first().ok_or_else(|| {
            BridgeError::ChildBinaryNotFound {
                command: String::new(),
            }
        })?;
        let program = resolve_program(name, std::env::var_os("PATH").as_deref())?;

        let mut args: Vec<OsString> = leading.iter().map(OsString::from).collect();
        if let Some(script) = &settings.script {
            if !script.is_file() {
                return Err(BridgeError::BridgeScriptNotFound {
                    path: script.clone(),
                });
            }
            args.push(script.clone().into_os_string());
        }

        let env = derive_environment(settings, std::env::vars_os(), program.parent());
        Ok(Self { program, args, env })
    }

    pub(crate) fn spawn(&self) -> BridgeResult<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BridgeError::ChildBinaryNotFound {
                command: self.program.display().to_string(),
            },
            _ => BridgeError::spawn(format!(
                "Failed to spawn process '{}': {}",
                self.program.display(),
                e
            )),
        })
    }
}

/// Find `name` on `search_path` unless it already contains a separator.
pub(crate) fn resolve_program(
    name: &str,
    search_path: Option<&std::ffi::OsStr>,
) -> BridgeResult<PathBuf> {
    let not_found = || BridgeError::ChildBinaryNotFound {
        command: name.to_string(),
    };
    if name.trim().is_empty() {
        return Err(not_found());
    }

    let candidate = Path::new(name);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    search_path
        .into_iter()
        .flat_map(|value| std::env::split_paths(value))
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
        .ok_or_else(not_found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Compute the child environment from the host environment `base`.
///
/// - the API key variable is removed unless `passApiKey` is set
/// - `envRemove` entries are removed, then `env` entries are set
/// - `program_dir` is prepended to `PATH` when missing, so a bundled
///   runtime finds its sibling tools
pub(crate) fn derive_environment<I>(
    settings: &BridgeSettings,
    base: I,
    program_dir: Option<&Path>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = base.into_iter().collect();

    if !settings.pass_api_key {
        env.remove(&OsString::from(&settings.api_key_env));
    }
    for key in &settings.env_remove {
        env.remove(&OsString::from(key));
    }
    for (key, value) in &settings.env {
        env.insert(OsString::from(key), OsString::from(value));
    }

    if let Some(dir) = program_dir.filter(|d| !d.as_os_str().is_empty()) {
        let path_key = OsString::from("PATH");
        let mut entries: Vec<PathBuf> = env
            .get(&path_key)
            .map(|value| std::env::split_paths(value).collect())
            .unwrap_or_default();
        if !entries.iter().any(|entry| entry == dir) {
            entries.insert(0, dir.to_path_buf());
            match std::env::join_paths(entries) {
                Ok(joined) => {
                    env.insert(path_key, joined);
                }
                Err(e) => log::warn!(
                    target: "agent_bridge::bridge::supervisor",
                    "Leaving PATH unchanged: {}",
                    e
                ),
            }
        }
    }

    env
}
