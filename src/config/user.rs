//! User configuration loading for agent-bridge.
//!
//! User config location: $XDG_CONFIG_HOME/agent-bridge/agent-bridge.toml
//! Fallback: the platform config directory (`dirs::config_dir()`).

use std::path::PathBuf;

use super::{ConfigResult, read_table};

const APP_DIR: &str = "agent-bridge";
const FILE_NAME: &str = "agent-bridge.toml";

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/agent-bridge/agent-bridge.toml
/// 2. Otherwise: <platform config dir>/agent-bridge/agent-bridge.toml
///
/// Returns None if neither can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg_config) if !xdg_config.is_empty() => PathBuf::from(xdg_config),
        _ => dirs::config_dir()?,
    };
    Some(base.join(APP_DIR).join(FILE_NAME))
}

/// Load the user config layer, if the file exists.
pub fn load_user_config() -> ConfigResult<Option<toml::Table>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    read_table(&path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct XdgGuard(Option<std::ffi::OsString>);

    impl XdgGuard {
        fn set(value: &std::path::Path) -> Self {
            let original = env::var_os("XDG_CONFIG_HOME");
            // SAFETY: serialized via #[serial]; no other thread reads the env concurrently
            unsafe {
                env::set_var("XDG_CONFIG_HOME", value);
            }
            Self(original)
        }
    }

    impl Drop for XdgGuard {
        fn drop(&mut self) {
            // SAFETY: same as above, restoring original env state
            unsafe {
                match self.0.take() {
                    Some(val) => env::set_var("XDG_CONFIG_HOME", val),
                    None => env::remove_var("XDG_CONFIG_HOME"),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn user_config_path_uses_xdg_config_home_when_set() {
        let _guard = XdgGuard::set(std::path::Path::new("/custom/config"));

        assert_eq!(
            user_config_path(),
            Some(PathBuf::from("/custom/config/agent-bridge/agent-bridge.toml"))
        );
    }

    #[test]
    #[serial]
    fn missing_user_config_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = XdgGuard::set(dir.path());

        assert!(load_user_config().unwrap().is_none());
    }

    #[test]
    #[serial]
    fn user_config_is_read_as_table() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(APP_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(FILE_NAME), "passApiKey = true\n").unwrap();
        let _guard = XdgGuard::set(dir.path());

        let table = load_user_config().unwrap().unwrap();
        assert_eq!(table.get("passApiKey"), Some(&toml::Value::Boolean(true)));
    }
}
