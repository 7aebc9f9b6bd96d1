pub mod defaults;
pub mod settings;
pub mod user;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use settings::{BridgeSettings, BridgeVariant, OomSettings, TimeoutSettings};
pub use user::{load_user_config, user_config_path};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load settings from every layer.
///
/// Layers: defaults < user config < `explicit` (later layers override
/// earlier). A broken user config is skipped with a warning; a broken
/// explicit file is an error.
pub fn load_settings(explicit: Option<&Path>) -> ConfigResult<BridgeSettings> {
    let user_layer = match load_user_config() {
        Ok(layer) => layer,
        Err(err) => {
            log::warn!(
                target: "agent_bridge::config",
                "Ignoring user config: {}",
                err
            );
            None
        }
    };
    let explicit_layer = explicit.map(read_table).transpose()?;

    settings_from_layers(&[user_layer, explicit_layer])
}

/// Merge layers over the defaults and validate the result.
pub fn settings_from_layers(layers: &[Option<toml::Table>]) -> ConfigResult<BridgeSettings> {
    let merged = merge_all(layers);
    let settings: BridgeSettings =
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;
    settings.validate()?;
    Ok(settings)
}

/// Deep-merge tables, later entries winning. Arrays are replaced, not
/// concatenated.
pub fn merge_all(layers: &[Option<toml::Table>]) -> toml::Table {
    layers
        .iter()
        .flatten()
        .cloned()
        .fold(toml::Table::new(), merge_tables)
}

fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(toml::Value::Table(fallback)), toml::Value::Table(primary)) => {
                toml::Value::Table(merge_tables(fallback, primary))
            }
            (_, primary) => primary,
        };
        base.insert(key, merged);
    }
    base
}

pub(crate) fn read_table(path: &Path) -> ConfigResult<toml::Table> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    contents.parse::<toml::Table>().map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
