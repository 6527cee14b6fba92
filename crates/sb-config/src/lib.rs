//! sb-config: device configuration file format and validation.
//!
//! One YAML file per device, loaded and validated once at startup and then
//! handed to each component by reference.

pub mod schema;
pub mod validate;

pub use schema::*;
pub use validate::{LATEST_VERSION, MAX_REPLAY_MULTIPLIER, ValidationError, validate_config};

use std::path::{Path, PathBuf};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("API key not configured (set sync.api_key or the variable named by sync.api_key_env)")]
    MissingApiKey,
}

/// Load, resolve relative paths against the file's directory, and validate.
pub fn load_yaml(path: &Path) -> ConfigResult<DeviceConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_yaml(&content)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    validate_config(&config)?;
    tracing::info!(
        path = %path.display(),
        device_id = %config.device_id,
        "loaded device config"
    );
    Ok(config)
}

/// Parse without path resolution or validation.
pub fn parse_yaml(content: &str) -> ConfigResult<DeviceConfig> {
    Ok(serde_yaml::from_str(content)?)
}

pub fn save_yaml(path: &Path, config: &DeviceConfig) -> ConfigResult<()> {
    validate_config(config)?;
    let content = serde_yaml::to_string(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The API key from `sync.api_key`, else from the variable named by
/// `sync.api_key_env`.
pub fn resolve_api_key(sync: &SyncDef) -> ConfigResult<String> {
    if let Some(key) = sync.api_key.as_deref().filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    sync.api_key_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
        .filter(|k| !k.is_empty())
        .ok_or(ConfigError::MissingApiKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_key_wins() {
        let sync = SyncDef {
            api_key: Some("abc".to_string()),
            api_key_env: Some("SB_CONFIG_TEST_UNSET_VARIABLE".to_string()),
            ..SyncDef::default()
        };
        assert_eq!(resolve_api_key(&sync).unwrap(), "abc");
    }

    #[test]
    fn missing_key_is_reported() {
        let sync = SyncDef {
            api_key: Some(String::new()),
            api_key_env: Some("SB_CONFIG_TEST_UNSET_VARIABLE".to_string()),
            ..SyncDef::default()
        };
        assert!(matches!(resolve_api_key(&sync), Err(ConfigError::MissingApiKey)));
    }
}
