//! Config loading.

use std::path::PathBuf;

use tracing::info;

use crate::config::Config;
use crate::error::CoreError;

/// Load configuration from the given path, or the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&str>) -> Result<Config, CoreError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| CoreError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("mconnect-indicator")
}

fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[indicator]\nshow-unallowed = true\n").unwrap();
        assert!(load_config(path.to_str()).unwrap().indicator.show_unallowed);
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[indicator\n").unwrap();
        assert!(matches!(load_config(path.to_str()), Err(CoreError::Config(_))));
    }

    #[test]
    fn config_dir_is_namespaced() {
        assert!(config_dir().ends_with("mconnect-indicator"));
    }
}
