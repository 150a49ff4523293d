//! Configuration loading for the vault database.
//!
//! Configuration is loaded from a TOML file (default: `darkroom.toml`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML or misses required keys.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration for the vault database.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which all records and blobs live.
    pub root: PathBuf,
    /// Path of the wrapped master key file. Relative paths resolve
    /// against `root` (default: `master.key`).
    #[serde(default = "default_master_key_file")]
    pub master_key_file: PathBuf,
    /// Whether a missing master key file may be created at startup
    /// (default: true). Production setups that provision the key
    /// out-of-band set this to false so a misconfigured root fails loudly.
    #[serde(default = "default_allow_create_key")]
    pub allow_create_key: bool,
}

fn default_master_key_file() -> PathBuf {
    PathBuf::from("master.key")
}

fn default_allow_create_key() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Build a configuration for `root` with all defaults.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            master_key_file: default_master_key_file(),
            allow_create_key: default_allow_create_key(),
        }
    }

    /// The resolved master key path.
    pub fn master_key_path(&self) -> PathBuf {
        if self.master_key_file.is_absolute() {
            self.master_key_file.clone()
        } else {
            self.root.join(&self.master_key_file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg: Config = toml::from_str(r#"root = "/var/lib/darkroom""#).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/var/lib/darkroom"));
        assert_eq!(
            cfg.master_key_path(),
            PathBuf::from("/var/lib/darkroom/master.key")
        );
        assert!(cfg.allow_create_key);
    }

    #[test]
    fn absolute_key_path_is_kept() {
        let cfg: Config = toml::from_str(
            r#"
            root = "/var/lib/darkroom"
            master_key_file = "/etc/darkroom/master.key"
            allow_create_key = false
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.master_key_path(),
            PathBuf::from("/etc/darkroom/master.key")
        );
        assert!(!cfg.allow_create_key);
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(toml::from_str::<Config>("").is_err());
    }
}
