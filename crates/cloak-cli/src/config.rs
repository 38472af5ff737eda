use std::{
    fs,
    path::{Path, PathBuf},
};

use cloak_storage::DEFAULT_ALIAS;
use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/cloak/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the preference file.
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub keyring: KeyringConfig,
}

/// Where the key pair lives in the OS credential store.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyringConfig {
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_alias")]
    pub alias: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            file_name: default_file_name(),
            keyring: KeyringConfig::default(),
        }
    }
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            alias: default_alias(),
        }
    }
}

fn default_file_name() -> String {
    "preferences.json".to_string()
}

fn default_service() -> String {
    "cloak".to_string()
}

fn default_alias() -> String {
    DEFAULT_ALIAS.to_string()
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("cloak").join("config.toml"))
}

/// Write `config` to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.file_name, "preferences.json");
        assert_eq!(cfg.keyring.service, "cloak");
        assert_eq!(cfg.keyring.alias, DEFAULT_ALIAS);
    }

    #[test]
    fn returns_default_when_blank() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "  \n").expect("write temp config");
        assert_eq!(load_from_path(&path).expect("load"), Config::default());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/cloak-data"
            file_name = "work.json"
            [keyring]
            service = "cloak-work"
            alias = "work-key"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/tmp/cloak-data")),
                file_name: "work.json".into(),
                keyring: KeyringConfig {
                    service: "cloak-work".into(),
                    alias: "work-key".into(),
                },
            }
        );
    }

    #[test]
    fn partial_keyring_section_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[keyring]\nservice = \"other\"\n").expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(cfg.keyring.service, "other");
        assert_eq!(cfg.keyring.alias, DEFAULT_ALIAS);
        assert_eq!(cfg.file_name, "preferences.json");
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/cloak-data")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let other = Config::default();
        let second = write_to_path_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);
        let loaded: Config =
            toml::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded, cfg);
    }
}
