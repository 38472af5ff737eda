use std::path::{Path, PathBuf};

use crate::config::Config;
use cloak_storage::{KeyringKeyStore, PreferenceFile, SecurePreferences};
use color_eyre::{eyre::WrapErr, Result};
use dirs::data_dir;
use tracing::debug;

/// Resolve the default data directory for Cloak.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("cloak"))
}

/// Preference file location: `--file` wins, then `data_dir` from config,
/// then the platform data directory.
pub fn preference_path(config: &Config, file: Option<&Path>) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file.to_path_buf());
    }
    let dir = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    Ok(dir.join(&config.file_name))
}

/// Open the preference file with the key pair from the OS keyring.
pub fn open_preferences(
    config: &Config,
    file: Option<&Path>,
) -> Result<SecurePreferences<PreferenceFile>> {
    let path = preference_path(config, file)?;
    debug!(?path, service = %config.keyring.service, "opening secure preferences");

    let store = PreferenceFile::open(&path)
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;
    let keys = KeyringKeyStore::new(&config.keyring.service);
    let prefs = SecurePreferences::open_with_alias(store, &keys, &config.keyring.alias)?;
    Ok(prefs)
}

/// Helper for tests: a preference file under `root` keyed by an in-memory store.
#[cfg(test)]
pub fn test_preferences(root: &Path) -> SecurePreferences<PreferenceFile> {
    let store = PreferenceFile::open(root.join("preferences.json")).expect("open test file");
    SecurePreferences::open(store, &cloak_storage::InMemoryKeyStore::new()).expect("test key")
}
