//! Persisted configuration storage.
//!
//! The engine persists exactly one value across process restarts: the last
//! kill-switch instruction received from the server. Storage is a port so
//! hosts can plug in their own key-value store; the default implementation
//! writes an INI file under the user's config directory.

use ini::Ini;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// INI section holding engine state.
const SECTION: &str = "bidding";

/// Key of the cached kill-switch flag.
const KILL_SWITCH_KEY: &str = "killSwitchCached";

/// Configuration storage errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write the config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Failed to create the config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Key-value store for the engine's persisted state.
pub trait ConfigStorage: Send + Sync {
    /// Last persisted kill-switch flag, if any.
    fn get_cached_kill_switch(&self) -> Option<bool>;

    /// Persist the kill-switch flag.
    fn put_cached_kill_switch(&self, enabled: bool) -> Result<(), ConfigFileError>;
}

/// Default location of the persisted config file.
pub fn default_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(".bidvault").join("config.ini")
}

/// INI-file-backed storage.
///
/// Reads tolerate a missing or unreadable file (the flag is simply not
/// known yet); writes create the parent directory on demand.
pub struct IniFileStorage {
    path: PathBuf,
}

impl IniFileStorage {
    /// Create storage over the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Option<Ini> {
        if !self.path.exists() {
            return None;
        }
        match Ini::load_from_file(&self.path) {
            Ok(ini) => Some(ini),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable config file, ignoring");
                None
            }
        }
    }
}

impl ConfigStorage for IniFileStorage {
    fn get_cached_kill_switch(&self) -> Option<bool> {
        let ini = self.load()?;
        let value = ini.section(Some(SECTION))?.get(KILL_SWITCH_KEY)?;
        match value.parse::<bool>() {
            Ok(flag) => Some(flag),
            Err(_) => {
                warn!(value, "Invalid persisted kill-switch value, ignoring");
                None
            }
        }
    }

    fn put_cached_kill_switch(&self, enabled: bool) -> Result<(), ConfigFileError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let mut ini = self.load().unwrap_or_else(Ini::new);
        ini.with_section(Some(SECTION))
            .set(KILL_SWITCH_KEY, enabled.to_string());
        ini.write_to_file(&self.path)
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }
}

/// In-memory storage for tests and hosts without a writable filesystem.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    kill_switch: Mutex<Option<bool>>,
}

impl InMemoryStorage {
    /// Create empty storage (no persisted flag).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-seeded with a persisted flag.
    pub fn with_kill_switch(enabled: bool) -> Self {
        Self {
            kill_switch: Mutex::new(Some(enabled)),
        }
    }
}

impl ConfigStorage for InMemoryStorage {
    fn get_cached_kill_switch(&self) -> Option<bool> {
        *self.kill_switch.lock().unwrap()
    }

    fn put_cached_kill_switch(&self, enabled: bool) -> Result<(), ConfigFileError> {
        *self.kill_switch.lock().unwrap() = Some(enabled);
        Ok(())
    }
}
