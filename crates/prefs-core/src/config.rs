use crate::contracts::{DEFAULT_FILE_SUFFIX, DEFAULT_LEGACY_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "PREFS_CONFIG_PATH";
pub const STATE_DIR_ENV: &str = "PREFS_STATE_DIR";
pub const LEGACY_DIR_ENV: &str = "PREFS_LEGACY_DIR";
pub const DEFAULT_SCOPE: &str = "instance";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to write {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefsConfig {
    pub state_location: Option<PathBuf>,
    pub legacy_location: Option<PathBuf>,
    pub file_suffix: String,
    pub legacy_file_name: String,
    pub scope: String,
}

impl Default for PrefsConfig {
    fn default() -> Self {
        Self {
            state_location: None,
            legacy_location: None,
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            legacy_file_name: DEFAULT_LEGACY_FILE_NAME.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
        }
    }
}

impl PrefsConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads from `explicit`, else the default config path, then applies
    /// environment overrides.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => config_path(),
        };
        let mut config = Self::load(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = non_empty_env(STATE_DIR_ENV) {
            self.state_location = Some(PathBuf::from(dir));
        }
        if let Some(dir) = non_empty_env(LEGACY_DIR_ENV) {
            self.legacy_location = Some(PathBuf::from(dir));
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |reason: String| ConfigError::Write {
            path: path.to_path_buf(),
            reason,
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|err| write_error(err.to_string()))?;
        let contents = toml::to_string_pretty(self).map_err(|err| write_error(err.to_string()))?;
        let temp = tempfile::NamedTempFile::new_in(dir).map_err(|err| write_error(err.to_string()))?;
        fs::write(temp.path(), contents).map_err(|err| write_error(err.to_string()))?;
        temp.persist(path)
            .map_err(|err| write_error(err.error.to_string()))?;
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    if let Some(path) = non_empty_env(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prefs/config.toml")
}

fn non_empty_env(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}
