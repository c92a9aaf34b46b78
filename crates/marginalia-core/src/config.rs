//! Settings for the annotation store
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `config.toml` in the user config directory, or the file named by
//!    `MARGINALIA_CONFIG`
//! 3. `MARGINALIA_DATA_DIR`, `MARGINALIA_LOG_LEVEL`, `MARGINALIA_WRITE_WORKERS`
//!
//! Loading never creates directories; the store does that when opened.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "MARGINALIA";

const APP_DIR: &str = "marginalia";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of all stored data; annotations live in its `Annotations` folder
    pub data_dir: PathBuf,

    /// Filter level for `logging::init_logging`
    pub log_level: String,

    /// Log destination, `<data_dir>/marginalia.log` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Threads applying queued writes
    pub write_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_file: None,
            write_workers: 2,
        }
    }
}

impl Config {
    /// Defaults with a different data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from [`config_file_path`](Self::config_file_path) plus environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path` plus environment; a missing file means defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("Invalid settings in {:?}", path))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e).with_context(|| format!("Cannot read {:?}", path)),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse TOML text, then apply the environment
    pub fn load_from_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text).context("Invalid settings")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_value("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = env_value("LOG_LEVEL") {
            self.log_level = level;
        }
        // Unparseable counts are ignored; zero means one
        if let Some(workers) = env_value("WRITE_WORKERS").and_then(|v| v.parse::<usize>().ok()) {
            self.write_workers = workers.max(1);
        }
    }

    /// Write to [`config_file_path`](Self::config_file_path)
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Write to `path`, creating its parent directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {:?}", parent))?;
        }

        let text = toml::to_string_pretty(self).context("Cannot serialize settings")?;
        std::fs::write(path, text).with_context(|| format!("Cannot write {:?}", path))
    }

    /// Settings file location, overridable with `MARGINALIA_CONFIG`
    pub fn config_file_path() -> PathBuf {
        match env_value("CONFIG") {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("config.toml"),
        }
    }

    /// Directory holding one annotation file per document
    pub fn annotations_dir(&self) -> PathBuf {
        self.data_dir.join("Annotations")
    }

    pub fn log_path(&self) -> PathBuf {
        match &self.log_file {
            Some(path) => path.clone(),
            None => self.data_dir.join("marginalia.log"),
        }
    }
}

/// `MARGINALIA_<name>`, trimmed; empty values count as unset
fn env_value(name: &str) -> Option<String> {
    let value = std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `Marginalia` in the documents folder, else in local app data
fn default_data_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Marginalia")
}
