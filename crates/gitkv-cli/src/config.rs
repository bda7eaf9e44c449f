//! CLI settings.

use gitkv_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("backend {0} is not compiled in")]
    BackendUnavailable(&'static str),

    #[error("{} and {} are both .{ext} files", first.display(), second.display())]
    DuplicateExtension {
        ext: String,
        first: PathBuf,
        second: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Storage backend behind the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// In-process tables, discarded on exit.
    #[default]
    Memory,
    /// RocksDB database on local disk.
    Rocksdb,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackendSettings {
    pub kind: BackendKind,
    /// Database directory, required by `rocksdb`.
    pub path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings loaded from `-c <file>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub backend: BackendSettings,
    pub store: StoreConfig,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reads and validates a YAML settings file.
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.kind == BackendKind::Rocksdb && self.backend.path.is_none() {
            return Err(CliError::Invalid(
                "backend.path is required for the rocksdb backend".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(CliError::Invalid(format!(
                "unknown log level {:?}",
                self.logging.level
            )));
        }
        self.store
            .validate()
            .map_err(|e| CliError::Invalid(e.to_string()))
    }

    /// Points the settings at a RocksDB directory.
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.backend = BackendSettings {
            kind: BackendKind::Rocksdb,
            path: Some(path),
        };
        self
    }
}
