//! Configuration module
//!
//! Handles the TOML settings file: serial line parameters, meter address and
//! timeout, logging.

mod settings;

pub use settings::{AppConfig, LoggingConfig, MeterSettings, SerialSettings};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Name of the settings file inside [`config_dir`]
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Explicitly requested file does not exist
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// File could not be read or written
    #[error("config I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for [`AppConfig`]
    #[error("invalid config {path}: {source}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// Settings could not be serialized
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "meterpoll", "meterpoll")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the settings file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}
