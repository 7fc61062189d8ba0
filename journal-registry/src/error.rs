use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when working with the journal registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Error from the file system watcher
    #[error("File system watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error when reading or scanning directories
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the journal file reader
    #[error("Reader error: {0}")]
    Reader(#[from] journal_common::ReaderError),

    /// Error when a path contains invalid UTF-8
    #[error("Path contains invalid UTF-8: {}", .path.display())]
    InvalidUtf8 { path: PathBuf },

    /// The directory watcher task is no longer running
    #[error("Journal directory watcher is not running")]
    WatcherStopped,

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading or validating a [`RegistryConfig`](crate::RegistryConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A specialized Result type for journal registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
