use std::io::Error as IoError;
/// Error types for configuration module
use thiserror::Error;
use toml::de::Error as TomlDeError;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file
    #[error("Failed to open configuration file: {0}")]
    FileOpenError(#[from] IoError),

    /// Failed to parse inline TOML configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] TomlDeError),

    /// Failed to merge configuration sources
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// Configuration file not found
    #[error("Configuration file not found at: {0}")]
    FileNotFound(String),

    /// A value is present but unusable
    #[error("Invalid configuration: {0}")]
    InvalidValue(String),

    /// Logging could not be set up
    #[error("Failed to initialize logging: {0}")]
    LoggingError(String),
}
