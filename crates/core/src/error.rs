//! Error types shared by the kiln crates.

use thiserror::Error;

/// Main error type for configuration and setup.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is out of range or inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// A configuration file could not be parsed.
    #[error("Failed to parse config: {0}")]
    ConfigParse(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the kiln core Error type.
pub type Result<T> = std::result::Result<T, Error>;
