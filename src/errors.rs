// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkytestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SkytestError {
    /// True for errors that should abort the run with exit code 2.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SkytestError::Config(_) | SkytestError::Toml(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SkytestError>;
