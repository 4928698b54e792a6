//! Error handling for the LinkChat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Link error: {0}")]
    Link(#[from] linkchat_core::LinkError),

    #[error("BLE error: {0}")]
    Ble(#[from] linkchat_ble::BleLinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Link driver failed: {0}")]
    Driver(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
