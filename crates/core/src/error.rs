//! Error types shared by the frameloop crates.

use thiserror::Error;

/// Main error type for window, configuration and process-level failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event loop errors
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan errors raised outside the RHI layer (surface creation, extension queries)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration values that parse but make no sense
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed configuration files
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the frameloop Error type.
pub type Result<T> = std::result::Result<T, Error>;
