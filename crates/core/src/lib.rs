//! Core utilities for frameloop.
//!
//! This crate provides foundational types and utilities used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Configuration management

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    Config, DebugConfig, MAX_FRAMES_IN_FLIGHT, PresentModeSetting, PresentationConfig,
    RebuildWait, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, init_logging, init_logging_with};
pub use timer::Timer;
