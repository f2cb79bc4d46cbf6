//! TOML configuration for the window and the presentation loop.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! [window]
//! title = "frameloop"
//! width = 1280
//! height = 720
//!
//! [presentation]
//! frames_in_flight = 2
//! present_mode = "fifo"
//! acquire_timeout_ms = 1000
//! rebuild_wait = "device-idle"
//! clear_color = [0.0, 0.0, 0.0, 1.0]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Largest accepted frames-in-flight count.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub presentation: PresentationConfig,
    pub debug: DebugConfig,
}

/// Initial window parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "frameloop".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Preferred presentation mode.
///
/// The preference is honoured only when the surface supports it; FIFO is
/// always available as the fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresentModeSetting {
    /// Never tears, never blocks the producer.
    #[default]
    Mailbox,
    /// Vsync; blocks when the queue is full.
    Fifo,
    /// May tear.
    Immediate,
}

/// What a chain rebuild waits for before touching the old chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebuildWait {
    /// Wait only on the frame-slot fences.
    #[default]
    InFlightFrames,
    /// Wait for the whole device to go idle.
    DeviceIdle,
}

/// Frame loop and presentation chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Number of frame slots (K).
    pub frames_in_flight: usize,
    pub present_mode: PresentModeSetting,
    /// Prefer an sRGB color format over UNORM.
    pub prefer_srgb: bool,
    /// Bound on fence waits and image acquisition. `None` blocks indefinitely.
    pub acquire_timeout_ms: Option<u64>,
    pub rebuild_wait: RebuildWait,
    /// RGBA clear value for the color attachment.
    pub clear_color: [f32; 4],
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_mode: PresentModeSetting::default(),
            prefer_srgb: true,
            acquire_timeout_ms: None,
            rebuild_wait: RebuildWait::default(),
            clear_color: [0.01, 0.01, 0.01, 1.0],
        }
    }
}

impl PresentationConfig {
    /// Acquire timeout as a duration, if one is configured.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Debug toggles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Enable validation layers. `None` enables them in debug builds.
    pub validation: Option<bool>,
    /// Overrides the default log filter when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl DebugConfig {
    /// Resolves the validation toggle against the build profile.
    pub fn validation_enabled(&self) -> bool {
        self.validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let frames = self.presentation.frames_in_flight;
        if frames == 0 || frames > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT, frames
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self
            .presentation
            .clear_color
            .iter()
            .any(|c| !(0.0..=1.0).contains(c))
        {
            return Err(Error::Config(format!(
                "clear_color components must be within [0, 1], got {:?}",
                self.presentation.clear_color
            )));
        }

        Ok(())
    }
}
