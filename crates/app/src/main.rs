//! frameloop - Main Entry Point
//!
//! Opens a window and clears it every frame. Resizing, minimizing and
//! restoring the window exercise the chain rebuild path.
//!
//! Usage: `frameloop [config.toml]` (defaults to `frameloop.toml` when present).

use anyhow::{Context, Result};
use tracing::info;

use frameloop_core::Config;
use frameloop_platform::Window;
use frameloop_renderer::{FrameError, OrchestratorSettings, VulkanContext, VulkanFrameOrchestrator};

const DEFAULT_CONFIG_PATH: &str = "frameloop.toml";

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&path)
        .with_context(|| format!("failed to load configuration from {path}"))?;

    frameloop_core::init_logging_with(
        config
            .debug
            .log_filter
            .as_deref()
            .unwrap_or(frameloop_core::DEFAULT_LOG_FILTER),
    );
    info!("Starting frameloop");

    let window = Window::new(&config.window).context("failed to create window")?;
    let context = VulkanContext::new(&window, &config).context("failed to initialize Vulkan")?;
    let settings = OrchestratorSettings::from_config(&config.presentation);

    let mut frames = match VulkanFrameOrchestrator::new(context, window, settings) {
        Ok(frames) => frames,
        Err(FrameError::SurfaceClosed) => {
            info!("Window closed before the first frame");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to create frame orchestrator"),
    };

    info!("Initialization complete, entering main loop");

    while frames.surface_mut().poll_events() {
        match frames.tick(|_cmd, _info| {}) {
            Ok(_) => {}
            Err(FrameError::SurfaceClosed) => break,
            Err(e) => return Err(e).context("frame loop failed"),
        }
    }

    info!("Close requested, shutting down after {} frames", frames.frame_counter());
    Ok(())
}
