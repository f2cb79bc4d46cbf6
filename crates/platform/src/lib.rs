//! Platform layer for frameloop.
//!
//! This crate provides:
//! - A winit window that owns and pumps its own event loop
//! - The [`SurfaceProvider`] seam used by the frame orchestrator
//! - Vulkan surface creation and the instance extensions it needs

mod provider;
mod window;

pub use provider::SurfaceProvider;
pub use window::{Surface, Window, required_extensions};
