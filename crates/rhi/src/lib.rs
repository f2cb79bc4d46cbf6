//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, physical device and logical device creation
//! - Presentation chains (swapchain, depth buffers, framebuffers)
//! - The render-target pass
//! - Command pools and recording
//! - Synchronization primitives and frame slots
//!
//! The [`present`] module holds the backend-neutral traits the frame
//! orchestrator is written against.

mod error;

pub mod command;
pub mod depth_buffer;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod present;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};
pub use present::{
    AcquireOutcome, ChainPlan, ChainPreferences, DeviceContext, PresentOutcome,
    PresentationChain, SurfaceSupport, plan_chain,
};

// Re-export ash types that users might need
pub use ash::vk;
