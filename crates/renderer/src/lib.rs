//! Frame loop for frameloop.
//!
//! This crate drives presentation:
//! - [`FrameOrchestrator`] runs the acquire / record / submit / present cycle
//!   over K frame slots and rebuilds the chain when it goes stale
//! - [`VulkanContext`] is the Vulkan device context the orchestrator runs on
//!
//! The orchestrator is generic over the
//! [`DeviceContext`](frameloop_rhi::DeviceContext) and
//! [`SurfaceProvider`](frameloop_platform::SurfaceProvider) seams.

mod error;
mod frame;
mod orchestrator;
mod vulkan_context;

pub use error::{FrameError, FrameResult};
pub use frame::{FrameInfo, FrameState};
pub use orchestrator::{FrameOrchestrator, OrchestratorSettings};
pub use vulkan_context::{VulkanContext, chain_settings, present_mode};

/// Orchestrator running on Vulkan and a winit window.
pub type VulkanFrameOrchestrator =
    FrameOrchestrator<VulkanContext, frameloop_platform::Window>;
