//! Backend-neutral presentation seams.
//!
//! The frame orchestrator drives presentation through two traits:
//!
//! - [`DeviceContext`] owns command buffer allocation, frame slot creation and
//!   builds new [`PresentationChain`]s.
//! - [`PresentationChain`] owns the presentable images and runs the
//!   acquire / submit / present protocol for one frame slot at a time.
//!
//! Staleness is a control-flow value here ([`AcquireOutcome`], [`PresentOutcome`]),
//! never an error. The surface-capability negotiation lives in [`plan_chain`],
//! a pure function shared by the Vulkan chain and by test doubles.

use std::time::Duration;

use ash::vk;
use tracing::{debug, warn};

use crate::error::{RhiError, RhiResult};

/// Result of asking the chain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image is usable and the chain matches the surface.
    Ready(u32),
    /// The image is usable but the chain should be rebuilt after this frame.
    Suboptimal(u32),
    /// The chain can no longer present; nothing was acquired.
    OutOfDate,
}

impl AcquireOutcome {
    /// Returns the acquired image index, if any.
    pub fn image_index(self) -> Option<u32> {
        match self {
            Self::Ready(index) | Self::Suboptimal(index) => Some(index),
            Self::OutOfDate => None,
        }
    }
}

/// Result of submitting and presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Success,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// True when the chain should be rebuilt.
    #[inline]
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Owns the presentable images of one surface and the protocol to use them.
///
/// A chain never waits on or resets a frame slot it was not handed, and a
/// caller must not acquire twice on the same slot without a `submit` between.
pub trait PresentationChain {
    /// Handle of a primary command buffer.
    type CommandBuffer: Copy;
    /// Per-frame synchronization bundle.
    type FrameSlot;

    /// Waits on the slot's in-flight fence, then acquires the next image,
    /// signalling the slot's image-available semaphore.
    fn acquire_next_image(&mut self, slot: &Self::FrameSlot) -> RhiResult<AcquireOutcome>;

    /// Submits `command_buffer` for `image_index` and presents it.
    ///
    /// The submission waits on the slot's image-available semaphore and
    /// signals its render-finished semaphore and in-flight fence.
    fn submit(
        &mut self,
        command_buffer: Self::CommandBuffer,
        image_index: u32,
        slot: &Self::FrameSlot,
    ) -> RhiResult<PresentOutcome>;

    /// Begins the render-target pass on `image_index` and sets viewport and
    /// scissor to the chain extent.
    fn begin_render_pass(&self, command_buffer: Self::CommandBuffer, image_index: u32)
    -> RhiResult<()>;

    /// Ends the render-target pass.
    fn end_render_pass(&self, command_buffer: Self::CommandBuffer);

    fn render_pass(&self) -> vk::RenderPass;

    /// Fails with [`RhiError::IndexOutOfRange`] when `image_index >= image_count()`.
    fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer>;

    fn extent(&self) -> vk::Extent2D;

    fn format(&self) -> vk::Format;

    fn present_mode(&self) -> vk::PresentModeKHR;

    fn image_count(&self) -> u32;
}

/// Device-side services the frame orchestrator needs.
pub trait DeviceContext {
    type CommandBuffer: Copy;
    type FrameSlot;
    type Chain: PresentationChain<CommandBuffer = Self::CommandBuffer, FrameSlot = Self::FrameSlot>;

    /// Builds a chain for `extent`. `previous`, if given, is still alive and
    /// is retired by the new chain; the caller drops it afterwards.
    fn create_chain(
        &mut self,
        extent: vk::Extent2D,
        previous: Option<&Self::Chain>,
    ) -> RhiResult<Self::Chain>;

    fn create_frame_slot(&mut self) -> RhiResult<Self::FrameSlot>;

    /// Blocks until the slot's in-flight fence is signaled.
    fn wait_for_frame_slot(&self, slot: &Self::FrameSlot) -> RhiResult<()>;

    fn allocate_command_buffers(&mut self, count: u32) -> RhiResult<Vec<Self::CommandBuffer>>;

    /// The buffers must not be pending on the GPU.
    fn free_command_buffers(&mut self, buffers: &[Self::CommandBuffer]);

    /// Resets the buffer and begins one-time-submit recording.
    fn begin_recording(&self, command_buffer: Self::CommandBuffer) -> RhiResult<()>;

    fn end_recording(&self, command_buffer: Self::CommandBuffer) -> RhiResult<()>;

    /// Allocates and begins a one-off command buffer for work outside the frame loop.
    fn begin_single_use(&mut self) -> RhiResult<Self::CommandBuffer>;

    /// Ends, submits and waits for a buffer from [`DeviceContext::begin_single_use`], then frees it.
    fn end_single_use(&mut self, command_buffer: Self::CommandBuffer) -> RhiResult<()>;

    fn wait_idle(&self) -> RhiResult<()>;
}

/// What a surface supports for chain creation.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries surface support for a physical device.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True when at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Caller preferences for chain creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPreferences {
    /// Prefer an sRGB color format over UNORM.
    pub prefer_srgb: bool,
    /// Used when supported; otherwise MAILBOX, then FIFO.
    pub present_mode: vk::PresentModeKHR,
    /// Bound on fence waits and image acquisition. `None` blocks indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl Default for ChainPreferences {
    fn default() -> Self {
        Self {
            prefer_srgb: true,
            present_mode: vk::PresentModeKHR::MAILBOX,
            acquire_timeout: None,
        }
    }
}

impl ChainPreferences {
    /// Acquire timeout in nanoseconds, `u64::MAX` when unbounded.
    pub fn timeout_nanos(&self) -> u64 {
        timeout_nanos(self.acquire_timeout)
    }
}

/// Converts an optional timeout to the nanosecond form Vulkan expects.
pub fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

/// Everything negotiated with the surface for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

const SRGB_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
const UNORM_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Ordered color format preference list.
pub fn format_preferences(prefer_srgb: bool) -> [vk::Format; 4] {
    if prefer_srgb {
        [SRGB_FORMATS[0], SRGB_FORMATS[1], UNORM_FORMATS[0], UNORM_FORMATS[1]]
    } else {
        [UNORM_FORMATS[0], UNORM_FORMATS[1], SRGB_FORMATS[0], SRGB_FORMATS[1]]
    }
}

/// Negotiates format, present mode, extent and image count.
///
/// # Errors
///
/// - [`RhiError::SurfaceUnavailable`] if the surface lists no formats or
///   present modes, or if the resulting extent is zero.
/// - [`RhiError::NoCompatibleFormat`] if no preferred format is supported.
pub fn plan_chain(
    support: &SurfaceSupport,
    requested: vk::Extent2D,
    preferences: &ChainPreferences,
) -> RhiResult<ChainPlan> {
    if !support.is_adequate() {
        return Err(RhiError::SurfaceUnavailable(format!(
            "{} formats, {} present modes",
            support.formats.len(),
            support.present_modes.len()
        )));
    }

    let extent = choose_extent(&support.capabilities, requested);
    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::SurfaceUnavailable(format!(
            "zero extent {}x{}",
            extent.width, extent.height
        )));
    }

    let surface_format = choose_surface_format(&support.formats, preferences.prefer_srgb)
        .ok_or(RhiError::NoCompatibleFormat)?;
    let present_mode = choose_present_mode(&support.present_modes, preferences.present_mode);
    let image_count = determine_image_count(&support.capabilities);

    Ok(ChainPlan {
        surface_format,
        present_mode,
        extent,
        image_count,
    })
}

/// Picks the first preferred format the surface supports in the
/// SRGB_NONLINEAR color space.
///
/// A lone `UNDEFINED` entry means the surface accepts any format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    prefer_srgb: bool,
) -> Option<vk::SurfaceFormatKHR> {
    let preferences = format_preferences(prefer_srgb);

    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        debug!("Surface accepts any format, using {:?}", preferences[0]);
        return Some(vk::SurfaceFormatKHR {
            format: preferences[0],
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    for (rank, wanted) in preferences.iter().enumerate() {
        let found = formats
            .iter()
            .find(|f| f.format == *wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR);
        if let Some(&format) = found {
            if rank == 0 {
                debug!("Selected preferred surface format {:?}", format.format);
            } else {
                warn!("Using fallback surface format {:?}", format.format);
            }
            return Some(format);
        }
    }

    None
}

/// Picks the present mode.
///
/// The requested mode wins when supported. Otherwise MAILBOX (no tearing,
/// producer never blocks) is preferred, and FIFO is the guaranteed fallback.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    requested: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&requested) {
        debug!("Selected requested present mode {:?}", requested);
        return requested;
    }

    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the chain extent.
///
/// Uses the surface's current extent when it is defined, otherwise clamps the
/// requested size to the surface's min/max extents.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        requested.width,
        requested.height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// One more than the minimum, capped by the maximum (`0` means no maximum).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}
