//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
///
/// Staleness (`OUT_OF_DATE`, `SUBOPTIMAL`) is not represented here; it is
/// reported through [`crate::present::AcquireOutcome`] and
/// [`crate::present::PresentOutcome`].
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The surface reports no usable capability (no formats, no present modes, zero extent)
    #[error("Surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// None of the preferred color formats is supported by the surface
    #[error("No compatible surface format")]
    NoCompatibleFormat,

    /// The device rejected work or was lost
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Image acquisition failed for a reason other than staleness
    #[error("Acquire failed: {0}")]
    AcquireFailed(String),

    /// Presentation failed for a reason other than staleness
    #[error("Present failed: {0}")]
    PresentFailed(String),

    /// Image index outside the chain
    #[error("Index {index} out of range for {count} images")]
    IndexOutOfRange { index: u32, count: u32 },

    /// A bounded wait expired
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

impl RhiError {
    /// Maps a raw result from a fence wait or queue submission.
    pub(crate) fn from_wait(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(result.to_string()),
            other => Self::VulkanError(other),
        }
    }

    /// Maps a raw result from building chain images, views or framebuffers.
    ///
    /// Anything but a lost or busy surface means the device refused the images.
    pub(crate) fn from_creation(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => {
                Self::SurfaceUnavailable(result.to_string())
            }
            other => Self::DeviceLost(other.to_string()),
        }
    }

    /// Narrows an error raised while building a chain to
    /// [`Self::SurfaceUnavailable`] or [`Self::DeviceLost`].
    pub(crate) fn into_creation_error(self) -> Self {
        match self {
            Self::VulkanError(result) => Self::from_creation(result),
            Self::AllocatorError(e) => Self::DeviceLost(e.to_string()),
            other => other,
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
