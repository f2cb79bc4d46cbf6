//! Depth buffer management.
//!
//! Each presentable image gets its own depth buffer so that two frames in
//! flight never share a depth attachment.
//!
//! - [`DepthBuffer`] wraps a VkImage and VkImageView for depth testing
//! - [`find_depth_format`] picks the first depth format the device can attach
//! - Memory is managed by gpu-allocator

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Picks the first candidate usable as an optimal-tiling depth attachment.
///
/// # Errors
///
/// Returns [`RhiError::NoCompatibleFormat`] if no candidate is supported.
pub fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    let format = DEPTH_FORMAT_CANDIDATES.into_iter().find(|&format| {
        let properties =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    });

    match format {
        Some(format) => {
            debug!("Selected depth format {:?}", format);
            Ok(format)
        }
        None => Err(RhiError::NoCompatibleFormat),
    }
}

/// True for formats that carry a stencil aspect.
#[inline]
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Depth attachment image with GPU-only memory.
///
/// Resources are destroyed in the following order:
/// 1. Image view
/// 2. Image
/// 3. Memory allocation
pub struct DepthBuffer {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// Vulkan image view handle.
    image_view: vk::ImageView,
    /// GPU memory allocation.
    allocation: Option<Allocation>,
    /// Depth format.
    format: vk::Format,
    /// Depth buffer dimensions.
    extent: vk::Extent2D,
}

impl DepthBuffer {
    /// Creates a depth buffer of `extent` in `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The extent is zero
    /// - Image creation fails (reported as [`RhiError::DeviceLost`] when the device rejects it)
    /// - Memory allocation fails
    /// - Image view creation fails
    pub fn new(device: Arc<Device>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Depth buffer dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .handle()
                .create_image(&image_info, None)
                .map_err(RhiError::from_creation)?
        };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = match allocate_depth_memory(&device, requirements) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut buffer = Self {
            device,
            image,
            image_view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
        };

        // From here on, Drop releases whatever has been created.
        if let Some(allocation) = &buffer.allocation {
            unsafe {
                buffer.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let aspect_mask = if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        buffer.image_view = unsafe { buffer.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created depth buffer: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(buffer)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Returns the depth format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the depth buffer extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

fn allocate_depth_memory(
    device: &Device,
    requirements: vk::MemoryRequirements,
) -> RhiResult<Allocation> {
    let mut allocator = device
        .allocator()
        .lock()
        .map_err(|_| RhiError::InvalidHandle("GPU allocator mutex poisoned".to_string()))?;

    let allocation = allocator.allocate(&AllocationCreateDesc {
        name: "depth_buffer",
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    })?;

    Ok(allocation)
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.image_view != vk::ImageView::null() {
                self.device
                    .handle()
                    .destroy_image_view(self.image_view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free depth buffer allocation: {:?}", e);
                    }
                }
                Err(_) => error!("GPU allocator mutex poisoned, leaking depth buffer memory"),
            }
        }
    }
}
