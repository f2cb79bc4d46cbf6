//! Swapchain-backed presentation chain.
//!
//! [`Swapchain`] is the Vulkan implementation of [`PresentationChain`]. It
//! owns the VkSwapchainKHR, one [`PresentableImage`] per swapchain image
//! (color view, depth buffer, framebuffer) and the [`RenderTargetPass`] the
//! framebuffers were built against.
//!
//! # Rebuilding
//!
//! A rebuild creates a new chain while the old one is still alive, passing
//! it as `previous`. The new swapchain retires the old handle through
//! `old_swapchain` and reuses the old render pass when the formats match.
//! The caller drops the old chain once no frame slot references its images.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::device::Device;
//! use frameloop_rhi::swapchain::{ChainSettings, Swapchain};
//! use ash::vk;
//!
//! # fn example(
//! #     instance: &ash::Instance,
//! #     device: Arc<Device>,
//! #     surface: vk::SurfaceKHR,
//! #     surface_loader: &ash::khr::surface::Instance,
//! # ) -> Result<(), frameloop_rhi::RhiError> {
//! let settings = ChainSettings::default();
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let chain = Swapchain::new(instance, device.clone(), surface, surface_loader, extent, &settings, None)?;
//!
//! // After a resize:
//! let extent = vk::Extent2D { width: 400, height: 300 };
//! let rebuilt = Swapchain::new(instance, device, surface, surface_loader, extent, &settings, Some(&chain))?;
//! drop(chain);
//! # drop(rebuilt);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::command::Recorder;
use crate::depth_buffer::DepthBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::physical_device::QueueFamilies;
use crate::present::{
    AcquireOutcome, ChainPreferences, PresentOutcome, PresentationChain, SurfaceSupport,
    plan_chain,
};
use crate::render_pass::RenderTargetPass;
use crate::sync::{FrameSlot, wait_for_fences};

/// Settings that stay fixed across rebuilds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSettings {
    pub preferences: ChainPreferences,
    /// Depth attachment format, chosen once per device.
    pub depth_format: vk::Format,
    /// Background the color attachment is cleared to.
    pub clear_color: [f32; 4],
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            preferences: ChainPreferences::default(),
            depth_format: vk::Format::D32_SFLOAT,
            clear_color: [0.01, 0.01, 0.01, 1.0],
        }
    }
}

/// One image of the chain with everything needed to render into it.
pub struct PresentableImage {
    image: vk::Image,
    view: vk::ImageView,
    depth: DepthBuffer,
    framebuffer: vk::Framebuffer,
    /// Fence of the frame slot that last submitted work for this image.
    in_use: Option<vk::Fence>,
}

impl PresentableImage {
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn depth(&self) -> &DepthBuffer {
        &self.depth
    }

    #[inline]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

/// Vulkan presentation chain.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<PresentableImage>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    render_pass: Arc<RenderTargetPass>,
    timeout_ns: u64,
}

impl Swapchain {
    /// Builds a chain for `requested`.
    ///
    /// `requested` must be non-zero; the caller stalls until the surface
    /// reports a usable size.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SurfaceUnavailable`] if the surface reports no usable capability
    /// - [`RhiError::NoCompatibleFormat`] if no preferred format is supported
    /// - [`RhiError::DeviceLost`] if the device rejects image creation
    pub fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        requested: vk::Extent2D,
        settings: &ChainSettings,
        previous: Option<&Swapchain>,
    ) -> RhiResult<Self> {
        let support = SurfaceSupport::query(device.physical_device(), surface, surface_loader)?;
        let plan = plan_chain(&support, requested, &settings.preferences)?;

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images requested",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.present_mode,
            plan.image_count
        );

        let (sharing_mode, family_indices) = sharing_mode(device.queue_families());

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |p| p.handle));

        let loader = ash::khr::swapchain::Device::new(instance, device.handle());
        let handle = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(RhiError::from_creation)?
        };

        let render_pass = match previous {
            Some(previous)
                if previous
                    .render_pass
                    .is_compatible(plan.surface_format.format, settings.depth_format) =>
            {
                debug!("Reusing render-target pass from the previous chain");
                previous.render_pass.clone()
            }
            _ => {
                let created = RenderTargetPass::new(
                    device.clone(),
                    plan.surface_format.format,
                    settings.depth_format,
                    settings.clear_color,
                );
                match created {
                    Ok(pass) => pass,
                    Err(e) => {
                        unsafe { loader.destroy_swapchain(handle, None) };
                        return Err(e.into_creation_error());
                    }
                }
            }
        };

        let mut chain = Self {
            device,
            loader,
            handle,
            images: Vec::new(),
            surface_format: plan.surface_format,
            present_mode: plan.present_mode,
            extent: plan.extent,
            render_pass,
            timeout_ns: settings.preferences.timeout_nanos(),
        };

        // From here on, Drop releases whatever has been created.
        let images = unsafe {
            chain
                .loader
                .get_swapchain_images(chain.handle)
                .map_err(RhiError::from_creation)?
        };
        chain.images.reserve(images.len());
        for image in images {
            let presentable = create_presentable_image(
                &chain.device,
                image,
                chain.surface_format.format,
                chain.extent,
                settings.depth_format,
                chain.render_pass.handle(),
            )
            .map_err(RhiError::into_creation_error)?;
            chain.images.push(presentable);
        }

        info!(
            "Swapchain created: {}x{}, {} images",
            chain.extent.width,
            chain.extent.height,
            chain.images.len()
        );

        Ok(chain)
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Returns the chosen surface format including color space.
    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Returns the shared render-target pass.
    #[inline]
    pub fn render_target_pass(&self) -> &Arc<RenderTargetPass> {
        &self.render_pass
    }

    /// Returns the presentable images.
    #[inline]
    pub fn images(&self) -> &[PresentableImage] {
        &self.images
    }

    fn image_at(&self, image_index: u32) -> RhiResult<&PresentableImage> {
        self.images
            .get(image_index as usize)
            .ok_or(RhiError::IndexOutOfRange {
                index: image_index,
                count: self.image_count(),
            })
    }

    fn present(&self, image_index: u32, slot: &FrameSlot) -> PresentResult {
        let wait_semaphores = [slot.render_finished()];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.loader
                .queue_present(self.device.present_queue(), &present_info)
        }
    }
}

type PresentResult = Result<bool, vk::Result>;

impl PresentationChain for Swapchain {
    type CommandBuffer = vk::CommandBuffer;
    type FrameSlot = FrameSlot;

    fn acquire_next_image(&mut self, slot: &FrameSlot) -> RhiResult<AcquireOutcome> {
        slot.in_flight_fence().wait(self.timeout_ns)?;

        let result = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                self.timeout_ns,
                slot.image_available(),
                vk::Fence::null(),
            )
        };

        acquire_outcome(result)
    }

    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        slot: &FrameSlot,
    ) -> RhiResult<PresentOutcome> {
        let count = self.image_count();
        let fence = slot.in_flight_fence().handle();
        let image = self
            .images
            .get_mut(image_index as usize)
            .ok_or(RhiError::IndexOutOfRange {
                index: image_index,
                count,
            })?;

        // Another slot may still be rendering into this image.
        if let Some(previous) = image.in_use
            && previous != fence
        {
            wait_for_fences(&self.device, &[previous], self.timeout_ns)?;
        }
        image.in_use = Some(fence);

        slot.in_flight_fence().reset()?;

        let wait_semaphores = [slot.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [slot.render_finished()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit_info), fence)?;
        }

        present_outcome(self.present(image_index, slot))
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> RhiResult<()> {
        let framebuffer = self.image_at(image_index)?.framebuffer;
        Recorder::new(&self.device, command_buffer).begin_target_pass(
            self.render_pass.handle(),
            framebuffer,
            self.extent,
            &self.render_pass.clear_values(),
        );

        Ok(())
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        Recorder::new(&self.device, command_buffer).end_pass();
    }

    fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        Ok(self.image_at(image_index)?.framebuffer)
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let count = self.images.len();
        for image in self.images.drain(..) {
            unsafe {
                self.device
                    .handle()
                    .destroy_framebuffer(image.framebuffer, None);
                self.device.handle().destroy_image_view(image.view, None);
            }
        }

        unsafe {
            self.loader.destroy_swapchain(self.handle, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width, self.extent.height, count
        );
    }
}

/// Sharing mode and queue family list for chain images.
fn sharing_mode(queue_families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if !queue_families.is_shared() {
        debug!(
            "Chain images shared between graphics family {} and present family {}",
            queue_families.graphics, queue_families.present
        );
        (vk::SharingMode::CONCURRENT, queue_families.unique())
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

fn acquire_outcome(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::Timeout),
        Err(e) => Err(RhiError::AcquireFailed(e.to_string())),
    }
}

fn present_outcome(result: PresentResult) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Success),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(RhiError::PresentFailed(e.to_string())),
    }
}

fn create_presentable_image(
    device: &Arc<Device>,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    depth_format: vk::Format,
    render_pass: vk::RenderPass,
) -> RhiResult<PresentableImage> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = unsafe { device.handle().create_image_view(&view_info, None)? };

    let depth = match DepthBuffer::new(device.clone(), extent, depth_format) {
        Ok(depth) => depth,
        Err(e) => {
            unsafe { device.handle().destroy_image_view(view, None) };
            return Err(e);
        }
    };

    let attachments = [view, depth.image_view()];
    let framebuffer_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    let framebuffer = match unsafe { device.handle().create_framebuffer(&framebuffer_info, None) } {
        Ok(framebuffer) => framebuffer,
        Err(e) => {
            unsafe { device.handle().destroy_image_view(view, None) };
            return Err(e.into());
        }
    };

    Ok(PresentableImage {
        image,
        view,
        depth,
        framebuffer,
        in_use: None,
    })
}
