//! Vulkan implementation of the device context.
//!
//! [`VulkanContext`] owns everything below the presentation chain: the
//! instance, the window surface, the logical device and the command pools.
//! It builds [`Swapchain`]s on request from the frame orchestrator.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use frameloop_core::{Config, PresentModeSetting, PresentationConfig};
use frameloop_platform::{Surface, Window};
use frameloop_rhi::command::{CommandPool, PoolKind, Recorder};
use frameloop_rhi::depth_buffer::find_depth_format;
use frameloop_rhi::device::Device;
use frameloop_rhi::instance::Instance;
use frameloop_rhi::physical_device::select_physical_device;
use frameloop_rhi::present::{ChainPreferences, DeviceContext};
use frameloop_rhi::swapchain::{ChainSettings, Swapchain};
use frameloop_rhi::sync::{Fence, FrameSlot};
use frameloop_rhi::{RhiError, RhiResult};

use crate::error::FrameResult;

const APPLICATION_NAME: &std::ffi::CStr = c"frameloop";

/// Device context backed by a real Vulkan device.
///
/// Field order is drop order: pools before the device, the device before
/// the surface, the surface before the instance.
pub struct VulkanContext {
    command_pool: CommandPool,
    transient_pool: CommandPool,
    settings: ChainSettings,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl VulkanContext {
    /// Creates the instance, surface, device and command pools for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object cannot be created, or if no GPU
    /// can present to the window's surface.
    pub fn new(window: &Window, config: &Config) -> FrameResult<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(
            APPLICATION_NAME,
            &extensions,
            config.debug.validation_enabled(),
        )?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;
        let depth_format = find_depth_format(instance.handle(), physical_device.device)?;

        let family = device.graphics_family();
        let command_pool = CommandPool::new(device.clone(), family, PoolKind::Frame)?;
        let transient_pool = CommandPool::new(device.clone(), family, PoolKind::Transient)?;

        let settings = chain_settings(&config.presentation, depth_format);

        info!("Vulkan context ready on '{}'", physical_device.device_name());

        Ok(Self {
            command_pool,
            transient_pool,
            settings,
            device,
            surface,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    #[inline]
    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    fn recorder(&self, command_buffer: vk::CommandBuffer) -> Recorder<'_> {
        Recorder::new(&self.device, command_buffer)
    }

    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.recorder(command_buffer).end()?;

        let fence = Fence::new(self.device.clone(), false)?;
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit_info), fence.handle())?;
        }
        fence.wait(u64::MAX)
    }
}

impl DeviceContext for VulkanContext {
    type CommandBuffer = vk::CommandBuffer;
    type FrameSlot = FrameSlot;
    type Chain = Swapchain;

    fn create_chain(
        &mut self,
        extent: vk::Extent2D,
        previous: Option<&Swapchain>,
    ) -> RhiResult<Swapchain> {
        Swapchain::new(
            self.instance.handle(),
            self.device.clone(),
            self.surface.handle(),
            self.surface.loader(),
            extent,
            &self.settings,
            previous,
        )
    }

    fn create_frame_slot(&mut self) -> RhiResult<FrameSlot> {
        FrameSlot::new(self.device.clone())
    }

    fn wait_for_frame_slot(&self, slot: &FrameSlot) -> RhiResult<()> {
        slot.in_flight_fence()
            .wait(self.settings.preferences.timeout_nanos())
    }

    fn allocate_command_buffers(&mut self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.command_pool.allocate(count)
    }

    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
        self.command_pool.free(buffers);
    }

    fn begin_recording(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.recorder(command_buffer).reset_and_begin()
    }

    fn end_recording(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.recorder(command_buffer).end()
    }

    fn begin_single_use(&mut self) -> RhiResult<vk::CommandBuffer> {
        let command_buffer = self
            .transient_pool
            .allocate(1)?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("no command buffer allocated".to_string()))?;

        if let Err(e) = self.recorder(command_buffer).begin() {
            self.transient_pool.free(&[command_buffer]);
            return Err(e);
        }

        Ok(command_buffer)
    }

    fn end_single_use(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let result = self.submit_and_wait(command_buffer);
        self.transient_pool.free(&[command_buffer]);
        result
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

/// Maps the configured present mode onto Vulkan.
pub fn present_mode(setting: PresentModeSetting) -> vk::PresentModeKHR {
    match setting {
        PresentModeSetting::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModeSetting::Fifo => vk::PresentModeKHR::FIFO,
        PresentModeSetting::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Builds chain settings from the presentation config.
pub fn chain_settings(config: &PresentationConfig, depth_format: vk::Format) -> ChainSettings {
    ChainSettings {
        preferences: ChainPreferences {
            prefer_srgb: config.prefer_srgb,
            present_mode: present_mode(config.present_mode),
            acquire_timeout: config.acquire_timeout(),
        },
        depth_format,
        clear_color: config.clear_color,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_present_mode_mapping() {
        assert_eq!(
            present_mode(PresentModeSetting::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(present_mode(PresentModeSetting::Fifo), vk::PresentModeKHR::FIFO);
        assert_eq!(
            present_mode(PresentModeSetting::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_chain_settings_from_config() {
        let config = PresentationConfig {
            prefer_srgb: false,
            present_mode: PresentModeSetting::Fifo,
            acquire_timeout_ms: Some(250),
            clear_color: [0.0, 0.5, 1.0, 1.0],
            ..Default::default()
        };

        let settings = chain_settings(&config, vk::Format::D24_UNORM_S8_UINT);
        assert!(!settings.preferences.prefer_srgb);
        assert_eq!(settings.preferences.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(
            settings.preferences.acquire_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(settings.depth_format, vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(settings.clear_color, [0.0, 0.5, 1.0, 1.0]);
    }
}
