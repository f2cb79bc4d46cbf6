//! Command pools and per-frame recording.
//!
//! Frame command buffers come from a [`PoolKind::Frame`] pool and are reset
//! individually each time their slot comes round. One-off work such as
//! uploads uses a [`PoolKind::Transient`] pool.
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::device::Device;
//! use frameloop_rhi::command::{CommandPool, PoolKind, Recorder};
//!
//! # fn example(device: Arc<Device>) -> Result<(), frameloop_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family(), PoolKind::Frame)?;
//! let buffers = pool.allocate(2)?;
//!
//! let recorder = Recorder::new(&device, buffers[0]);
//! recorder.reset_and_begin()?;
//! recorder.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// What a pool's buffers are used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Long-lived buffers re-recorded every frame.
    Frame,
    /// Short-lived single-use buffers.
    Transient,
}

impl PoolKind {
    fn flags(self) -> vk::CommandPoolCreateFlags {
        match self {
            Self::Frame => vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            Self::Transient => {
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT
            }
        }
    }
}

/// Command pool for one queue family.
///
/// Not thread-safe; all recording happens on the thread driving the frame loop.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    kind: PoolKind,
}

impl CommandPool {
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family: u32, kind: PoolKind) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(kind.flags());

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("{:?} command pool created on family {}", kind, queue_family);

        Ok(Self { device, pool, kind })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Allocates `count` primary command buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        debug!("Allocated {} {:?} command buffer(s)", buffers.len(), self.kind);
        Ok(buffers)
    }

    /// Returns buffers to the pool. None of them may be pending on the GPU.
    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe { self.device.handle().free_command_buffers(self.pool, buffers) };
        debug!("Freed {} {:?} command buffer(s)", buffers.len(), self.kind);
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
        debug!("{:?} command pool destroyed", self.kind);
    }
}

/// Records into a command buffer owned by a [`CommandPool`].
#[derive(Clone, Copy)]
pub struct Recorder<'a> {
    device: &'a Device,
    buffer: vk::CommandBuffer,
}

impl<'a> Recorder<'a> {
    #[inline]
    pub fn new(device: &'a Device, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins one-time-submit recording on a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Discards the previous recording and begins a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is still pending on the GPU.
    pub fn reset_and_begin(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        self.begin()
    }

    /// # Errors
    ///
    /// Returns an error if the buffer is not recording.
    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Begins `render_pass` on `framebuffer` and sets viewport and scissor
    /// to cover `extent`.
    pub fn begin_target_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(clear_values);
        let device = self.device.handle();

        unsafe {
            device.cmd_begin_render_pass(self.buffer, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(self.buffer, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(self.buffer, 0, &[full_scissor(extent)]);
        }
    }

    pub fn end_pass(&self) {
        unsafe { self.device.handle().cmd_end_render_pass(self.buffer) };
    }
}

/// Viewport covering `extent` with the standard 0..1 depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}
