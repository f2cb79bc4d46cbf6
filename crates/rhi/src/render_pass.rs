//! Render-target pass.
//!
//! A single-subpass pass with one color attachment (the presentable image)
//! and one depth attachment. Color is cleared to a fixed background value,
//! depth to the far plane. All drawing is recorded inline into the frame's
//! primary command buffer.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RhiResult;

/// Depth clear value: the far plane.
pub const DEPTH_CLEAR: vk::ClearDepthStencilValue = vk::ClearDepthStencilValue {
    depth: 1.0,
    stencil: 0,
};

/// Color + depth render pass targeting presentable images.
///
/// Shared through `Arc` so a rebuilt chain with unchanged formats can keep
/// using the same pass, and callers' pipelines stay valid.
pub struct RenderTargetPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    depth_format: vk::Format,
    clear_color: [f32; 4],
}

impl RenderTargetPass {
    /// Creates the pass for the given attachment formats.
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        depth_format: vk::Format,
        clear_color: [f32; 4],
    ) -> RhiResult<Arc<Self>> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];

        // Attachment writes wait for the previous frame's use of the same
        // image (color) and the depth clear of the previous pass.
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        info!(
            "Render-target pass created (color {:?}, depth {:?})",
            color_format, depth_format
        );

        Ok(Arc::new(Self {
            device,
            render_pass,
            color_format,
            depth_format,
            clear_color,
        }))
    }

    /// Returns the Vulkan render pass handle.
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// True when this pass can be reused for attachments of these formats.
    pub fn is_compatible(&self, color_format: vk::Format, depth_format: vk::Format) -> bool {
        self.color_format == color_format && self.depth_format == depth_format
    }

    /// Clear values in attachment order: color, then depth/stencil.
    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        clear_values(self.clear_color)
    }
}

fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: DEPTH_CLEAR,
        },
    ]
}

impl Drop for RenderTargetPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Render-target pass destroyed");
    }
}
