//! Per-frame state and the information handed to draw callbacks.

use std::time::Duration;

use ash::vk;

/// Where the orchestrator is within one loop iteration.
///
/// ```text
/// Idle -> Acquired -> Recording -> Acquired -> Submitted -> Idle
///          begin_render_pass   end_render_pass  end_frame
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// No frame in progress.
    #[default]
    Idle,
    /// An image is acquired and the command buffer is recording.
    Acquired,
    /// Inside the render-target pass.
    Recording,
    /// Submitted and presented; a rebuild may be running.
    Submitted,
}

/// Describes the frame being recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Number of frames submitted before this one.
    pub frame_index: u64,
    /// Frame slot in use, `frame_index % frames_in_flight`.
    pub slot_index: usize,
    /// Presentable image being rendered.
    pub image_index: u32,
    /// Chain extent; viewport and scissor are set to it.
    pub extent: vk::Extent2D,
    /// Time since the previous acquired frame.
    pub delta_time: Duration,
    /// True on the first frame after a rebuild created a new render pass.
    /// Pipelines built against the old pass must be recreated.
    pub render_pass_changed: bool,
}

impl FrameInfo {
    /// Width over height of the chain extent.
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }
}
