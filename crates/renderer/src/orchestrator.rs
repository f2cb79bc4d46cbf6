//! Frame orchestration.
//!
//! The [`FrameOrchestrator`] owns K frame slots and the current presentation
//! chain, and drives one acquire → record → submit → present cycle per
//! loop iteration. It also owns the rebuild policy: any staleness report
//! from the chain, a resize reported by the surface provider, or an
//! explicit request leads to a new chain built from the surface's current
//! extent.
//!
//! # Frames in Flight
//!
//! Frame `n` uses slot `n % K`. A slot's command buffer and semaphores are
//! touched again only after its in-flight fence has been observed signaled,
//! which the chain guarantees inside `acquire_next_image`.
//!
//! # Example
//!
//! ```no_run
//! use frameloop_core::Config;
//! use frameloop_platform::Window;
//! use frameloop_renderer::{FrameOrchestrator, OrchestratorSettings, VulkanContext};
//!
//! # fn example() -> Result<(), frameloop_renderer::FrameError> {
//! let config = Config::default();
//! let window = Window::new(&config.window)?;
//! let context = VulkanContext::new(&window, &config)?;
//! let settings = OrchestratorSettings::from_config(&config.presentation);
//! let mut frames = FrameOrchestrator::new(context, window, settings)?;
//!
//! while frames.surface_mut().poll_events() {
//!     frames.tick(|_cmd, _info| {
//!         // record draw calls
//!     })?;
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use ash::vk;
use tracing::{debug, error, info, warn};

use frameloop_core::{PresentationConfig, RebuildWait, Timer};
use frameloop_platform::SurfaceProvider;
use frameloop_rhi::present::{AcquireOutcome, DeviceContext, PresentOutcome, PresentationChain};
use frameloop_rhi::sync::DEFAULT_FRAMES_IN_FLIGHT;

use crate::error::{FrameError, FrameResult};
use crate::frame::{FrameInfo, FrameState};

const FRAME_RATE_WINDOW: Duration = Duration::from_secs(5);

/// Orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Number of frame slots (K). Must not exceed the chain's image count.
    pub frames_in_flight: usize,
    pub rebuild_wait: RebuildWait,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            rebuild_wait: RebuildWait::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &PresentationConfig) -> Self {
        Self {
            frames_in_flight: config.frames_in_flight,
            rebuild_wait: config.rebuild_wait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebuildReason {
    Resized,
    OutOfDate,
    Suboptimal,
    /// Scheduled earlier by a suboptimal acquire or [`FrameOrchestrator::request_rebuild`].
    Deferred,
    Requested,
}

/// The frame being recorded.
#[derive(Debug, Clone, Copy)]
struct CurrentFrame {
    slot: usize,
    image_index: u32,
}

/// Drives the frame loop over a [`DeviceContext`] and a [`SurfaceProvider`].
///
/// Field order is drop order: the chain and slots go before the device
/// context that created them, and the device context before the surface
/// provider whose window backs the Vulkan surface.
pub struct FrameOrchestrator<D: DeviceContext, S: SurfaceProvider> {
    chain: D::Chain,
    slots: Vec<D::FrameSlot>,
    command_buffers: Vec<D::CommandBuffer>,
    current: Option<CurrentFrame>,
    state: FrameState,
    frame_counter: u64,
    rebuild_pending: bool,
    rebuild_count: u64,
    render_pass_changed: bool,
    settings: OrchestratorSettings,
    timer: Timer,
    device: D,
    surface: S,
}

impl<D: DeviceContext, S: SurfaceProvider> FrameOrchestrator<D, S> {
    /// Builds the first chain and the frame slots.
    ///
    /// Blocks while the surface reports a zero extent.
    ///
    /// # Errors
    ///
    /// - [`FrameError::TooManyFramesInFlight`] if the chain has fewer images than slots
    /// - [`FrameError::SurfaceClosed`] if the window closes before it has a usable size
    /// - [`FrameError::Rhi`] if chain or slot creation fails
    pub fn new(mut device: D, mut surface: S, settings: OrchestratorSettings) -> FrameResult<Self> {
        let frames = settings.frames_in_flight;
        if frames == 0 {
            return Err(frameloop_core::Error::Config(
                "frames_in_flight must be at least 1".to_string(),
            )
            .into());
        }

        let extent = wait_for_usable_extent(&mut surface)?;
        surface.take_resized();

        let chain = device.create_chain(extent, None)?;
        let images = chain.image_count();
        if frames > images as usize {
            return Err(FrameError::TooManyFramesInFlight { frames, images });
        }

        let slots = (0..frames)
            .map(|_| device.create_frame_slot())
            .collect::<Result<Vec<_>, _>>()?;
        let command_buffers = device.allocate_command_buffers(images)?;

        info!(
            "Frame orchestrator ready: {}x{}, {} images, {} frames in flight",
            chain.extent().width,
            chain.extent().height,
            images,
            frames
        );

        Ok(Self {
            chain,
            slots,
            command_buffers,
            current: None,
            state: FrameState::Idle,
            frame_counter: 0,
            rebuild_pending: false,
            rebuild_count: 0,
            render_pass_changed: false,
            settings,
            timer: Timer::new(),
            device,
            surface,
        })
    }

    // =========================================================================
    // Frame Protocol
    // =========================================================================

    /// Starts a frame: acquires an image and begins recording.
    ///
    /// Returns `Ok(None)` when the chain was out of date. The chain has then
    /// been rebuilt and the caller skips drawing for this tick.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] unless the orchestrator is idle,
    /// or any fatal device error.
    pub fn begin_frame(&mut self) -> FrameResult<Option<FrameInfo>> {
        self.expect_state("begin_frame", FrameState::Idle)?;

        if self.surface.take_resized() {
            self.rebuild_chain(RebuildReason::Resized)?;
        } else if self.rebuild_pending {
            self.rebuild_chain(RebuildReason::Deferred)?;
        }

        let slot = self.slot_index();
        let image_index = match self.chain.acquire_next_image(&self.slots[slot])? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                debug!("Chain suboptimal at acquire, rebuilding after present");
                self.rebuild_pending = true;
                index
            }
            AcquireOutcome::OutOfDate => {
                self.rebuild_chain(RebuildReason::OutOfDate)?;
                return Ok(None);
            }
        };

        let command_buffer = self.command_buffers[slot];
        self.device.begin_recording(command_buffer)?;

        self.current = Some(CurrentFrame { slot, image_index });
        self.state = FrameState::Acquired;

        let delta_time = self.timer.tick();
        if let Some(fps) = self.timer.frame_rate(FRAME_RATE_WINDOW) {
            debug!("{:.1} fps over the last {:?}", fps, FRAME_RATE_WINDOW);
        }

        Ok(Some(FrameInfo {
            frame_index: self.frame_counter,
            slot_index: slot,
            image_index,
            extent: self.chain.extent(),
            delta_time,
            render_pass_changed: std::mem::take(&mut self.render_pass_changed),
        }))
    }

    /// Command buffer of the frame being recorded.
    pub fn current_command_buffer(&self) -> Option<D::CommandBuffer> {
        self.current.map(|frame| self.command_buffers[frame.slot])
    }

    /// Begins the render-target pass and sets viewport and scissor to the
    /// chain extent. Returns the command buffer to record into.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] unless a frame was just begun.
    pub fn begin_render_pass(&mut self) -> FrameResult<D::CommandBuffer> {
        self.expect_state("begin_render_pass", FrameState::Acquired)?;
        let frame = self.current_frame("begin_render_pass")?;
        let command_buffer = self.command_buffers[frame.slot];

        self.chain
            .begin_render_pass(command_buffer, frame.image_index)?;
        self.state = FrameState::Recording;

        Ok(command_buffer)
    }

    /// Ends the render-target pass.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] outside the render pass.
    pub fn end_render_pass(&mut self) -> FrameResult<()> {
        self.expect_state("end_render_pass", FrameState::Recording)?;
        let frame = self.current_frame("end_render_pass")?;

        self.chain.end_render_pass(self.command_buffers[frame.slot]);
        self.state = FrameState::Acquired;

        Ok(())
    }

    /// Finishes recording, submits and presents the frame.
    ///
    /// Rebuilds the chain afterwards when presentation reported staleness,
    /// the surface was resized, or acquisition was suboptimal.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] unless a frame is being recorded
    /// outside the render pass, or any fatal device error. After an error the
    /// orchestrator stays in its current state and must be dropped.
    pub fn end_frame(&mut self) -> FrameResult<()> {
        self.expect_state("end_frame", FrameState::Acquired)?;
        let frame = self.current_frame("end_frame")?;
        let command_buffer = self.command_buffers[frame.slot];

        self.device.end_recording(command_buffer)?;

        let outcome = self
            .chain
            .submit(command_buffer, frame.image_index, &self.slots[frame.slot])?;

        self.state = FrameState::Submitted;
        self.current = None;
        self.frame_counter += 1;

        let resized = self.surface.take_resized();
        let reason = match outcome {
            PresentOutcome::OutOfDate => Some(RebuildReason::OutOfDate),
            PresentOutcome::Suboptimal => Some(RebuildReason::Suboptimal),
            PresentOutcome::Success if resized => Some(RebuildReason::Resized),
            PresentOutcome::Success if self.rebuild_pending => Some(RebuildReason::Deferred),
            PresentOutcome::Success => None,
        };

        if let Some(reason) = reason {
            self.rebuild_chain(reason)?;
        }

        self.state = FrameState::Idle;
        Ok(())
    }

    /// Runs one full frame around `draw`.
    ///
    /// `draw` is called between the render pass begin and end with the
    /// command buffer and the frame's [`FrameInfo`]. Returns `Ok(false)`
    /// when the frame was skipped because the chain was out of date.
    ///
    /// # Errors
    ///
    /// Any error from the individual frame steps.
    pub fn tick<F>(&mut self, draw: F) -> FrameResult<bool>
    where
        F: FnOnce(D::CommandBuffer, &FrameInfo),
    {
        let Some(info) = self.begin_frame()? else {
            return Ok(false);
        };

        let command_buffer = self.begin_render_pass()?;
        draw(command_buffer, &info);
        self.end_render_pass()?;
        self.end_frame()?;

        Ok(true)
    }

    /// Records and runs a one-off command buffer, blocking until it completes.
    ///
    /// Used for uploads outside the frame loop.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] while a frame is in progress.
    pub fn submit_immediate<F>(&mut self, record: F) -> FrameResult<()>
    where
        F: FnOnce(D::CommandBuffer),
    {
        self.expect_state("submit_immediate", FrameState::Idle)?;

        let command_buffer = self.device.begin_single_use()?;
        record(command_buffer);
        self.device.end_single_use(command_buffer)?;

        Ok(())
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    /// Schedules a rebuild for the start of the next frame.
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    /// Rebuilds the chain immediately from the surface's current extent.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] while a frame is in progress.
    pub fn rebuild(&mut self) -> FrameResult<()> {
        self.expect_state("rebuild", FrameState::Idle)?;
        self.rebuild_chain(RebuildReason::Requested)
    }

    /// Replaces the chain with one built at the surface's current extent.
    ///
    /// With [`RebuildWait::InFlightFrames`] the only wait is on every slot
    /// fence before the old chain is dropped.
    fn rebuild_chain(&mut self, reason: RebuildReason) -> FrameResult<()> {
        if self.settings.rebuild_wait == RebuildWait::DeviceIdle {
            self.device.wait_idle()?;
        }

        let extent = wait_for_usable_extent(&mut self.surface)?;
        // Resizes reported up to and during the stall are covered by `extent`.
        self.surface.take_resized();

        let old_extent = self.chain.extent();
        let old_images = self.chain.image_count();
        let old_pass = self.chain.render_pass();

        let chain = self.device.create_chain(extent, Some(&self.chain))?;

        // Other slots may still be rendering into the old chain's images.
        for slot in &self.slots {
            self.device.wait_for_frame_slot(slot)?;
        }

        let old_chain = std::mem::replace(&mut self.chain, chain);
        drop(old_chain);

        let images = self.chain.image_count();
        if self.slots.len() > images as usize {
            return Err(FrameError::TooManyFramesInFlight {
                frames: self.slots.len(),
                images,
            });
        }

        if images != old_images {
            info!(
                "Image count changed {} -> {}, reallocating command buffers",
                old_images, images
            );
            let old_buffers = std::mem::take(&mut self.command_buffers);
            self.device.free_command_buffers(&old_buffers);
            self.command_buffers = self.device.allocate_command_buffers(images)?;
        }

        if self.chain.render_pass() != old_pass {
            debug!("Render pass replaced during rebuild");
            self.render_pass_changed = true;
        }

        self.rebuild_pending = false;
        self.rebuild_count += 1;

        let new_extent = self.chain.extent();
        info!(
            "Chain rebuilt ({:?}): {}x{} -> {}x{}, {} images",
            reason,
            old_extent.width,
            old_extent.height,
            new_extent.width,
            new_extent.height,
            images
        );

        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Number of chain rebuilds so far, excluding the initial build.
    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    #[inline]
    pub fn is_rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next or current frame uses.
    #[inline]
    pub fn slot_index(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    #[inline]
    pub fn chain(&self) -> &D::Chain {
        &self.chain
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent()
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.chain.image_count()
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.chain.render_pass()
    }

    #[inline]
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[inline]
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    fn expect_state(&self, operation: &'static str, expected: FrameState) -> FrameResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FrameError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn current_frame(&self, operation: &'static str) -> FrameResult<CurrentFrame> {
        self.current.ok_or(FrameError::InvalidState {
            operation,
            state: self.state,
        })
    }
}

impl<D: DeviceContext, S: SurfaceProvider> Drop for FrameOrchestrator<D, S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }

        let buffers = std::mem::take(&mut self.command_buffers);
        self.device.free_command_buffers(&buffers);

        info!(
            "Frame orchestrator shut down after {} frames and {} rebuilds",
            self.frame_counter, self.rebuild_count
        );
    }
}

/// Polls the surface until it reports a non-zero extent, blocking on its
/// event wait in between.
fn wait_for_usable_extent<S: SurfaceProvider>(surface: &mut S) -> FrameResult<vk::Extent2D> {
    let mut stalled = false;

    loop {
        if surface.close_requested() {
            warn!("Surface closed while waiting for a usable size");
            return Err(FrameError::SurfaceClosed);
        }

        let (width, height) = surface.current_extent();
        if width != 0 && height != 0 {
            if stalled {
                info!("Surface restored at {}x{}", width, height);
            }
            return Ok(vk::Extent2D { width, height });
        }

        if !stalled {
            info!("Surface has zero size, waiting for it to be restored");
            stalled = true;
        }
        surface.wait_for_next_event();
    }
}
