//! Scripted device context, presentation chain and surface provider.
//!
//! The mocks share a [`Log`] that records what the orchestrator did and any
//! protocol violation it committed. GPU work completes as soon as a fence is
//! waited on.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use frameloop_platform::SurfaceProvider;
use frameloop_renderer::{FrameOrchestrator, OrchestratorSettings};
use frameloop_rhi::vk::{self, Handle};
use frameloop_rhi::{
    AcquireOutcome, ChainPreferences, DeviceContext, PresentOutcome, PresentationChain, RhiError,
    RhiResult, SurfaceSupport, plan_chain,
};

pub type Orchestrator = FrameOrchestrator<MockDevice, StubSurface>;

/// What the next acquire or submit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Suboptimal,
    OutOfDate,
    Fail,
}

#[derive(Debug, Default)]
struct SlotState {
    /// An image was acquired on this slot and not yet submitted.
    acquired: Cell<bool>,
    /// A submission is outstanding and its fence has not been waited.
    in_flight: Cell<bool>,
}

/// Frame slot handed to the orchestrator.
pub struct MockSlot {
    pub id: usize,
    state: Rc<SlotState>,
}

pub struct Log {
    pub surface: SurfaceSupport,
    pub preferences: ChainPreferences,
    pub acquire_script: VecDeque<Scripted>,
    pub present_script: VecDeque<Scripted>,
    pub chains_created: Vec<vk::Extent2D>,
    pub chains_dropped: usize,
    pub live_chains: usize,
    pub acquires: usize,
    pub submits: usize,
    pub allocations: Vec<u32>,
    pub frees: usize,
    pub single_use_submits: usize,
    pub wait_idle_calls: usize,
    pub slot_waits: usize,
    pub violations: Vec<String>,
    slots: Vec<Rc<SlotState>>,
    live_buffers: BTreeSet<u64>,
    recording: BTreeSet<u64>,
    recorded: BTreeSet<u64>,
    /// Slot each frame buffer was last submitted on.
    submitted_on: BTreeMap<u64, Rc<SlotState>>,
    next_buffer: u64,
    next_chain: u64,
    next_pass: u64,
}

impl Log {
    fn new() -> Self {
        Self {
            surface: surface_support(2, 3),
            preferences: ChainPreferences::default(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            chains_created: Vec::new(),
            chains_dropped: 0,
            live_chains: 0,
            acquires: 0,
            submits: 0,
            allocations: Vec::new(),
            frees: 0,
            single_use_submits: 0,
            wait_idle_calls: 0,
            slot_waits: 0,
            violations: Vec::new(),
            slots: Vec::new(),
            live_buffers: BTreeSet::new(),
            recording: BTreeSet::new(),
            recorded: BTreeSet::new(),
            submitted_on: BTreeMap::new(),
            next_buffer: 1,
            next_chain: 1,
            next_pass: 1,
        }
    }

    /// Frame command buffers allocated and not yet freed.
    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    fn violation(&mut self, message: impl Into<String>) {
        self.violations.push(message.into());
    }

    /// The buffer's last submission has not been observed complete.
    fn still_in_flight(&self, command_buffer: u64) -> bool {
        self.submitted_on
            .get(&command_buffer)
            .is_some_and(|slot| slot.in_flight.get())
    }
}

/// Surface capabilities with an undefined current extent, so chains take
/// the requested size.
pub fn surface_support(min_images: u32, max_images: u32) -> SurfaceSupport {
    let srgb = |format| vk::SurfaceFormatKHR {
        format,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 8192,
                height: 8192,
            },
            ..Default::default()
        },
        formats: vec![
            srgb(vk::Format::B8G8R8A8_SRGB),
            srgb(vk::Format::B8G8R8A8_UNORM),
        ],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

pub type SharedLog = Rc<RefCell<Log>>;

pub fn new_log() -> SharedLog {
    Rc::new(RefCell::new(Log::new()))
}

// =============================================================================
// Device context
// =============================================================================

pub struct MockDevice {
    log: SharedLog,
}

impl MockDevice {
    pub fn new(log: &SharedLog) -> Self {
        Self { log: log.clone() }
    }

    fn wait_slot(&self, slot: &MockSlot) {
        let mut log = self.log.borrow_mut();
        log.slot_waits += 1;
        slot.state.in_flight.set(false);
    }
}

impl DeviceContext for MockDevice {
    type CommandBuffer = u64;
    type FrameSlot = MockSlot;
    type Chain = MockChain;

    fn create_chain(
        &mut self,
        extent: vk::Extent2D,
        previous: Option<&MockChain>,
    ) -> RhiResult<MockChain> {
        let mut log = self.log.borrow_mut();

        if extent.width == 0 || extent.height == 0 {
            log.violation(format!("chain built with zero extent {:?}", extent));
        }
        match previous {
            Some(_) if log.live_chains != 1 => {
                let live = log.live_chains;
                log.violation(format!("rebuild with {live} live chains"));
            }
            None if log.live_chains != 0 => log.violation("initial build with a live chain"),
            _ => {}
        }

        let plan = plan_chain(&log.surface, extent, &log.preferences)?;

        let render_pass = match previous {
            Some(previous) if previous.format == plan.surface_format.format => {
                previous.render_pass
            }
            _ => {
                let id = log.next_pass;
                log.next_pass += 1;
                vk::RenderPass::from_raw(id)
            }
        };

        let id = log.next_chain;
        log.next_chain += 1;
        log.live_chains += 1;
        log.chains_created.push(plan.extent);

        Ok(MockChain {
            log: self.log.clone(),
            id,
            extent: plan.extent,
            format: plan.surface_format.format,
            present_mode: plan.present_mode,
            image_count: plan.image_count,
            render_pass,
            next_image: 0,
            in_pass: Cell::new(false),
        })
    }

    fn create_frame_slot(&mut self) -> RhiResult<MockSlot> {
        let mut log = self.log.borrow_mut();
        let state = Rc::new(SlotState::default());
        log.slots.push(state.clone());
        Ok(MockSlot {
            id: log.slots.len() - 1,
            state,
        })
    }

    fn wait_for_frame_slot(&self, slot: &MockSlot) -> RhiResult<()> {
        self.wait_slot(slot);
        Ok(())
    }

    fn allocate_command_buffers(&mut self, count: u32) -> RhiResult<Vec<u64>> {
        let mut log = self.log.borrow_mut();
        log.allocations.push(count);

        let first = log.next_buffer;
        log.next_buffer += u64::from(count);
        let buffers: Vec<u64> = (first..first + u64::from(count)).collect();
        log.live_buffers.extend(buffers.iter().copied());
        Ok(buffers)
    }

    fn free_command_buffers(&mut self, buffers: &[u64]) {
        let mut log = self.log.borrow_mut();
        if log.slots.iter().any(|slot| slot.in_flight.get()) {
            log.violation("command buffers freed while a frame is in flight");
        }
        for buffer in buffers {
            if !log.live_buffers.remove(buffer) {
                log.violation(format!("freed unknown command buffer {buffer}"));
            }
            log.submitted_on.remove(buffer);
        }
        log.frees += 1;
    }

    fn begin_recording(&self, command_buffer: u64) -> RhiResult<()> {
        let mut log = self.log.borrow_mut();
        if !log.live_buffers.contains(&command_buffer) {
            log.violation(format!("recording into freed buffer {command_buffer}"));
        }
        if log.still_in_flight(command_buffer) {
            log.violation(format!(
                "recording into buffer {command_buffer} before its slot fence was waited"
            ));
        }
        log.recorded.remove(&command_buffer);
        log.recording.insert(command_buffer);
        Ok(())
    }

    fn end_recording(&self, command_buffer: u64) -> RhiResult<()> {
        let mut log = self.log.borrow_mut();
        if !log.recording.remove(&command_buffer) {
            log.violation(format!("ended buffer {command_buffer} that was not recording"));
        }
        log.recorded.insert(command_buffer);
        Ok(())
    }

    fn begin_single_use(&mut self) -> RhiResult<u64> {
        let mut log = self.log.borrow_mut();
        let buffer = log.next_buffer;
        log.next_buffer += 1;
        log.recording.insert(buffer);
        Ok(buffer)
    }

    fn end_single_use(&mut self, command_buffer: u64) -> RhiResult<()> {
        let mut log = self.log.borrow_mut();
        if !log.recording.remove(&command_buffer) {
            log.violation("single-use buffer ended twice");
        }
        log.single_use_submits += 1;
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut log = self.log.borrow_mut();
        log.wait_idle_calls += 1;
        for slot in &log.slots {
            slot.in_flight.set(false);
        }
        Ok(())
    }
}

// =============================================================================
// Presentation chain
// =============================================================================

pub struct MockChain {
    log: SharedLog,
    pub id: u64,
    extent: vk::Extent2D,
    format: vk::Format,
    present_mode: vk::PresentModeKHR,
    image_count: u32,
    render_pass: vk::RenderPass,
    next_image: u32,
    in_pass: Cell<bool>,
}

impl PresentationChain for MockChain {
    type CommandBuffer = u64;
    type FrameSlot = MockSlot;

    fn acquire_next_image(&mut self, slot: &MockSlot) -> RhiResult<AcquireOutcome> {
        let mut log = self.log.borrow_mut();
        log.acquires += 1;

        // Waiting the slot fence completes its previous submission.
        log.slot_waits += 1;
        slot.state.in_flight.set(false);

        if slot.state.acquired.get() {
            log.violation(format!("slot {} acquired twice without submit", slot.id));
        }

        let outcome = match log.acquire_script.pop_front() {
            Some(Scripted::OutOfDate) => return Ok(AcquireOutcome::OutOfDate),
            Some(Scripted::Fail) => return Err(RhiError::AcquireFailed("scripted".to_string())),
            Some(Scripted::Suboptimal) => AcquireOutcome::Suboptimal(self.next_image),
            None => AcquireOutcome::Ready(self.next_image),
        };

        slot.state.acquired.set(true);
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(outcome)
    }

    fn submit(
        &mut self,
        command_buffer: u64,
        image_index: u32,
        slot: &MockSlot,
    ) -> RhiResult<PresentOutcome> {
        let mut log = self.log.borrow_mut();
        log.submits += 1;

        if image_index >= self.image_count {
            log.violation(format!("submit of image {image_index} out of range"));
        }
        if !slot.state.acquired.replace(false) {
            log.violation(format!("slot {} submitted without acquire", slot.id));
        }
        if !log.recorded.remove(&command_buffer) {
            log.violation(format!("submitted unrecorded buffer {command_buffer}"));
        }
        if self.in_pass.get() {
            log.violation("submitted inside the render pass");
        }
        if log.still_in_flight(command_buffer) {
            log.violation(format!(
                "submitted buffer {command_buffer} before its slot fence was waited"
            ));
        }
        log.submitted_on.insert(command_buffer, slot.state.clone());
        slot.state.in_flight.set(true);

        match log.present_script.pop_front() {
            Some(Scripted::OutOfDate) => Ok(PresentOutcome::OutOfDate),
            Some(Scripted::Suboptimal) => Ok(PresentOutcome::Suboptimal),
            Some(Scripted::Fail) => Err(RhiError::PresentFailed("scripted".to_string())),
            None => Ok(PresentOutcome::Success),
        }
    }

    fn begin_render_pass(&self, command_buffer: u64, image_index: u32) -> RhiResult<()> {
        self.framebuffer(image_index)?;
        let mut log = self.log.borrow_mut();
        if !log.recording.contains(&command_buffer) {
            log.violation("render pass begun outside recording");
        }
        if self.in_pass.replace(true) {
            log.violation("render pass begun twice");
        }
        Ok(())
    }

    fn end_render_pass(&self, _command_buffer: u64) {
        if !self.in_pass.replace(false) {
            self.log.borrow_mut().violation("render pass ended while not begun");
        }
    }

    fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        if image_index >= self.image_count {
            return Err(RhiError::IndexOutOfRange {
                index: image_index,
                count: self.image_count,
            });
        }
        Ok(vk::Framebuffer::from_raw(self.id * 100 + u64::from(image_index) + 1))
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    fn image_count(&self) -> u32 {
        self.image_count
    }
}

impl Drop for MockChain {
    fn drop(&mut self) {
        let mut log = self.log.borrow_mut();
        if log.slots.iter().any(|slot| slot.in_flight.get()) {
            log.violation(format!("chain {} dropped while a frame is in flight", self.id));
        }
        log.live_chains -= 1;
        log.chains_dropped += 1;
    }
}

// =============================================================================
// Surface provider
// =============================================================================

/// Surface whose size and events are set by the test.
pub struct StubSurface {
    pub extent: (u32, u32),
    /// `current_extent` reports `(0, 0)` for this many more polls.
    pub zero_polls: Cell<usize>,
    pub resized: bool,
    pub polls: Cell<usize>,
    pub waits: usize,
    /// Close is requested after this many event waits.
    pub close_after_waits: Option<usize>,
    /// Every event wait delivers a resize, as a restore from minimized does.
    pub resize_on_wake: bool,
}

impl StubSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: (width, height),
            zero_polls: Cell::new(0),
            resized: false,
            polls: Cell::new(0),
            waits: 0,
            close_after_waits: None,
            resize_on_wake: false,
        }
    }

    /// Reports a resize to `width` x `height`.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = (width, height);
        self.resized = true;
    }

    /// Reports zero size for the next `polls` polls.
    pub fn minimize_for(&mut self, polls: usize) {
        self.zero_polls.set(polls);
        self.resized = true;
    }
}

impl SurfaceProvider for StubSurface {
    fn current_extent(&self) -> (u32, u32) {
        self.polls.set(self.polls.get() + 1);
        let remaining = self.zero_polls.get();
        if remaining > 0 {
            self.zero_polls.set(remaining - 1);
            (0, 0)
        } else {
            self.extent
        }
    }

    fn wait_for_next_event(&mut self) {
        self.waits += 1;
        if self.resize_on_wake {
            self.resized = true;
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    fn close_requested(&self) -> bool {
        self.close_after_waits.is_some_and(|n| self.waits >= n)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn orchestrator(log: &SharedLog, width: u32, height: u32) -> Orchestrator {
    orchestrator_with(log, StubSurface::new(width, height), OrchestratorSettings::default())
}

pub fn orchestrator_with(
    log: &SharedLog,
    surface: StubSurface,
    settings: OrchestratorSettings,
) -> Orchestrator {
    FrameOrchestrator::new(MockDevice::new(log), surface, settings)
        .expect("orchestrator construction")
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

pub fn assert_no_violations(log: &SharedLog) {
    let log = log.borrow();
    assert!(log.violations.is_empty(), "violations: {:#?}", log.violations);
}
