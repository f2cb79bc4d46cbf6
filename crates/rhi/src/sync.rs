//! Fences and frame slots.
//!
//! A [`FrameSlot`] is reused cyclically by frames `n`, `n + K`, `n + 2K`, ...
//! Its in-flight fence is the only signal that the GPU is done with the
//! slot's command buffer and semaphores, so it is waited before every reuse
//! and reset only right before the submission that signals it again. A frame
//! abandoned after acquire therefore leaves the fence signaled and the next
//! wait cannot deadlock.
//!
//! ```text
//! wait(in_flight) -> acquire (signals image_available)
//!                 -> record
//!                 -> reset(in_flight) -> submit (waits image_available,
//!                                               signals render_finished + in_flight)
//!                 -> present (waits render_finished)
//! ```

use std::sync::Arc;

use ash::vk;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of frame slots used when nothing is configured.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Host-waitable fence.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled so the first wait
    /// returns at once.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until signaled or `timeout_ns` elapses (`u64::MAX` never does).
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] on expiry, [`RhiError::DeviceLost`] if the
    /// device was lost.
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        wait_for_fences(&self.device, &[self.fence], timeout_ns)
    }

    /// The fence must not be pending on any queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}

/// Waits for all `fences`, mapping timeouts and device loss.
pub fn wait_for_fences(device: &Device, fences: &[vk::Fence], timeout_ns: u64) -> RhiResult<()> {
    unsafe {
        device
            .handle()
            .wait_for_fences(fences, true, timeout_ns)
            .map_err(RhiError::from_wait)
    }
}

/// Semaphores and fence of one frame in flight.
pub struct FrameSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    /// Creates a slot whose fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if any object cannot be created.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let handle = device.handle();
        let create_info = vk::SemaphoreCreateInfo::default();

        let image_available = unsafe { handle.create_semaphore(&create_info, None)? };
        let render_finished = match unsafe { handle.create_semaphore(&create_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { handle.destroy_semaphore(image_available, None) };
                return Err(e.into());
            }
        };
        let in_flight = match Fence::new(device.clone(), true) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    handle.destroy_semaphore(image_available, None);
                    handle.destroy_semaphore(render_finished, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Signaled by acquire, waited by submit.
    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Signaled by submit, waited by present.
    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        let device = self.in_flight.device.handle();
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}
