//! Logical device, queues and the GPU allocator.
//!
//! ```no_run
//! use frameloop_rhi::device::Device;
//! use frameloop_rhi::instance::Instance;
//! use frameloop_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! # fn example(instance: &Instance, surface: vk::SurfaceKHR) -> Result<(), frameloop_rhi::RhiError> {
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! let device = Device::new(instance, &gpu)?;
//! device.wait_idle()?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilies};

/// Device extensions every selected GPU must support.
pub const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue priority for the single queue taken from each family.
const QUEUE_PRIORITY: [f32; 1] = [1.0];

/// Logical device shared through `Arc` by every Vulkan object that needs it.
///
/// The frame orchestrator is the only submitter, so queue access is not
/// locked. The allocator is only touched when depth buffers are built.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilies,
    // Released before the device in `Drop`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
}

impl Device {
    /// Creates the logical device with one queue per distinct family.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator setup fails.
    pub fn new(instance: &Instance, gpu: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = gpu.queue_families;
        let families = queue_families.unique();

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&QUEUE_PRIORITY)
            })
            .collect();
        let extensions: Vec<*const c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.handle().create_device(gpu.device, &create_info, None)? };
        debug!("Logical device created with queue families {:?}", families);

        let allocator = match create_allocator(instance, &device, gpu.device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        info!(
            "Device ready on '{}' (graphics family {}, present family {})",
            gpu.device_name(),
            queue_families.graphics,
            queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device: gpu.device,
            graphics_queue,
            present_queue,
            queue_families,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.queue_families.graphics
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilies {
        &self.queue_families
    }

    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Blocks until all queues are idle.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if the device was lost.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle().map_err(RhiError::from_wait) }
    }

    /// Submits to the graphics queue, signaling `fence` on completion.
    ///
    /// # Safety
    ///
    /// The command buffers must be fully recorded, every semaphore and the
    /// fence must be in the state the submission expects, and `fence` must
    /// be unsignaled.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)
                .map_err(RhiError::from_wait)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Device wait failed during drop: {}", e);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is Send + Sync, queues are plain handles and the
// allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

fn create_allocator(
    instance: &Instance,
    device: &ash::Device,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<Allocator> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: instance.handle().clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: Default::default(),
    })?;
    debug!("GPU allocator initialized");
    Ok(allocator)
}
