//! Choosing a GPU that can present to the window surface.
//!
//! Every enumerated GPU is either accepted as a [`PhysicalDeviceInfo`] or
//! rejected with a [`Rejection`] that is logged at debug level. Accepted GPUs
//! are ranked by [`score`].
//!
//! ```no_run
//! use frameloop_rhi::instance::Instance;
//! use frameloop_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! # fn example(instance: &Instance, surface: vk::SurfaceKHR) -> Result<(), frameloop_rhi::RhiError> {
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! println!("Presenting from {}", gpu.device_name());
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::ffi::CStr;

use ash::vk;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::DEVICE_EXTENSIONS;
use crate::error::{RhiError, RhiResult};
use crate::present::SurfaceSupport;

/// Queue families used for rendering and presentation. May be the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// True when one family does both.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What one queue family can do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Picks graphics and present families.
///
/// A single family that does both wins; otherwise the first of each.
pub fn pick_queue_families(families: &[FamilySupport]) -> Option<QueueFamilies> {
    if let Some(both) = families.iter().position(|f| f.graphics && f.present) {
        let index = both as u32;
        return Some(QueueFamilies {
            graphics: index,
            present: index,
        });
    }

    let graphics = families.iter().position(|f| f.graphics)?;
    let present = families.iter().position(|f| f.present)?;
    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// Why a GPU cannot drive the surface.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("no graphics queue")]
    NoGraphicsQueue,
    #[error("no queue can present to the surface")]
    NoPresentQueue,
    #[error("missing device extension {0:?}")]
    MissingExtension(&'static CStr),
    #[error("surface lists no formats or present modes")]
    InadequateSurface,
    #[error("surface query failed: {0}")]
    SurfaceQuery(#[source] RhiError),
}

/// A GPU that can render and present to the surface.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> Cow<'_, str> {
        self.properties
            .device_name_as_c_str()
            .map_or(Cow::Borrowed("unknown device"), CStr::to_string_lossy)
    }

    /// Sum of the device-local heaps in bytes.
    pub fn device_local_memory(&self) -> u64 {
        let heaps = &self.memory_properties.memory_heaps
            [..self.memory_properties.memory_heap_count as usize];
        heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    pub fn score(&self) -> u64 {
        score(
            self.properties.device_type,
            self.properties.limits.max_image_dimension2_d,
            self.device_local_memory(),
            self.queue_families.is_shared(),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field(
                "api_version",
                &format_args!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Ranks a GPU; higher is better.
///
/// Device type dominates. A shared graphics/present family is worth a little
/// because chain images can then use exclusive sharing.
pub fn score(
    device_type: vk::PhysicalDeviceType,
    max_image_dimension: u32,
    device_local_bytes: u64,
    shared_queue: bool,
) -> u64 {
    let type_score: u64 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 10,
    };
    let vram_mib = (device_local_bytes >> 20).min(16_384);

    let queue_bonus = if shared_queue { 500 } else { 0 };

    type_score + u64::from(max_image_dimension) / 4 + vram_mib / 4 + queue_bonus
}

/// Selects the highest-scoring GPU that can present to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if every GPU is rejected.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            match inspect(instance, device, properties, surface, surface_loader) {
                Ok(info) => {
                    debug!("GPU '{}' accepted, score {}", info.device_name(), info.score());
                    Some(info)
                }
                Err(rejection) => {
                    let name = properties
                        .device_name_as_c_str()
                        .map_or(Cow::Borrowed("unknown device"), CStr::to_string_lossy);
                    debug!("GPU '{}' rejected: {}", name, rejection);
                    None
                }
            }
        })
        .max_by_key(PhysicalDeviceInfo::score);

    let Some(selected) = best else {
        warn!("No GPU can present to the surface");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU '{}' ({:?}), graphics family {}, present family {}",
        selected.device_name(),
        selected.properties.device_type,
        selected.queue_families.graphics,
        selected.queue_families.present
    );

    Ok(selected)
}

fn inspect(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, Rejection> {
    let families: Vec<FamilySupport> =
        unsafe { instance.get_physical_device_queue_family_properties(device) }
            .iter()
            .enumerate()
            .map(|(index, family)| FamilySupport {
                graphics: family.queue_count > 0
                    && family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: family.queue_count > 0
                    && unsafe {
                        surface_loader
                            .get_physical_device_surface_support(device, index as u32, surface)
                            .unwrap_or(false)
                    },
            })
            .collect();

    let queue_families = pick_queue_families(&families).ok_or_else(|| {
        if families.iter().any(|f| f.graphics) {
            Rejection::NoPresentQueue
        } else {
            Rejection::NoGraphicsQueue
        }
    })?;

    let available = unsafe { instance.enumerate_device_extension_properties(device) }
        .unwrap_or_default();
    if let Some(missing) = DEVICE_EXTENSIONS.iter().find(|required| {
        !available
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(**required))
    }) {
        return Err(Rejection::MissingExtension(*missing));
    }

    let support =
        SurfaceSupport::query(device, surface, surface_loader).map_err(Rejection::SurfaceQuery)?;
    if !support.is_adequate() {
        return Err(Rejection::InadequateSurface);
    }

    Ok(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
        queue_families,
    })
}
