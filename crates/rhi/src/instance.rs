//! Vulkan instance and validation routing.
//!
//! [`Instance`] loads the Vulkan library, enables the surface extensions the
//! window system asks for and, when validation is requested and installed,
//! the Khronos validation layer. Validation output goes to `tracing` under
//! the `vulkan` target:
//!
//! | Vulkan severity | tracing level |
//! |---|---|
//! | ERROR | `error!` |
//! | WARNING | `warn!` |
//! | INFO | `debug!` |
//! | VERBOSE | `trace!` |
//!
//! ```no_run
//! use frameloop_rhi::instance::Instance;
//!
//! // Surface extensions normally come from the window system.
//! let instance = Instance::new(c"frameloop", &[], cfg!(debug_assertions))
//!     .expect("Failed to create Vulkan instance");
//! assert_eq!(instance.api_version(), ash::vk::API_VERSION_1_2);
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_void};

use ash::{Entry, vk};
use tracing::{Level, debug, error, info, trace, warn};

use crate::error::RhiResult;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"frameloop";
const API_VERSION: u32 = vk::API_VERSION_1_2;

/// Debug-utils messenger bound to one instance.
struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Loaded Vulkan library plus an instance.
///
/// The messenger is destroyed before the instance on drop.
pub struct Instance {
    messenger: Option<DebugMessenger>,
    instance: ash::Instance,
    entry: Entry,
}

impl Instance {
    /// Creates an instance with `surface_extensions` enabled.
    ///
    /// Validation is skipped with a warning when the layer is not installed.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::LoadingError`](crate::RhiError::LoadingError) if no Vulkan loader is present, or
    /// a Vulkan error if the instance or messenger cannot be created.
    pub fn new(
        application_name: &CStr,
        surface_extensions: &[*const c_char],
        enable_validation: bool,
    ) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && has_layer(&entry, VALIDATION_LAYER)?;
        if enable_validation && !validation {
            warn!(
                "{} requested but not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }

        let mut extensions = Self::required_extensions(surface_extensions);
        let layers = if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(application_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        // Chained so that instance creation itself is validated.
        let mut messenger_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if validation {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) } {
                Ok(handle) => Some(DebugMessenger { loader, handle }),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        info!(
            "Vulkan instance created: {} extension(s), validation {}",
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            messenger,
            instance,
            entry,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn api_version(&self) -> u32 {
        API_VERSION
    }

    /// True when validation messages are being routed to `tracing`.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }

    /// `VK_KHR_surface` followed by each window-system extension, once.
    fn required_extensions(surface_extensions: &[*const c_char]) -> Vec<*const c_char> {
        let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];

        for &ext in surface_extensions {
            // SAFETY: extension names handed to us are static, nul-terminated strings.
            let name = unsafe { CStr::from_ptr(ext) };
            if !extensions
                .iter()
                .any(|&known| unsafe { CStr::from_ptr(known) } == name)
            {
                extensions.push(ext);
            }
        }

        extensions
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(messenger) = self.messenger.take() {
                messenger
                    .loader
                    .destroy_debug_utils_messenger(messenger.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn has_layer(entry: &Entry, wanted: &CStr) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == wanted)))
}

fn messenger_create_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Tracing level for a validation message severity.
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

fn message_kind(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// # Safety
///
/// Called by the validation layer with a valid or null callback data pointer.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the layer keeps `data` alive for the duration of the call.
    let Some(data) = (unsafe { data.as_ref() }) else {
        return vk::FALSE;
    };
    let message = if data.p_message.is_null() {
        Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
    };
    let kind = message_kind(kind);

    let level = severity_level(severity);
    if level == Level::ERROR {
        error!(target: "vulkan", kind, "{}", message);
    } else if level == Level::WARN {
        warn!(target: "vulkan", kind, "{}", message);
    } else if level == Level::DEBUG {
        debug!(target: "vulkan", kind, "{}", message);
    } else {
        trace!(target: "vulkan", kind, "{}", message);
    }

    vk::FALSE
}
