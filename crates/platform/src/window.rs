//! Window management using winit.
//!
//! [`Window`] owns the event loop and pumps it on demand instead of handing
//! control to `EventLoop::run_app`, so the render loop stays in charge and
//! can block on the next event while the window is minimized.

use std::ffi::c_char;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use frameloop_core::{Error, Result, WindowConfig};

use crate::provider::SurfaceProvider;

/// How long a startup pump waits for the window to appear.
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(10);

/// RAII wrapper for a Vulkan surface.
///
/// This struct owns a `vk::SurfaceKHR` handle and ensures it is properly destroyed
/// when dropped. The surface loader is stored internally to perform cleanup.
///
/// # Ownership
/// The surface is destroyed automatically when this struct is dropped.
/// The caller must ensure that the Vulkan instance outlives this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Get the raw Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Get a reference to the surface loader.
    ///
    /// This is useful for querying surface capabilities, formats, and present modes.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window::create_surface from the
        // same instance as the loader, and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// Event handler state shared with the pumped event loop.
struct WindowState {
    attributes: Option<WindowAttributes>,
    window: Option<Arc<WinitWindow>>,
    size: PhysicalSize<u32>,
    resized: bool,
    close_requested: bool,
    error: Option<String>,
}

impl WindowState {
    fn new(attributes: WindowAttributes, size: PhysicalSize<u32>) -> Self {
        Self {
            attributes: Some(attributes),
            window: None,
            size,
            resized: false,
            close_requested: false,
            error: None,
        }
    }

    fn on_resized(&mut self, size: PhysicalSize<u32>) {
        if size == self.size {
            return;
        }
        debug!(
            "Window resized: {}x{} -> {}x{}",
            self.size.width, self.size.height, size.width, size.height
        );
        self.size = size;
        self.resized = true;
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);

        let Some(attributes) = self.attributes.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => {
                self.size = window.inner_size();
                info!("Window created: {}x{}", self.size.width, self.size.height);
                self.window = Some(Arc::new(window));
            }
            Err(e) => {
                self.error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => self.on_resized(size),
            WindowEvent::Occluded(occluded) => {
                debug!("Window occluded: {}", occluded);
            }
            _ => {}
        }
    }
}

/// A window that owns its event loop and acts as the [`SurfaceProvider`].
pub struct Window {
    state: WindowState,
    window: Arc<WinitWindow>,
    event_loop: EventLoop<()>,
}

impl Window {
    /// Creates the event loop and the window described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the event loop or the window cannot be created.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Wait);

        let size = PhysicalSize::new(config.width, config.height);
        let attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(size)
            .with_resizable(config.resizable);

        let mut state = WindowState::new(attributes, size);

        let window = loop {
            let status = event_loop.pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut state);

            if let Some(e) = state.error.take() {
                return Err(Error::Window(e));
            }
            if let Some(window) = &state.window {
                break window.clone();
            }
            if let PumpStatus::Exit(code) = status {
                return Err(Error::Window(format!(
                    "event loop exited with code {code} before the window was created"
                )));
            }
        };

        Ok(Self {
            state,
            window,
            event_loop,
        })
    }

    /// Processes pending events without blocking.
    ///
    /// Returns `false` once the window should close.
    pub fn poll_events(&mut self) -> bool {
        self.pump(Some(Duration::ZERO));
        !self.state.close_requested
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state)
        {
            debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Get an Arc reference to the underlying winit window.
    pub fn inner_arc(&self) -> Arc<WinitWindow> {
        self.window.clone()
    }

    /// Get the display handle for Vulkan surface creation.
    pub fn display_handle(
        &self,
    ) -> std::result::Result<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError>
    {
        self.window.display_handle()
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// # Errors
    ///
    /// Returns an error if the display handle is unavailable or the platform
    /// is not supported by `ash-window`.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        required_extensions(display_handle.as_raw())
    }

    /// Create a Vulkan surface for this window.
    ///
    /// Returns a RAII [`Surface`] wrapper that automatically destroys the surface when dropped.
    ///
    /// # Errors
    /// Returns an error if surface creation fails due to:
    /// - Invalid window or display handles
    /// - Vulkan surface creation failure
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are valid, and the handles come from a live
        // winit window. The surface is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

impl SurfaceProvider for Window {
    fn current_extent(&self) -> (u32, u32) {
        if self.window.is_minimized() == Some(true) {
            return (0, 0);
        }
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn wait_for_next_event(&mut self) {
        self.pump(None);
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}

/// Get the required Vulkan extensions for surface creation on the current platform.
///
/// The returned pointers reference static strings owned by `ash-window`.
///
/// # Errors
/// Returns an error if the platform is not supported.
pub fn required_extensions(
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Vulkan(format!("Failed to enumerate required extensions: {}", e)))?;

    debug!(
        "Required Vulkan extensions for surface: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns valid, null-terminated static strings.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
