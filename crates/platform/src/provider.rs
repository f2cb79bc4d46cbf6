//! The surface-provider seam the frame orchestrator talks to.

/// Source of the presentation surface's size and resize notifications.
pub trait SurfaceProvider {
    /// Current drawable size in pixels; `(0, 0)` while minimized.
    fn current_extent(&self) -> (u32, u32);

    /// Blocks until at least one window event has been processed.
    fn wait_for_next_event(&mut self);

    /// Returns whether the surface was resized since the last call, and clears the flag.
    fn take_resized(&mut self) -> bool;

    /// True once the user asked to close the window.
    fn close_requested(&self) -> bool {
        false
    }
}
