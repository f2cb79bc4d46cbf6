//! Frame loop error type.

use thiserror::Error;

use frameloop_rhi::RhiError;

use crate::frame::FrameState;

/// Errors returned by the frame orchestrator.
///
/// Every variant is fatal to the render loop. Chain staleness never shows up
/// here; it is recovered by rebuilding.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Device or presentation failure
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Window or surface setup failure
    #[error(transparent)]
    Platform(#[from] frameloop_core::Error),

    /// An operation was called out of order
    #[error("{operation} is not valid in the {state:?} state")]
    InvalidState {
        operation: &'static str,
        state: FrameState,
    },

    /// The chain has fewer images than frame slots
    #[error("{frames} frames in flight exceed the {images} presentable images")]
    TooManyFramesInFlight { frames: usize, images: u32 },

    /// The window was closed while waiting for a usable surface size
    #[error("Surface closed")]
    SurfaceClosed,
}

/// Result type alias for frame loop operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;
