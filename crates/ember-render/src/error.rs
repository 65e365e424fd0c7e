//! Renderer error types.

use ember_gpu::GpuError;
use ember_platform::PlatformError;
use thiserror::Error;

/// Errors raised while building or driving the frame loop.
///
/// Swapchain staleness is not an error; it is reported through
/// [`AcquireOutcome`](crate::AcquireOutcome) and
/// [`PresentOutcome`](crate::PresentOutcome).
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("Surface reports no supported formats")]
    NoCompatibleFormat,

    #[error("Surface reports no present modes")]
    NoCompatiblePresentMode,

    #[error("No depth attachment format is supported")]
    NoCompatibleDepthFormat,

    #[error("Cannot upload an empty scene")]
    EmptyScene,

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub type Result<T> = std::result::Result<T, RenderError>;
