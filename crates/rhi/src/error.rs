//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
///
/// Every fallible GPU operation reports one of these; callers log it and
/// skip the affected work rather than aborting.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// The swapchain no longer matches the surface and must be recreated
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// Stale or unknown resource handle
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A descriptor class has no free slots left
    #[error("Out of descriptors: {0}")]
    OutOfDescriptors(String),

    /// A wait did not complete in time
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Requested operation is not supported by the device
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
