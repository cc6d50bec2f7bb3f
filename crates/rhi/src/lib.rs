//! Render Hardware Interface.
//!
//! This crate defines the GPU device contract the renderer core is written
//! against and the Vulkan backend that implements it:
//! - [`GpuDevice`]: resources, command recording, descriptors, pipelines,
//!   queue submission and presentation
//! - Typed, generation-checked handles for every GPU object
//! - [`vulkan::VulkanDevice`]: hardware ray tracing over `ash`
//! - `headless::HeadlessDevice` (tests and the `headless` feature): an
//!   in-order simulated queue for exercising the core without a GPU

mod error;

pub mod acceleration;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod resource;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

#[cfg(any(test, feature = "headless"))]
pub mod headless;

pub use device::{DeviceRef, GpuDevice};
pub use error::{RhiError, RhiResult};
pub use resource::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, CommandPoolHandle,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle,
    ImageHandle, PipelineHandle, SemaphoreHandle,
};
pub use swapchain::{DrawableSurface, Extent2D};

// Re-export ash types that users might need
pub use ash::vk;
