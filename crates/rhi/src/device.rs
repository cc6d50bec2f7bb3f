//! The GPU device contract.
//!
//! [`GpuDevice`] is everything the renderer core needs from a GPU: resource
//! creation and destruction, command recording, descriptors, pipelines,
//! queue submission and presentation. Every operation is fallible and
//! reports an [`RhiError`](crate::RhiError) with a human-readable message;
//! nothing panics on driver failure.
//!
//! Two implementations exist: [`VulkanDevice`](crate::vulkan::VulkanDevice)
//! and, for tests, [`HeadlessDevice`](crate::headless::HeadlessDevice).
//!
//! Destruction is explicit. Dropping a handle never frees the object, so the
//! caller decides when the GPU is done with it.

use std::sync::Arc;

use crate::acceleration::{AccelerationStructureDesc, AccelerationStructureInfo};
use crate::buffer::BufferDesc;
use crate::command::{CommandPoolKind, GpuCommand};
use crate::descriptor::{DescriptorBinding, DescriptorPoolDesc, DescriptorWrite};
use crate::error::RhiResult;
use crate::image::ImageDesc;
use crate::pipeline::PipelineDesc;
use crate::resource::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, CommandPoolHandle,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle,
    ImageHandle, PipelineHandle, SemaphoreHandle,
};
use crate::swapchain::{AcquiredImage, Extent2D, PresentStatus, SurfaceInfo, SwapchainInfo};
use crate::sync::Submission;

/// Shared device reference used throughout the renderer.
pub type DeviceRef = Arc<dyn GpuDevice>;

/// GPU device and its single graphics/compute/present queue.
pub trait GpuDevice: Send + Sync {
    /// Human-readable adapter name.
    fn name(&self) -> &str;

    // ========================================================================
    // Buffers and images
    // ========================================================================

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<BufferHandle>;

    /// Writes into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()>;

    fn destroy_buffer(&self, buffer: BufferHandle);

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<ImageHandle>;

    fn destroy_image(&self, image: ImageHandle);

    // ========================================================================
    // Acceleration structures
    // ========================================================================

    /// Allocates storage for a structure over `desc`; the build is recorded separately.
    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureInfo>;

    fn destroy_acceleration_structure(&self, handle: AccelerationStructureHandle);

    // ========================================================================
    // Synchronization
    // ========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<FenceHandle>;

    fn destroy_fence(&self, fence: FenceHandle);

    /// Blocks until the fence is signaled or `timeout_ns` elapses.
    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RhiResult<()>;

    fn reset_fence(&self, fence: FenceHandle) -> RhiResult<()>;

    /// Non-blocking status query.
    fn is_fence_signaled(&self, fence: FenceHandle) -> RhiResult<bool>;

    fn create_semaphore(&self) -> RhiResult<SemaphoreHandle>;

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    // ========================================================================
    // Command pools and buffers
    // ========================================================================

    fn create_command_pool(&self, kind: CommandPoolKind) -> RhiResult<CommandPoolHandle>;

    /// Destroys the pool and implicitly every buffer allocated from it.
    fn destroy_command_pool(&self, pool: CommandPoolHandle);

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> RhiResult<CommandBufferHandle>;

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);

    /// Begins one-time-submit recording, implicitly resetting the buffer.
    fn begin_command_buffer(&self, buffer: CommandBufferHandle) -> RhiResult<()>;

    fn end_command_buffer(&self, buffer: CommandBufferHandle) -> RhiResult<()>;

    /// Records one command into a buffer in the recording state.
    fn encode(&self, buffer: CommandBufferHandle, command: GpuCommand) -> RhiResult<()>;

    // ========================================================================
    // Descriptors and pipelines
    // ========================================================================

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<DescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> RhiResult<DescriptorPoolHandle>;

    /// Destroys the pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocates a set; `variable_count` sizes a trailing bindless binding.
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> RhiResult<DescriptorSetHandle>;

    fn write_descriptors(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RhiResult<()>;

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<PipelineHandle>;

    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // ========================================================================
    // Queue
    // ========================================================================

    fn submit(&self, submission: &Submission<'_>) -> RhiResult<()>;

    /// Blocks until all submitted work has finished.
    fn wait_idle(&self) -> RhiResult<()>;

    // ========================================================================
    // Presentation
    // ========================================================================

    fn surface_info(&self) -> RhiResult<SurfaceInfo>;

    /// Creates the swapchain, replacing (and destroying) any previous one.
    fn create_swapchain(&self, extent: Extent2D) -> RhiResult<SwapchainInfo>;

    fn destroy_swapchain(&self);

    /// Acquires the next image, signaling `signal` when it is available.
    ///
    /// Returns [`RhiError::SwapchainOutOfDate`](crate::RhiError::SwapchainOutOfDate)
    /// when the swapchain must be recreated first.
    fn acquire_next_image(&self, signal: SemaphoreHandle) -> RhiResult<AcquiredImage>;

    /// Queues the image for presentation after `wait` is signaled.
    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> RhiResult<PresentStatus>;
}
