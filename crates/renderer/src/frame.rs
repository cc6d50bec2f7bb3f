//! Per-frame resources and swapchain-dependent render targets.
//!
//! Each frame in flight owns the objects it records and synchronizes with,
//! so the CPU can prepare frame N+1 while the GPU still renders frame N:
//!
//! ```text
//! 1. Wait on fence          (previous use of this slot has executed)
//! 2. Acquire image          (signals image_available)
//! 3. Record command_buffer
//! 4. Submit                 (waits image_available, signals render_finished + fence)
//! 5. Present                (waits render_finished)
//! ```
//!
//! Every frame slot also has its own render target. The ray-trace pass
//! accumulates into the current slot's target while reading the previous
//! slot's, so the render descriptor set of slot `i` binds target `i` and
//! target `i - 1 mod N`.

use tracing::debug;

use tracer_rhi::command::CommandPoolKind;
use tracer_rhi::descriptor::{
    DescriptorBinding, DescriptorKind, DescriptorPoolDesc, DescriptorResource, DescriptorWrite,
    ShaderStages,
};
use tracer_rhi::image::ImageDesc;
use tracer_rhi::swapchain::SwapchainInfo;
use tracer_rhi::{
    CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, Extent2D, FenceHandle, GpuDevice, ImageHandle, PipelineHandle,
    RhiResult, SemaphoreHandle,
};

use crate::scene_resources::SceneTlas;

/// Render set binding of the scene top-level structure.
pub const TLAS_BINDING: u32 = 0;
/// Render set binding of the current frame's render target.
pub const RENDER_TARGET_BINDING: u32 = 1;
/// Render set binding of the previous frame's render target.
pub const PREVIOUS_RENDER_TARGET_BINDING: u32 = 2;
/// Render set binding of the [`GeometryInstance`](crate::gpu_types::GeometryInstance) buffer.
pub const INSTANCE_BINDING: u32 = 3;
/// Render set binding of the [`MaterialData`](crate::gpu_types::MaterialData) buffer.
pub const MATERIAL_BINDING: u32 = 4;
/// Display set binding of the sampled render target.
pub const DISPLAY_SOURCE_BINDING: u32 = 0;

/// Slot rendered before `index` when cycling through `count` slots.
#[inline]
pub fn previous_frame(index: usize, count: usize) -> usize {
    (index + count - 1) % count
}

/// Outcome of one [`Renderer::render_frame`](crate::Renderer::render_frame) call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented.
    Presented,
    /// The swapchain no longer matches the surface; it is recreated on the
    /// next frame. The frame may or may not have been presented.
    SwapchainStale,
    /// Nothing was rendered (zero-sized drawable).
    Skipped,
}

/// An object created while setting up the frame loop.
///
/// Used to unwind a partially completed setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GpuObject {
    CommandPool(CommandPoolHandle),
    SetLayout(DescriptorSetLayoutHandle),
    DescriptorPool(DescriptorPoolHandle),
    Pipeline(PipelineHandle),
    Fence(FenceHandle),
    Semaphore(SemaphoreHandle),
}

impl GpuObject {
    pub(crate) fn destroy(self, device: &dyn GpuDevice) {
        match self {
            GpuObject::CommandPool(pool) => device.destroy_command_pool(pool),
            GpuObject::SetLayout(layout) => device.destroy_descriptor_set_layout(layout),
            GpuObject::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            GpuObject::Pipeline(pipeline) => device.destroy_pipeline(pipeline),
            GpuObject::Fence(fence) => device.destroy_fence(fence),
            GpuObject::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
        }
    }
}

/// Records `result`'s object in `created` so it can be unwound.
pub(crate) fn track<T: Copy>(
    created: &mut Vec<GpuObject>,
    wrap: fn(T) -> GpuObject,
    result: RhiResult<T>,
) -> RhiResult<T> {
    let value = result?;
    created.push(wrap(value));
    Ok(value)
}

/// Bindings of the per-frame render set.
pub fn render_set_bindings() -> [DescriptorBinding; 5] {
    [
        DescriptorBinding::single(
            TLAS_BINDING,
            DescriptorKind::AccelerationStructure,
            ShaderStages::RAYGEN | ShaderStages::CLOSEST_HIT,
        ),
        DescriptorBinding::single(
            RENDER_TARGET_BINDING,
            DescriptorKind::StorageImage,
            ShaderStages::RAYGEN,
        ),
        DescriptorBinding::single(
            PREVIOUS_RENDER_TARGET_BINDING,
            DescriptorKind::StorageImage,
            ShaderStages::RAYGEN,
        ),
        DescriptorBinding::single(
            INSTANCE_BINDING,
            DescriptorKind::StorageBuffer,
            ShaderStages::CLOSEST_HIT,
        ),
        DescriptorBinding::single(
            MATERIAL_BINDING,
            DescriptorKind::StorageBuffer,
            ShaderStages::CLOSEST_HIT,
        ),
    ]
}

/// Bindings of the per-frame display set.
pub fn display_set_bindings() -> [DescriptorBinding; 1] {
    [DescriptorBinding::single(
        DISPLAY_SOURCE_BINDING,
        DescriptorKind::SampledImage,
        ShaderStages::FRAGMENT,
    )]
}

/// Pool sizes for `frames` render and display sets.
pub fn frame_descriptor_pool_desc(frames: u32) -> DescriptorPoolDesc {
    DescriptorPoolDesc {
        max_sets: frames * 2,
        sizes: vec![
            (DescriptorKind::AccelerationStructure, frames),
            (DescriptorKind::StorageImage, frames * 2),
            (DescriptorKind::StorageBuffer, frames * 2),
            (DescriptorKind::SampledImage, frames),
        ],
    }
}

/// Resources owned by one frame slot.
#[derive(Debug)]
pub(crate) struct FrameResources {
    pub command_buffer: CommandBufferHandle,
    /// Signaled when this slot's last submission has executed.
    pub fence: FenceHandle,
    pub image_available: SemaphoreHandle,
    pub render_finished: SemaphoreHandle,
    pub render_set: DescriptorSetHandle,
    pub display_set: DescriptorSetHandle,
    /// Top-level structure currently written into `render_set`.
    pub bound_tlas: Option<SceneTlas>,
}

impl FrameResources {
    /// Creates one frame slot. The fence starts signaled so the first wait
    /// returns immediately.
    pub(crate) fn new(
        device: &dyn GpuDevice,
        command_pool: CommandPoolHandle,
        descriptor_pool: DescriptorPoolHandle,
        render_layout: DescriptorSetLayoutHandle,
        display_layout: DescriptorSetLayoutHandle,
        created: &mut Vec<GpuObject>,
    ) -> RhiResult<Self> {
        // Freed with the pool
        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let fence = track(created, GpuObject::Fence, device.create_fence(true))?;
        let image_available = track(created, GpuObject::Semaphore, device.create_semaphore())?;
        let render_finished = track(created, GpuObject::Semaphore, device.create_semaphore())?;
        let render_set = device.allocate_descriptor_set(descriptor_pool, render_layout, None)?;
        let display_set = device.allocate_descriptor_set(descriptor_pool, display_layout, None)?;

        Ok(Self {
            command_buffer,
            fence,
            image_available,
            render_finished,
            render_set,
            display_set,
            bound_tlas: None,
        })
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_fence(self.fence);
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
    }

    /// Replaces the fence with a fresh signaled one.
    ///
    /// Needed when the fence was reset but the submission meant to signal
    /// it failed; waiting on it would never return.
    pub(crate) fn renew_fence(&mut self, device: &dyn GpuDevice) -> RhiResult<()> {
        let fence = device.create_fence(true)?;
        device.destroy_fence(self.fence);
        self.fence = fence;
        Ok(())
    }
}

/// Objects shared by all frame slots, plus the slots themselves.
pub(crate) struct FrameContext {
    pub command_pool: CommandPoolHandle,
    pub render_layout: DescriptorSetLayoutHandle,
    pub display_layout: DescriptorSetLayoutHandle,
    pub descriptor_pool: DescriptorPoolHandle,
    pub trace_pipeline: PipelineHandle,
    pub display_pipeline: PipelineHandle,
    pub frames: Vec<FrameResources>,
}

impl FrameContext {
    /// Destroys everything, slots first. The device must be idle.
    pub(crate) fn destroy(self, device: &dyn GpuDevice) {
        for frame in &self.frames {
            frame.destroy(device);
        }
        device.destroy_pipeline(self.display_pipeline);
        device.destroy_pipeline(self.trace_pipeline);
        device.destroy_descriptor_pool(self.descriptor_pool);
        device.destroy_descriptor_set_layout(self.display_layout);
        device.destroy_descriptor_set_layout(self.render_layout);
        device.destroy_command_pool(self.command_pool);
    }
}

/// Creates the command pool of the per-frame command buffers.
pub(crate) fn create_frame_command_pool(
    device: &dyn GpuDevice,
    created: &mut Vec<GpuObject>,
) -> RhiResult<CommandPoolHandle> {
    track(
        created,
        GpuObject::CommandPool,
        device.create_command_pool(CommandPoolKind::Resettable),
    )
}

/// Swapchain-sized render targets, one per frame slot.
#[derive(Debug)]
pub(crate) struct RenderTargets {
    pub swapchain: SwapchainInfo,
    pub images: Vec<ImageHandle>,
    /// Whether the images have left the undefined layout.
    pub initialized: bool,
}

impl RenderTargets {
    /// Creates the targets and binds them into every slot's descriptor sets.
    pub(crate) fn new(
        device: &dyn GpuDevice,
        swapchain: SwapchainInfo,
        frames: &[FrameResources],
    ) -> RhiResult<Self> {
        let mut images = Vec::with_capacity(frames.len());
        for _ in frames {
            match device.create_image(&ImageDesc::render_target(swapchain.extent)) {
                Ok(image) => images.push(image),
                Err(e) => {
                    for image in images {
                        device.destroy_image(image);
                    }
                    return Err(e);
                }
            }
        }
        let targets = Self {
            swapchain,
            images,
            initialized: false,
        };

        if let Err(e) = targets.bind(device, frames) {
            targets.destroy(device);
            return Err(e);
        }
        debug!(
            "Created {} render target(s) at {}",
            targets.images.len(),
            swapchain.extent
        );
        Ok(targets)
    }

    fn bind(&self, device: &dyn GpuDevice, frames: &[FrameResources]) -> RhiResult<()> {
        let count = frames.len();
        for (index, frame) in frames.iter().enumerate() {
            let current = self.images[index];
            let previous = self.images[previous_frame(index, count)];
            device.write_descriptors(
                frame.render_set,
                &[
                    DescriptorWrite::new(
                        RENDER_TARGET_BINDING,
                        DescriptorResource::StorageImage(current),
                    ),
                    DescriptorWrite::new(
                        PREVIOUS_RENDER_TARGET_BINDING,
                        DescriptorResource::StorageImage(previous),
                    ),
                ],
            )?;
            device.write_descriptors(
                frame.display_set,
                &[DescriptorWrite::new(
                    DISPLAY_SOURCE_BINDING,
                    DescriptorResource::SampledImage(current),
                )],
            )?;
        }
        Ok(())
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.swapchain.extent
    }

    pub(crate) fn destroy(self, device: &dyn GpuDevice) {
        for image in self.images {
            device.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_frame_wraps() {
        assert_eq!(previous_frame(0, 3), 2);
        assert_eq!(previous_frame(1, 3), 0);
        assert_eq!(previous_frame(2, 3), 1);
        assert_eq!(previous_frame(0, 1), 0);
    }

    #[test]
    fn test_pool_covers_all_frame_sets() {
        let desc = frame_descriptor_pool_desc(3);
        assert_eq!(desc.max_sets, 6);

        let needed = |kind| {
            render_set_bindings()
                .iter()
                .chain(display_set_bindings().iter())
                .filter(|b| b.kind == kind)
                .map(|b| b.count)
                .sum::<u32>()
                * 3
        };
        for (kind, count) in &desc.sizes {
            assert_eq!(*count, needed(*kind), "{kind:?}");
        }
    }
}
