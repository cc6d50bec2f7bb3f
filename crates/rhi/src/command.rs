//! Command recording.
//!
//! Commands are plain values ([`GpuCommand`]) handed to the device one at a
//! time; [`CommandEncoder`] gives them a method-per-command surface so
//! recording code reads like ordinary Vulkan command recording.
//!
//! # Example
//!
//! ```no_run
//! use tracer_rhi::command::{Access, CommandEncoder};
//! use tracer_rhi::{BufferHandle, CommandBufferHandle, GpuDevice};
//!
//! # fn example(device: &dyn GpuDevice, cmd: CommandBufferHandle, staging: BufferHandle, dst: BufferHandle) -> tracer_rhi::RhiResult<()> {
//! let encoder = CommandEncoder::new(device, cmd);
//! encoder.copy_buffer(staging, dst, 256)?;
//! encoder.memory_barrier(Access::TransferWrite, Access::ShaderRead)?;
//! # Ok(())
//! # }
//! ```

use crate::acceleration::AccelerationStructureDesc;
use crate::device::GpuDevice;
use crate::error::RhiResult;
use crate::image::ImageState;
use crate::resource::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, DescriptorSetHandle,
    ImageHandle, PipelineHandle,
};
use crate::swapchain::Extent2D;

/// Lifetime class of the buffers allocated from a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandPoolKind {
    /// Short-lived one-time-submit buffers.
    Transient,
    /// Long-lived buffers reset and re-recorded every frame.
    Resettable,
}

/// Memory access scopes used by global barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Writes performed by copy commands.
    TransferWrite,
    /// Reads and writes performed by acceleration structure builds.
    AccelerationStructureBuild,
    /// Reads performed by ray-tracing shaders.
    ShaderRead,
}

/// A single recorded GPU command.
#[derive(Clone, Debug, PartialEq)]
pub enum GpuCommand {
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
    /// Copies tightly packed texels into the whole image (which must be in `TransferDst`).
    CopyBufferToImage {
        src: BufferHandle,
        dst: ImageHandle,
    },
    MemoryBarrier {
        src: Access,
        dst: Access,
    },
    ImageBarrier {
        image: ImageHandle,
        from: ImageState,
        to: ImageState,
    },
    /// Clears the image to transparent black; the image must be in `ShaderReadWrite`.
    ClearImage {
        image: ImageHandle,
    },
    BuildAccelerationStructure {
        target: AccelerationStructureHandle,
        desc: AccelerationStructureDesc,
        scratch: BufferHandle,
    },
    TraceRays {
        pipeline: PipelineHandle,
        descriptor_sets: Vec<DescriptorSetHandle>,
        push_constants: Vec<u8>,
        extent: Extent2D,
    },
    /// Full-screen pass into an acquired swapchain image, leaving it ready to present.
    Display {
        pipeline: PipelineHandle,
        descriptor_set: DescriptorSetHandle,
        image_index: u32,
        push_constants: Vec<u8>,
    },
}

impl GpuCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            GpuCommand::CopyBuffer { .. } => "copy_buffer",
            GpuCommand::CopyBufferToImage { .. } => "copy_buffer_to_image",
            GpuCommand::MemoryBarrier { .. } => "memory_barrier",
            GpuCommand::ImageBarrier { .. } => "image_barrier",
            GpuCommand::ClearImage { .. } => "clear_image",
            GpuCommand::BuildAccelerationStructure { .. } => "build_acceleration_structure",
            GpuCommand::TraceRays { .. } => "trace_rays",
            GpuCommand::Display { .. } => "display",
        }
    }
}

/// Records commands into one command buffer.
#[derive(Clone, Copy)]
pub struct CommandEncoder<'a> {
    device: &'a dyn GpuDevice,
    buffer: CommandBufferHandle,
}

impl<'a> CommandEncoder<'a> {
    /// Wraps `buffer`, which must be in the recording state.
    pub fn new(device: &'a dyn GpuDevice, buffer: CommandBufferHandle) -> Self {
        Self { device, buffer }
    }

    /// The command buffer being recorded.
    #[inline]
    pub fn buffer(&self) -> CommandBufferHandle {
        self.buffer
    }

    pub fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> RhiResult<()> {
        self.encode(GpuCommand::CopyBuffer { src, dst, size })
    }

    pub fn copy_buffer_to_image(&self, src: BufferHandle, dst: ImageHandle) -> RhiResult<()> {
        self.encode(GpuCommand::CopyBufferToImage { src, dst })
    }

    pub fn memory_barrier(&self, src: Access, dst: Access) -> RhiResult<()> {
        self.encode(GpuCommand::MemoryBarrier { src, dst })
    }

    pub fn image_barrier(
        &self,
        image: ImageHandle,
        from: ImageState,
        to: ImageState,
    ) -> RhiResult<()> {
        self.encode(GpuCommand::ImageBarrier { image, from, to })
    }

    pub fn clear_image(&self, image: ImageHandle) -> RhiResult<()> {
        self.encode(GpuCommand::ClearImage { image })
    }

    pub fn build_acceleration_structure(
        &self,
        target: AccelerationStructureHandle,
        desc: AccelerationStructureDesc,
        scratch: BufferHandle,
    ) -> RhiResult<()> {
        self.encode(GpuCommand::BuildAccelerationStructure {
            target,
            desc,
            scratch,
        })
    }

    pub fn trace_rays(
        &self,
        pipeline: PipelineHandle,
        descriptor_sets: &[DescriptorSetHandle],
        push_constants: &[u8],
        extent: Extent2D,
    ) -> RhiResult<()> {
        self.encode(GpuCommand::TraceRays {
            pipeline,
            descriptor_sets: descriptor_sets.to_vec(),
            push_constants: push_constants.to_vec(),
            extent,
        })
    }

    pub fn display(
        &self,
        pipeline: PipelineHandle,
        descriptor_set: DescriptorSetHandle,
        image_index: u32,
        push_constants: &[u8],
    ) -> RhiResult<()> {
        self.encode(GpuCommand::Display {
            pipeline,
            descriptor_set,
            image_index,
            push_constants: push_constants.to_vec(),
        })
    }

    fn encode(&self, command: GpuCommand) -> RhiResult<()> {
        self.device.encode(self.buffer, command)
    }
}
