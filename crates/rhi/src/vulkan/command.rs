//! Command pools, command buffers and command recording.
//!
//! [`GpuCommand`](crate::command::GpuCommand)s are resolved to Vulkan
//! objects by [`VulkanDevice`](super::VulkanDevice) and recorded here.

use ash::vk;
use tracing::info;

use crate::command::{Access, CommandPoolKind};
use crate::error::{RhiError, RhiResult};
use crate::image::ImageState;
use crate::swapchain::Extent2D;
use crate::vulkan::device::Device;
use crate::vulkan::image::color_subresource_range;
use crate::vulkan::pipeline::PipelineEntry;

impl CommandPoolKind {
    pub fn to_vk_flags(self) -> vk::CommandPoolCreateFlags {
        match self {
            CommandPoolKind::Transient => {
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT
            }
            CommandPoolKind::Resettable => vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        }
    }
}

impl Access {
    /// Pipeline stages and access mask of the access.
    pub fn to_vk(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            Access::TransferWrite => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            Access::AccelerationStructureBuild => (
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
                    | vk::AccessFlags2::SHADER_READ,
            ),
            Access::ShaderRead => (
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                    | vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_READ
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            ),
        }
    }
}

pub fn create_pool(device: &Device, kind: CommandPoolKind) -> RhiResult<vk::CommandPool> {
    let create_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(device.queue_family())
        .flags(kind.to_vk_flags());

    let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

    info!(
        "{:?} command pool created for queue family {}",
        kind,
        device.queue_family()
    );
    Ok(pool)
}

pub fn allocate(device: &Device, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.handle().allocate_command_buffers(&allocate_info)? };
    buffers
        .into_iter()
        .next()
        .ok_or(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
}

/// Begins one-time-submit recording; implicitly resets the buffer.
pub fn begin(device: &Device, buffer: vk::CommandBuffer) -> RhiResult<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe {
        device.handle().begin_command_buffer(buffer, &begin_info)?;
    }
    Ok(())
}

pub fn end(device: &Device, buffer: vk::CommandBuffer) -> RhiResult<()> {
    unsafe {
        device.handle().end_command_buffer(buffer)?;
    }
    Ok(())
}

// =========================================================================
// Transfers and barriers
// =========================================================================

pub fn copy_buffer(
    device: &Device,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: u64,
) {
    let region = vk::BufferCopy::default().size(size);
    unsafe {
        device
            .handle()
            .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
    }
}

/// Copies a tightly packed buffer into the whole image (in `TRANSFER_DST` layout).
pub fn copy_buffer_to_image(
    device: &Device,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Image,
    extent: Extent2D,
) {
    let region = vk::BufferImageCopy::default()
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });
    unsafe {
        device.handle().cmd_copy_buffer_to_image(
            cmd,
            src,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
    }
}

pub fn memory_barrier(device: &Device, cmd: vk::CommandBuffer, src: Access, dst: Access) {
    let (src_stage, src_access) = src.to_vk();
    let (dst_stage, dst_access) = dst.to_vk();
    let barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access);
    let dependency =
        vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
    unsafe { device.handle().cmd_pipeline_barrier2(cmd, &dependency) };
}

pub fn image_barrier(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: ImageState,
    to: ImageState,
) {
    transition(device, cmd, image, from.to_vk(), to.to_vk());
}

type LayoutState = (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2);

fn transition(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: LayoutState,
    to: LayoutState,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(from.1)
        .src_access_mask(from.2)
        .dst_stage_mask(to.1)
        .dst_access_mask(to.2)
        .old_layout(from.0)
        .new_layout(to.0)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range());
    let dependency =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    unsafe { device.handle().cmd_pipeline_barrier2(cmd, &dependency) };
}

/// Clears an image in `GENERAL` layout to transparent black.
///
/// The clear is ordered after earlier shader access and before later shader
/// access, so callers do not need their own barriers around it.
pub fn clear_image(device: &Device, cmd: vk::CommandBuffer, image: vk::Image) {
    let shader = ImageState::ShaderReadWrite.to_vk();
    let cleared = (
        vk::ImageLayout::GENERAL,
        vk::PipelineStageFlags2::CLEAR,
        vk::AccessFlags2::TRANSFER_WRITE,
    );
    transition(device, cmd, image, shader, cleared);

    let clear = vk::ClearColorValue {
        float32: [0.0, 0.0, 0.0, 0.0],
    };
    unsafe {
        device.handle().cmd_clear_color_image(
            cmd,
            image,
            vk::ImageLayout::GENERAL,
            &clear,
            std::slice::from_ref(&color_subresource_range()),
        );
    }

    transition(device, cmd, image, cleared, shader);
}

// =========================================================================
// Passes
// =========================================================================

fn bind(
    device: &Device,
    cmd: vk::CommandBuffer,
    pipeline: &PipelineEntry,
    sets: &[vk::DescriptorSet],
    push_constants: &[u8],
) {
    unsafe {
        device
            .handle()
            .cmd_bind_pipeline(cmd, pipeline.bind_point, pipeline.pipeline);
        if !sets.is_empty() {
            device.handle().cmd_bind_descriptor_sets(
                cmd,
                pipeline.bind_point,
                pipeline.layout,
                0,
                sets,
                &[],
            );
        }
        if !push_constants.is_empty() {
            device.handle().cmd_push_constants(
                cmd,
                pipeline.layout,
                pipeline.push_constant_stages,
                0,
                push_constants,
            );
        }
    }
}

/// Dispatches one ray per pixel of `extent`.
pub fn trace_rays(
    device: &Device,
    cmd: vk::CommandBuffer,
    pipeline: &PipelineEntry,
    sets: &[vk::DescriptorSet],
    push_constants: &[u8],
    extent: Extent2D,
) {
    let Some(sbt) = pipeline.sbt.as_ref() else {
        tracing::error!("trace_rays recorded with a non ray-tracing pipeline");
        return;
    };

    bind(device, cmd, pipeline, sets, push_constants);

    let callable_region = vk::StridedDeviceAddressRegionKHR::default();
    unsafe {
        device.ray_tracing_pipeline().cmd_trace_rays(
            cmd,
            &sbt.raygen,
            &sbt.miss,
            &sbt.hit,
            &callable_region,
            extent.width,
            extent.height,
            1,
        );
    }
}

/// Draws the full-screen display triangle into a swapchain image and leaves
/// the image ready for presentation.
#[allow(clippy::too_many_arguments)]
pub fn display(
    device: &Device,
    cmd: vk::CommandBuffer,
    pipeline: &PipelineEntry,
    set: vk::DescriptorSet,
    push_constants: &[u8],
    image: vk::Image,
    view: vk::ImageView,
    extent: Extent2D,
) {
    let attachment_state = (
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    );
    transition(
        device,
        cmd,
        image,
        (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
        ),
        attachment_state,
    );

    let color_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE);
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: extent.width,
            height: extent.height,
        },
    };
    let rendering_info = vk::RenderingInfo::default()
        .render_area(render_area)
        .layer_count(1)
        .color_attachments(std::slice::from_ref(&color_attachment));

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    unsafe {
        device.handle().cmd_begin_rendering(cmd, &rendering_info);
    }
    bind(device, cmd, pipeline, std::slice::from_ref(&set), push_constants);
    unsafe {
        device
            .handle()
            .cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
        device
            .handle()
            .cmd_set_scissor(cmd, 0, std::slice::from_ref(&render_area));
        device.handle().cmd_draw(cmd, 3, 1, 0, 0);
        device.handle().cmd_end_rendering(cmd);
    }

    transition(
        device,
        cmd,
        image,
        attachment_state,
        (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_kind_flags() {
        assert!(
            CommandPoolKind::Transient
                .to_vk_flags()
                .contains(vk::CommandPoolCreateFlags::TRANSIENT)
        );
        assert!(
            !CommandPoolKind::Resettable
                .to_vk_flags()
                .contains(vk::CommandPoolCreateFlags::TRANSIENT)
        );
    }

    #[test]
    fn test_access_mapping() {
        let (stage, access) = Access::TransferWrite.to_vk();
        assert_eq!(stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(access, vk::AccessFlags2::TRANSFER_WRITE);

        let (stage, _) = Access::AccelerationStructureBuild.to_vk();
        assert!(stage.contains(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR));
    }
}
