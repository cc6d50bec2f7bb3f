//! Ray-tracing and display pipeline creation.
//!
//! - The ray-tracing pipeline holds one raygen group, one general group per
//!   miss shader and a triangle hit group. Its shader binding table lives in
//!   a host-visible buffer laid out with the device's handle alignments.
//! - The display pipeline draws a full-screen triangle (no vertex input)
//!   into the swapchain image using dynamic rendering.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use tracing::info;

use crate::error::{RhiError, RhiResult};
use crate::pipeline::PipelineDesc;
use crate::vulkan::buffer::{allocate_buffer, free_buffer};
use crate::vulkan::device::Device;
use crate::vulkan::shader::{Shader, ShaderStage};

/// Rounds `value` up to a multiple of `alignment` (a power of two or zero).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Stages push constants are visible to.
fn push_constant_stages(desc: &PipelineDesc) -> vk::ShaderStageFlags {
    match desc {
        PipelineDesc::RayTracing { .. } => {
            vk::ShaderStageFlags::RAYGEN_KHR
                | vk::ShaderStageFlags::MISS_KHR
                | vk::ShaderStageFlags::CLOSEST_HIT_KHR
        }
        PipelineDesc::Display { .. } => {
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        }
    }
}

/// Offsets and strides of the three shader binding table regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u64,
    pub stride: u64,
    pub raygen_size: u64,
    pub miss_offset: u64,
    pub miss_size: u64,
    pub hit_offset: u64,
    pub hit_size: u64,
}

impl SbtLayout {
    pub fn new(handle_size: u32, handle_alignment: u32, base_alignment: u32, miss_count: u32) -> Self {
        let handle_size = u64::from(handle_size);
        let base_alignment = u64::from(base_alignment);
        let stride = align_up(handle_size, u64::from(handle_alignment));

        // The raygen region's size must equal its stride.
        let raygen_size = align_up(stride, base_alignment);
        let miss_size = align_up(stride * u64::from(miss_count.max(1)), base_alignment);
        let hit_size = align_up(stride, base_alignment);

        Self {
            handle_size,
            stride: stride.max(1),
            raygen_size,
            miss_offset: raygen_size,
            miss_size,
            hit_offset: raygen_size + miss_size,
            hit_size,
        }
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.hit_offset + self.hit_size
    }
}

/// Shader binding table buffer and the regions `vkCmdTraceRaysKHR` needs.
pub struct ShaderBindingTable {
    buffer: vk::Buffer,
    allocation: Allocation,
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    fn new(device: &Device, pipeline: vk::Pipeline, miss_count: u32) -> RhiResult<Self> {
        let properties = device.physical().ray_tracing;
        let layout = SbtLayout::new(
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
            properties.shader_group_base_alignment,
            miss_count,
        );

        let group_count = 2 + miss_count;
        let handle_size = layout.handle_size as usize;
        let handles = unsafe {
            device
                .ray_tracing_pipeline()
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    handle_size * group_count as usize,
                )?
        };

        let (buffer, mut allocation) = allocate_buffer(
            device,
            layout.total_size(),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "shader_binding_table",
        )?;

        let Some(mapped) = allocation.mapped_slice_mut() else {
            free_buffer(device, buffer, allocation);
            return Err(RhiError::PipelineError(
                "shader binding table is not host-visible".to_string(),
            ));
        };

        mapped[..layout.total_size() as usize].fill(0);
        // Group order: raygen, misses, hit.
        mapped[..handle_size].copy_from_slice(&handles[..handle_size]);
        for i in 0..miss_count as usize {
            let dst = layout.miss_offset as usize + i * layout.stride as usize;
            let src = (1 + i) * handle_size;
            mapped[dst..dst + handle_size].copy_from_slice(&handles[src..src + handle_size]);
        }
        let hit_src = (1 + miss_count as usize) * handle_size;
        let hit_dst = layout.hit_offset as usize;
        mapped[hit_dst..hit_dst + handle_size]
            .copy_from_slice(&handles[hit_src..hit_src + handle_size]);

        let base = device.buffer_address(buffer);
        let region = |offset: u64, size: u64| vk::StridedDeviceAddressRegionKHR {
            device_address: base + offset,
            stride: layout.stride,
            size,
        };

        Ok(Self {
            buffer,
            raygen: vk::StridedDeviceAddressRegionKHR {
                device_address: base,
                stride: layout.raygen_size,
                size: layout.raygen_size,
            },
            miss: region(layout.miss_offset, layout.miss_size),
            hit: region(layout.hit_offset, layout.hit_size),
            allocation,
        })
    }

    fn destroy(self, device: &Device) {
        free_buffer(device, self.buffer, self.allocation);
    }
}

/// A live pipeline with its layout.
pub struct PipelineEntry {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    pub push_constant_stages: vk::ShaderStageFlags,
    pub sbt: Option<ShaderBindingTable>,
}

impl PipelineEntry {
    /// Creates the pipeline described by `desc`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `desc` - Shader paths and push-constant size
    /// * `set_layouts` - The resolved layouts of `desc`, in set order
    /// * `color_format` - Swapchain format the display pass renders into
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if a SPIR-V file cannot be read, or
    /// the Vulkan error from layout, pipeline or binding table creation.
    pub fn new(
        device: &Device,
        desc: &PipelineDesc,
        set_layouts: &[vk::DescriptorSetLayout],
        color_format: vk::Format,
    ) -> RhiResult<Self> {
        let push_constant_stages = push_constant_stages(desc);
        let push_constant_size = match desc {
            PipelineDesc::RayTracing {
                push_constant_size, ..
            }
            | PipelineDesc::Display {
                push_constant_size, ..
            } => *push_constant_size,
        };

        let ranges = [vk::PushConstantRange::default()
            .stage_flags(push_constant_stages)
            .offset(0)
            .size(push_constant_size)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(if push_constant_size > 0 {
                &ranges[..]
            } else {
                &[]
            });
        let layout = unsafe { device.handle().create_pipeline_layout(&layout_info, None)? };

        let created = match desc {
            PipelineDesc::RayTracing { .. } => create_ray_tracing(device, desc, layout),
            PipelineDesc::Display { .. } => create_display(device, desc, layout, color_format)
                .map(|pipeline| (pipeline, None)),
        };

        match created {
            Ok((pipeline, sbt)) => {
                info!("{} pipeline created", desc.name());
                Ok(Self {
                    pipeline,
                    layout,
                    bind_point: if sbt.is_some() {
                        vk::PipelineBindPoint::RAY_TRACING_KHR
                    } else {
                        vk::PipelineBindPoint::GRAPHICS
                    },
                    push_constant_stages,
                    sbt,
                })
            }
            Err(e) => {
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    pub fn destroy(self, device: &Device) {
        if let Some(sbt) = self.sbt {
            sbt.destroy(device);
        }
        unsafe {
            device.handle().destroy_pipeline(self.pipeline, None);
            device.handle().destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_ray_tracing(
    device: &Device,
    desc: &PipelineDesc,
    layout: vk::PipelineLayout,
) -> RhiResult<(vk::Pipeline, Option<ShaderBindingTable>)> {
    let PipelineDesc::RayTracing {
        raygen,
        miss,
        closest_hit,
        max_recursion_depth,
        ..
    } = desc
    else {
        return Err(RhiError::PipelineError("not a ray-tracing pipeline".to_string()));
    };

    let max_depth = device.physical().ray_tracing.max_ray_recursion_depth;
    if *max_recursion_depth > max_depth {
        return Err(RhiError::Unsupported(format!(
            "ray recursion depth {} exceeds device limit {}",
            max_recursion_depth, max_depth
        )));
    }

    let mut shaders = vec![Shader::from_spirv_file(device, raygen, ShaderStage::Raygen)?];
    for path in miss {
        shaders.push(Shader::from_spirv_file(device, path, ShaderStage::Miss)?);
    }
    shaders.push(Shader::from_spirv_file(
        device,
        closest_hit,
        ShaderStage::ClosestHit,
    )?);

    let stages: Vec<vk::PipelineShaderStageCreateInfo> =
        shaders.iter().map(Shader::stage_create_info).collect();

    let general = |index: u32| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(index)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };
    let hit_index = shaders.len() as u32 - 1;
    let mut groups: Vec<vk::RayTracingShaderGroupCreateInfoKHR> =
        (0..hit_index).map(general).collect();
    groups.push(
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .closest_hit_shader(hit_index)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR),
    );

    let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
        .stages(&stages)
        .groups(&groups)
        .max_pipeline_ray_recursion_depth(*max_recursion_depth)
        .layout(layout);

    let pipeline = unsafe {
        device
            .ray_tracing_pipeline()
            .create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
            .map_err(|(_, result)| result)?
    };
    let pipeline = pipeline
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("no ray-tracing pipeline returned".to_string()))?;

    match ShaderBindingTable::new(device, pipeline, miss.len() as u32) {
        Ok(sbt) => Ok((pipeline, Some(sbt))),
        Err(e) => {
            unsafe { device.handle().destroy_pipeline(pipeline, None) };
            Err(e)
        }
    }
}

fn create_display(
    device: &Device,
    desc: &PipelineDesc,
    layout: vk::PipelineLayout,
    color_format: vk::Format,
) -> RhiResult<vk::Pipeline> {
    let PipelineDesc::Display {
        vertex, fragment, ..
    } = desc
    else {
        return Err(RhiError::PipelineError("not a display pipeline".to_string()));
    };

    let vertex_shader = Shader::from_spirv_file(device, vertex, ShaderStage::Vertex)?;
    let fragment_shader = Shader::from_spirv_file(device, fragment, ShaderStage::Fragment)?;
    let stages = [
        vertex_shader.stage_create_info(),
        fragment_shader.stage_create_info(),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats = [color_format];
    let mut rendering_info =
        vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .handle()
            .create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
            .map_err(|(_, result)| result)?
    };

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("no display pipeline returned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(17, 0), 17);
    }

    #[test]
    fn test_sbt_layout_respects_alignments() {
        // Typical desktop values: 32-byte handles, 64-byte base alignment.
        let layout = SbtLayout::new(32, 32, 64, 2);
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.raygen_size, 64);
        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.miss_size, 64);
        assert_eq!(layout.hit_offset, 128);
        assert_eq!(layout.hit_size, 64);
        assert_eq!(layout.total_size(), 192);
        assert_eq!(layout.miss_offset % 64, 0);
        assert_eq!(layout.hit_offset % 64, 0);
    }

    #[test]
    fn test_sbt_layout_grows_with_miss_count() {
        let one = SbtLayout::new(32, 32, 64, 1);
        let three = SbtLayout::new(32, 32, 64, 3);
        assert_eq!(three.miss_size, 128);
        assert!(three.total_size() > one.total_size());
    }

    #[test]
    fn test_push_constant_stages() {
        let rt = PipelineDesc::ray_tracing(std::path::Path::new("shaders"), vec![], 16);
        assert!(push_constant_stages(&rt).contains(vk::ShaderStageFlags::RAYGEN_KHR));
        let display = PipelineDesc::display(std::path::Path::new("shaders"), vec![], 8);
        assert!(push_constant_stages(&display).contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
