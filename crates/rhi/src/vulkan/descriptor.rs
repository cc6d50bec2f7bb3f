//! Descriptor set layouts, pools and writes.
//!
//! Sampled images are exposed as combined image samplers using the device's
//! default linear sampler. Bindless bindings are created partially bound
//! with a variable descriptor count, so a set only reserves the slots it
//! asks for at allocation time.

use ash::vk;
use tracing::debug;

use crate::descriptor::{DescriptorBinding, DescriptorKind, DescriptorPoolDesc, ShaderStages};
use crate::error::{RhiError, RhiResult};
use crate::vulkan::device::Device;

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

impl ShaderStages {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        let mapping = [
            (ShaderStages::RAYGEN, vk::ShaderStageFlags::RAYGEN_KHR),
            (ShaderStages::MISS, vk::ShaderStageFlags::MISS_KHR),
            (ShaderStages::CLOSEST_HIT, vk::ShaderStageFlags::CLOSEST_HIT_KHR),
            (ShaderStages::VERTEX, vk::ShaderStageFlags::VERTEX),
            (ShaderStages::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        ];
        for (stage, vk_stage) in mapping {
            if self.contains(stage) {
                flags |= vk_stage;
            }
        }
        flags
    }
}

/// Creates a descriptor set layout.
///
/// Only the last binding may be bindless, since Vulkan allows a variable
/// descriptor count on the highest binding only.
pub fn create_set_layout(
    device: &Device,
    bindings: &[DescriptorBinding],
) -> RhiResult<vk::DescriptorSetLayout> {
    if let Some(position) = bindings.iter().position(|b| b.bindless)
        && position + 1 != bindings.len()
    {
        return Err(RhiError::Unsupported(format!(
            "bindless binding {} must be the last binding",
            bindings[position].binding
        )));
    }

    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(b.kind.to_vk())
                .descriptor_count(b.count)
                .stage_flags(b.stages.to_vk())
        })
        .collect();

    let binding_flags: Vec<vk::DescriptorBindingFlags> = bindings
        .iter()
        .map(|b| {
            if b.bindless {
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
            } else {
                vk::DescriptorBindingFlags::empty()
            }
        })
        .collect();

    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
    let create_info = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(&vk_bindings)
        .push_next(&mut flags_info);

    let layout = unsafe {
        device
            .handle()
            .create_descriptor_set_layout(&create_info, None)?
    };

    debug!(
        "Created descriptor set layout with {} binding(s)",
        bindings.len()
    );
    Ok(layout)
}

pub fn create_pool(device: &Device, desc: &DescriptorPoolDesc) -> RhiResult<vk::DescriptorPool> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = desc
        .sizes
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|&(kind, count)| {
            vk::DescriptorPoolSize::default()
                .ty(kind.to_vk())
                .descriptor_count(count)
        })
        .collect();

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(desc.max_sets)
        .pool_sizes(&pool_sizes);

    let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

    debug!(
        "Created descriptor pool: max {} sets, {} pool sizes",
        desc.max_sets,
        pool_sizes.len()
    );
    Ok(pool)
}

/// Allocates one set, sizing a trailing bindless binding to `variable_count`.
pub fn allocate_set(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    variable_count: Option<u32>,
) -> RhiResult<vk::DescriptorSet> {
    let layouts = [layout];
    let counts = [variable_count.unwrap_or(0)];
    let mut variable_info =
        vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);

    let mut allocate_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    if variable_count.is_some() {
        allocate_info = allocate_info.push_next(&mut variable_info);
    }

    let sets = unsafe { device.handle().allocate_descriptor_sets(&allocate_info) }.map_err(
        |e| match e {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                RhiError::OutOfDescriptors(format!("descriptor pool exhausted: {e}"))
            }
            other => RhiError::VulkanError(other),
        },
    )?;

    sets.into_iter()
        .next()
        .ok_or_else(|| RhiError::OutOfDescriptors("no descriptor set allocated".to_string()))
}

/// A descriptor write with its resource resolved to Vulkan objects.
#[derive(Clone, Copy, Debug)]
pub enum ResolvedResource {
    AccelerationStructure(vk::AccelerationStructureKHR),
    StorageImage(vk::ImageView),
    SampledImage(vk::ImageView),
    StorageBuffer(vk::Buffer),
}

#[derive(Clone, Copy, Debug)]
pub struct ResolvedWrite {
    pub binding: u32,
    pub array_element: u32,
    pub resource: ResolvedResource,
}

/// Writes resolved resources into `set`.
///
/// Storage and sampled images are expected in `GENERAL` and
/// `SHADER_READ_ONLY_OPTIMAL` layout respectively, except render targets,
/// which stay in `GENERAL` and are flagged through `general_views`.
pub fn update_set(
    device: &Device,
    set: vk::DescriptorSet,
    sampler: vk::Sampler,
    writes: &[ResolvedWrite],
    general_views: &[vk::ImageView],
) {
    if writes.is_empty() {
        return;
    }

    // Stable storage for the pointed-to infos.
    let mut image_infos = Vec::with_capacity(writes.len());
    let mut buffer_infos = Vec::with_capacity(writes.len());
    let mut structures = Vec::with_capacity(writes.len());
    for write in writes {
        match write.resource {
            ResolvedResource::AccelerationStructure(handle) => structures.push([handle]),
            ResolvedResource::StorageImage(view) => image_infos.push([image_info(
                vk::Sampler::null(),
                view,
                vk::ImageLayout::GENERAL,
            )]),
            ResolvedResource::SampledImage(view) => {
                let layout = if general_views.contains(&view) {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                image_infos.push([image_info(sampler, view, layout)]);
            }
            ResolvedResource::StorageBuffer(buffer) => {
                buffer_infos.push([buffer_info(buffer, 0, vk::WHOLE_SIZE)])
            }
        }
    }

    let mut structure_writes: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> = structures
        .iter()
        .map(|handles| {
            vk::WriteDescriptorSetAccelerationStructureKHR::default()
                .acceleration_structures(handles)
        })
        .collect();

    let mut images = image_infos.iter();
    let mut buffers = buffer_infos.iter();
    let mut structure_writes_iter = structure_writes.iter_mut();
    let mut vk_writes = Vec::with_capacity(writes.len());

    for write in writes {
        let base = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(write.binding)
            .dst_array_element(write.array_element);

        let vk_write = match write.resource {
            ResolvedResource::AccelerationStructure(_) => {
                let Some(structure_write) = structure_writes_iter.next() else {
                    break;
                };
                let mut vk_write = base
                    .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                    .push_next(structure_write);
                vk_write.descriptor_count = 1;
                vk_write
            }
            ResolvedResource::StorageImage(_) | ResolvedResource::SampledImage(_) => {
                let Some(info) = images.next() else { break };
                let ty = if matches!(write.resource, ResolvedResource::StorageImage(_)) {
                    vk::DescriptorType::STORAGE_IMAGE
                } else {
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                };
                base.descriptor_type(ty).image_info(info)
            }
            ResolvedResource::StorageBuffer(_) => {
                let Some(info) = buffers.next() else { break };
                base.descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            }
        };
        vk_writes.push(vk_write);
    }

    unsafe {
        device.handle().update_descriptor_sets(&vk_writes, &[]);
    }

    debug!("Updated {} descriptor(s)", vk_writes.len());
}

/// Creates a buffer info for descriptor set updates.
#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

/// Creates an image info for descriptor set updates.
#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

/// The linear, repeating sampler used for every sampled image.
pub fn create_default_sampler(device: &Device) -> RhiResult<vk::Sampler> {
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .max_lod(vk::LOD_CLAMP_NONE);

    Ok(unsafe { device.handle().create_sampler(&create_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_kind_mapping() {
        assert_eq!(
            DescriptorKind::AccelerationStructure.to_vk(),
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
        assert_eq!(
            DescriptorKind::SampledImage.to_vk(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(
            DescriptorKind::StorageBuffer.to_vk(),
            vk::DescriptorType::STORAGE_BUFFER
        );
    }

    #[test]
    fn test_shader_stage_mapping() {
        let flags = ShaderStages::RAY_TRACING.to_vk();
        assert!(flags.contains(vk::ShaderStageFlags::RAYGEN_KHR));
        assert!(flags.contains(vk::ShaderStageFlags::MISS_KHR));
        assert!(flags.contains(vk::ShaderStageFlags::CLOSEST_HIT_KHR));
        assert!(!flags.contains(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(ShaderStages::FRAGMENT.to_vk(), vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_buffer_info_helper() {
        let info = buffer_info(vk::Buffer::null(), 64, 128);
        assert_eq!(info.buffer, vk::Buffer::null());
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, 128);
    }

    #[test]
    fn test_image_info_helper() {
        let info = image_info(
            vk::Sampler::null(),
            vk::ImageView::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(info.sampler, vk::Sampler::null());
        assert_eq!(info.image_view, vk::ImageView::null());
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
