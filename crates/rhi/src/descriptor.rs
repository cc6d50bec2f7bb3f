//! Descriptor layouts, pools and writes.

use std::ops::BitOr;

use crate::resource::{AccelerationStructureHandle, BufferHandle, ImageHandle};

/// Kind of resource a binding holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    AccelerationStructure,
    StorageImage,
    /// Image sampled through the device's default linear sampler.
    SampledImage,
    StorageBuffer,
}

/// Shader stages a binding is visible to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ShaderStages(u8);

impl ShaderStages {
    pub const RAYGEN: Self = Self(1 << 0);
    pub const MISS: Self = Self(1 << 1);
    pub const CLOSEST_HIT: Self = Self(1 << 2);
    pub const VERTEX: Self = Self(1 << 3);
    pub const FRAGMENT: Self = Self(1 << 4);
    pub const RAY_TRACING: Self = Self(Self::RAYGEN.0 | Self::MISS.0 | Self::CLOSEST_HIT.0);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ShaderStages {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One binding in a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Array size; for bindless bindings the upper bound.
    pub count: u32,
    pub stages: ShaderStages,
    /// Variable-count, partially-bound array (must be the last binding).
    pub bindless: bool,
}

impl DescriptorBinding {
    pub fn single(binding: u32, kind: DescriptorKind, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind,
            count: 1,
            stages,
            bindless: false,
        }
    }

    pub fn bindless(binding: u32, kind: DescriptorKind, capacity: u32, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind,
            count: capacity,
            stages,
            bindless: true,
        }
    }
}

/// Parameters for [`GpuDevice::create_descriptor_pool`](crate::GpuDevice::create_descriptor_pool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    pub max_sets: u32,
    /// Total descriptors of each kind across all sets.
    pub sizes: Vec<(DescriptorKind, u32)>,
}

/// Resource bound by a [`DescriptorWrite`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    AccelerationStructure(AccelerationStructureHandle),
    StorageImage(ImageHandle),
    SampledImage(ImageHandle),
    StorageBuffer(BufferHandle),
}

impl DescriptorResource {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            DescriptorResource::AccelerationStructure(_) => DescriptorKind::AccelerationStructure,
            DescriptorResource::StorageImage(_) => DescriptorKind::StorageImage,
            DescriptorResource::SampledImage(_) => DescriptorKind::SampledImage,
            DescriptorResource::StorageBuffer(_) => DescriptorKind::StorageBuffer,
        }
    }
}

/// Update of one array element of one binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource,
}

impl DescriptorWrite {
    pub fn new(binding: u32, resource: DescriptorResource) -> Self {
        Self {
            binding,
            array_element: 0,
            resource,
        }
    }

    pub fn at(binding: u32, array_element: u32, resource: DescriptorResource) -> Self {
        Self {
            binding,
            array_element,
            resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_union() {
        let stages = ShaderStages::RAYGEN | ShaderStages::CLOSEST_HIT;
        assert!(stages.contains(ShaderStages::RAYGEN));
        assert!(!stages.contains(ShaderStages::MISS));
        assert!(ShaderStages::RAY_TRACING.contains(stages));
    }

    #[test]
    fn test_bindless_binding() {
        let binding =
            DescriptorBinding::bindless(0, DescriptorKind::StorageBuffer, 128, ShaderStages::CLOSEST_HIT);
        assert!(binding.bindless);
        assert_eq!(binding.count, 128);
    }
}
