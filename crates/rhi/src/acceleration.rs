//! Acceleration structure descriptions and the instance record layout.
//!
//! Bottom-level structures index one mesh's triangles; the single top-level
//! structure indexes [`AccelerationStructureInstance`] records that place
//! bottom-level structures in the world.

use bytemuck::{Pod, Zeroable};

use crate::resource::{AccelerationStructureHandle, BufferHandle};

/// Geometry an acceleration structure is built over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelerationStructureDesc {
    /// Triangle mesh. Vertex positions are the first three floats of each vertex.
    BottomLevel {
        vertices: BufferHandle,
        vertex_count: u32,
        vertex_stride: u64,
        indices: BufferHandle,
        triangle_count: u32,
    },
    /// Instances of bottom-level structures stored as [`AccelerationStructureInstance`].
    TopLevel {
        instances: BufferHandle,
        instance_count: u32,
    },
}

impl AccelerationStructureDesc {
    pub fn is_top_level(&self) -> bool {
        matches!(self, AccelerationStructureDesc::TopLevel { .. })
    }

    /// Number of primitives (triangles or instances) the build covers.
    pub fn primitive_count(&self) -> u32 {
        match *self {
            AccelerationStructureDesc::BottomLevel { triangle_count, .. } => triangle_count,
            AccelerationStructureDesc::TopLevel { instance_count, .. } => instance_count,
        }
    }
}

/// A created (not yet built) acceleration structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccelerationStructureInfo {
    pub handle: AccelerationStructureHandle,
    /// Device reference used by top-level instance records.
    pub reference: u64,
    /// Scratch memory the build command needs.
    pub scratch_size: u64,
}

/// Instance flag: disable back-face culling for this instance.
pub const INSTANCE_TRIANGLE_CULL_DISABLE: u8 = 0x1;
/// Instance flag: treat all geometry as opaque.
pub const INSTANCE_FORCE_OPAQUE: u8 = 0x4;

/// One top-level instance record, laid out like `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AccelerationStructureInstance {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [[f32; 4]; 3],
    /// Custom index (low 24 bits) and visibility mask (high 8 bits).
    pub custom_index_and_mask: u32,
    /// Hit group offset (low 24 bits) and instance flags (high 8 bits).
    pub sbt_offset_and_flags: u32,
    /// Bottom-level structure reference.
    pub acceleration_structure_reference: u64,
}

impl AccelerationStructureInstance {
    /// Builds an instance visible to every ray, with culling disabled.
    pub fn new(transform: [[f32; 4]; 3], custom_index: u32, blas_reference: u64) -> Self {
        Self {
            transform,
            custom_index_and_mask: (custom_index & 0x00ff_ffff) | (0xff << 24),
            sbt_offset_and_flags: u32::from(INSTANCE_TRIANGLE_CULL_DISABLE | INSTANCE_FORCE_OPAQUE)
                << 24,
            acceleration_structure_reference: blas_reference,
        }
    }

    /// The 24-bit custom index.
    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00ff_ffff
    }

    /// The 8-bit visibility mask.
    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }
}
