//! Acceleration structure storage and build recording.
//!
//! Creating a structure queries its build sizes, allocates a device-local
//! backing buffer and creates the `VkAccelerationStructureKHR` on it. The
//! build itself is recorded later into a command buffer together with a
//! caller-provided scratch buffer.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use tracing::debug;

use crate::acceleration::AccelerationStructureDesc;
use crate::error::RhiResult;
use crate::vulkan::buffer::{allocate_buffer, free_buffer};
use crate::vulkan::device::Device;

/// Device addresses of the buffers a build reads.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildInputs {
    pub vertices: vk::DeviceAddress,
    pub indices: vk::DeviceAddress,
    pub instances: vk::DeviceAddress,
}

fn structure_type(desc: &AccelerationStructureDesc) -> vk::AccelerationStructureTypeKHR {
    if desc.is_top_level() {
        vk::AccelerationStructureTypeKHR::TOP_LEVEL
    } else {
        vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
    }
}

/// Geometry record for `desc`. Addresses may be zero for size queries.
fn geometry(
    desc: &AccelerationStructureDesc,
    inputs: BuildInputs,
) -> vk::AccelerationStructureGeometryKHR<'static> {
    match *desc {
        AccelerationStructureDesc::BottomLevel {
            vertex_count,
            vertex_stride,
            ..
        } => {
            let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                .vertex_format(vk::Format::R32G32B32_SFLOAT)
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: inputs.vertices,
                })
                .vertex_stride(vertex_stride)
                .max_vertex(vertex_count.saturating_sub(1))
                .index_type(vk::IndexType::UINT32)
                .index_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: inputs.indices,
                });

            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .flags(vk::GeometryFlagsKHR::OPAQUE)
                .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        }
        AccelerationStructureDesc::TopLevel { .. } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: inputs.instances,
                });

            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
        }
    }
}

/// A created acceleration structure and the buffer backing it.
pub struct AccelerationStructureEntry {
    pub handle: vk::AccelerationStructureKHR,
    buffer: vk::Buffer,
    allocation: Allocation,
    /// Device address, referenced by top-level instances.
    pub reference: u64,
    pub scratch_size: u64,
}

impl AccelerationStructureEntry {
    /// Allocates storage sized for a build over `desc`.
    ///
    /// The scratch size is reported back for the build; no scratch buffer is
    /// created here.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing buffer cannot be allocated or
    /// structure creation fails.
    pub fn new(device: &Device, desc: &AccelerationStructureDesc) -> RhiResult<Self> {
        let loader = device.acceleration_structure();
        let ty = structure_type(desc);
        let geometry = geometry(desc, BuildInputs::default());
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&geometry));

        let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[desc.primitive_count()],
                &mut build_sizes,
            );
        }

        debug!(
            "{:?} sizes: as={}, scratch={}",
            ty, build_sizes.acceleration_structure_size, build_sizes.build_scratch_size
        );

        let (buffer, allocation) = allocate_buffer(
            device,
            build_sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "acceleration_structure",
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer)
            .offset(0)
            .size(build_sizes.acceleration_structure_size)
            .ty(ty);

        let handle = match unsafe { loader.create_acceleration_structure(&create_info, None) } {
            Ok(handle) => handle,
            Err(e) => {
                free_buffer(device, buffer, allocation);
                return Err(e.into());
            }
        };

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        let reference = unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        Ok(Self {
            handle,
            buffer,
            allocation,
            reference,
            scratch_size: build_sizes.build_scratch_size.max(1),
        })
    }

    pub fn destroy(self, device: &Device) {
        unsafe {
            device
                .acceleration_structure()
                .destroy_acceleration_structure(self.handle, None);
        }
        free_buffer(device, self.buffer, self.allocation);
    }
}

/// Records a full build of `target` over `desc`.
pub fn record_build(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    target: vk::AccelerationStructureKHR,
    desc: &AccelerationStructureDesc,
    inputs: BuildInputs,
    scratch: vk::DeviceAddress,
) {
    let geometry = geometry(desc, inputs);
    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(structure_type(desc))
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .dst_acceleration_structure(target)
        .geometries(std::slice::from_ref(&geometry))
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch,
        });

    let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(desc.primitive_count())
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0);

    unsafe {
        device.acceleration_structure().cmd_build_acceleration_structures(
            command_buffer,
            std::slice::from_ref(&build_info),
            &[std::slice::from_ref(&build_range)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BufferHandle;

    fn blas_desc() -> AccelerationStructureDesc {
        AccelerationStructureDesc::BottomLevel {
            vertices: BufferHandle::from_raw_parts(0, 0),
            vertex_count: 3,
            vertex_stride: 56,
            indices: BufferHandle::from_raw_parts(1, 0),
            triangle_count: 1,
        }
    }

    #[test]
    fn test_structure_type_follows_level() {
        assert_eq!(
            structure_type(&blas_desc()),
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
        );
        let tlas = AccelerationStructureDesc::TopLevel {
            instances: BufferHandle::from_raw_parts(2, 0),
            instance_count: 4,
        };
        assert_eq!(
            structure_type(&tlas),
            vk::AccelerationStructureTypeKHR::TOP_LEVEL
        );
        assert_eq!(
            geometry(&tlas, BuildInputs::default()).geometry_type,
            vk::GeometryTypeKHR::INSTANCES
        );
    }

    #[test]
    fn test_triangle_geometry_uses_stride_and_max_vertex() {
        let inputs = BuildInputs {
            vertices: 0x1000,
            indices: 0x2000,
            instances: 0,
        };
        let geometry = geometry(&blas_desc(), inputs);
        assert_eq!(geometry.geometry_type, vk::GeometryTypeKHR::TRIANGLES);
        let triangles = unsafe { geometry.geometry.triangles };
        assert_eq!(triangles.vertex_stride, 56);
        assert_eq!(triangles.max_vertex, 2);
        assert_eq!(unsafe { triangles.vertex_data.device_address }, 0x1000);
        assert_eq!(unsafe { triangles.index_data.device_address }, 0x2000);
    }
}
