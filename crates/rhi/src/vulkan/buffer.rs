//! GPU buffer allocation.
//!
//! Buffers are allocated through gpu-allocator. Only staging buffers live in
//! host-visible memory; everything else is device-local and filled by a
//! transfer from a staging buffer. Every device-local buffer carries a device
//! address so acceleration structure builds and shaders can reach it.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::buffer::{BufferDesc, BufferUsage};
use crate::error::{RhiError, RhiResult};
use crate::vulkan::device::Device;

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let addressable = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let build_input = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | addressable
                    | build_input
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | addressable
                    | build_input
            }
            BufferUsage::Instance => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | addressable
                    | build_input
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | addressable
            }
            BufferUsage::Scratch => vk::BufferUsageFlags::STORAGE_BUFFER | addressable,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns the preferred memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        if self.is_host_visible() {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        }
    }
}

/// Creates a buffer and binds freshly allocated memory to it.
pub(crate) fn allocate_buffer(
    device: &Device,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    name: &str,
) -> RhiResult<(vk::Buffer, Allocation)> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
    let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

    let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.handle().destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    let bound = unsafe {
        device
            .handle()
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
    };
    if let Err(e) = bound {
        free_buffer(device, buffer, allocation);
        return Err(e.into());
    }

    Ok((buffer, allocation))
}

/// Frees the allocation, then destroys the buffer.
pub(crate) fn free_buffer(device: &Device, buffer: vk::Buffer, allocation: Allocation) {
    if let Err(e) = device.allocator().lock().free(allocation) {
        tracing::error!("Failed to free buffer allocation: {:?}", e);
    }
    unsafe {
        device.handle().destroy_buffer(buffer, None);
    }
}

/// A live buffer: the Vulkan handle plus its memory.
pub struct BufferEntry {
    pub buffer: vk::Buffer,
    allocation: Allocation,
    pub size: vk::DeviceSize,
    pub usage: BufferUsage,
    /// Zero for staging buffers.
    pub address: vk::DeviceAddress,
}

impl BufferEntry {
    /// Creates and binds a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or buffer/memory allocation fails.
    pub fn new(device: &Device, desc: &BufferDesc) -> RhiResult<Self> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "{} buffer size must be greater than 0",
                desc.usage
            )));
        }

        let usage = desc.usage;
        let flags = usage.to_vk_usage();
        let (buffer, allocation) = allocate_buffer(
            device,
            desc.size,
            flags,
            usage.memory_location(),
            usage.name(),
        )?;

        let address = if flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            device.buffer_address(buffer)
        } else {
            0
        };

        debug!("Created {} buffer: {} bytes", usage.name(), desc.size);
        Ok(Self {
            buffer,
            allocation,
            size: desc.size,
            usage,
            address,
        })
    }

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not host-visible or the write would
    /// exceed the buffer size.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self.allocation.mapped_ptr().ok_or_else(|| {
            RhiError::InvalidHandle(format!("{} buffer memory is not mapped", self.usage))
        })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
        }

        Ok(())
    }

    pub fn destroy(self, device: &Device) {
        free_buffer(device, self.buffer, self.allocation);
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Storage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::STORAGE_BUFFER)
        );
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
    }

    #[test]
    fn test_build_inputs_are_addressable() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Instance] {
            let flags = usage.to_vk_usage();
            assert!(flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
            assert!(
                flags.contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR)
            );
        }
        assert!(
            BufferUsage::Scratch
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(BufferUsage::Vertex.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Storage.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Scratch.memory_location(), MemoryLocation::GpuOnly);
    }
}
