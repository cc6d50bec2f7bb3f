//! Vulkan logical device, queue and memory allocator.
//!
//! The renderer drives all work (transfers, acceleration structure builds,
//! ray tracing and presentation) through a single queue, so [`Device`] owns
//! exactly one. It also carries the extension loaders the backend needs and
//! the gpu-allocator instance every buffer and image is allocated from.

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::RhiError;
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::{PhysicalDeviceInfo, REQUIRED_EXTENSIONS};

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// The allocator is guarded by a mutex. Queue access is serialized by the
/// owner ([`VulkanDevice`](super::VulkanDevice)).
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Selected physical device and its properties.
    physical: PhysicalDeviceInfo,
    /// The graphics + compute + present queue.
    queue: vk::Queue,
    acceleration_structure: ash::khr::acceleration_structure::Device,
    ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    swapchain: ash::khr::swapchain::Device,
    /// Dropped before the device in [`Drop`].
    allocator: ManuallyDrop<Mutex<Allocator>>,
}

impl Device {
    /// Creates the logical device with the ray-tracing feature set enabled.
    ///
    /// Enables:
    /// - Vulkan 1.2 buffer device addresses and bindless descriptor indexing
    /// - Vulkan 1.3 dynamic rendering and synchronization2
    /// - Acceleration structures and ray-tracing pipelines
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical` - The selected GPU and its queue family
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(instance: &Instance, physical: PhysicalDeviceInfo) -> Result<Self, RhiError> {
        let queue_family = physical.queue_family();
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        debug!("Creating queue for family {}", queue_family);

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .buffer_device_address(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .scalar_block_layout(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true)
            .maintenance4(true);

        let mut acceleration_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
                .acceleration_structure(true);
        let mut ray_tracing_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .shader_int64(true);

        let extension_names: Vec<*const c_char> =
            REQUIRED_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3)
            .push_next(&mut acceleration_features)
            .push_next(&mut ray_tracing_features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            REQUIRED_EXTENSIONS.len()
        );

        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let acceleration_structure =
            ash::khr::acceleration_structure::Device::new(instance.handle(), &device);
        let ray_tracing_pipeline =
            ash::khr::ray_tracing_pipeline::Device::new(instance.handle(), &device);
        let swapchain = ash::khr::swapchain::Device::new(instance.handle(), &device);

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Self {
            device,
            physical,
            queue,
            acceleration_structure,
            ray_tracing_pipeline,
            swapchain,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        })
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.physical.queue_family()
    }

    #[inline]
    pub fn acceleration_structure(&self) -> &ash::khr::acceleration_structure::Device {
        &self.acceleration_structure
    }

    #[inline]
    pub fn ray_tracing_pipeline(&self) -> &ash::khr::ray_tracing_pipeline::Device {
        &self.ray_tracing_pipeline
    }

    #[inline]
    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }

    /// Returns the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Device address of a buffer created with `SHADER_DEVICE_ADDRESS` usage.
    pub fn buffer_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    /// Waits for the device to become idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    pub fn device_name(&self) -> &str {
        self.physical.device_name()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // Allocations reference the device, so the allocator goes first.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: every handle is a plain Vulkan handle or a function table; the
// allocator is behind a mutex and queue submission is serialized by the owner.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Extension names enabled on the logical device.
pub fn enabled_extensions() -> impl Iterator<Item = &'static CStr> {
    REQUIRED_EXTENSIONS.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_include_ray_tracing() {
        let names: Vec<&CStr> = enabled_extensions().collect();
        assert!(names.contains(&ash::khr::swapchain::NAME));
        assert!(names.contains(&ash::khr::acceleration_structure::NAME));
        assert!(names.contains(&ash::khr::ray_tracing_pipeline::NAME));
        assert!(names.contains(&ash::khr::deferred_host_operations::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
