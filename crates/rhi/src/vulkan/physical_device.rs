//! Physical device (GPU) selection.
//!
//! A device qualifies when it:
//! 1. Has one queue family that supports graphics, compute and presentation
//! 2. Exposes the ray-tracing extension set ([`REQUIRED_EXTENSIONS`])
//! 3. Supports acceleration structures, ray-tracing pipelines, buffer device
//!    addresses and bindless descriptor indexing
//! 4. Implements Vulkan 1.3
//!
//! Among qualifying devices the discrete GPU with the most memory wins.

use std::collections::HashSet;
use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Device extensions every candidate must expose.
pub const REQUIRED_EXTENSIONS: &[&CStr] = &[
    ash::khr::swapchain::NAME,
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Queue family indices for different queue types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family supporting both graphics and compute.
    pub graphics_family: Option<u32>,
    /// First family able to present to the surface.
    pub present_family: Option<u32>,
    /// A family supporting graphics, compute and presentation at once.
    pub universal_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// The renderer drives everything through one queue, so it needs a
    /// family that does it all.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.universal_family.is_some()
    }
}

/// Shader-binding-table layout limits of a ray-tracing capable device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family indices for different operations.
    pub queue_families: QueueFamilyIndices,
    /// Ray-tracing pipeline limits.
    pub ray_tracing: RayTracingProperties,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// The queue family all work is submitted to.
    pub fn queue_family(&self) -> u32 {
        self.queue_families.universal_family.unwrap_or_default()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .field("ray_tracing", &self.ray_tracing)
            .finish()
    }
}

/// Selects the most suitable ray-tracing capable GPU.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable_devices: Vec<(PhysicalDeviceInfo, u64)> = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .collect();

    if suitable_devices.is_empty() {
        warn!("No GPU supports the required ray-tracing feature set");
        return Err(RhiError::NoSuitableGpu);
    }

    suitable_devices.sort_by(|a, b| b.1.cmp(&a.1));
    let (selected_device, score) = suitable_devices.remove(0);

    let (major, minor, patch) = selected_device.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected_device.device_name(),
        selected_device.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected_device)
}

/// Checks if a physical device is suitable for ray tracing.
fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    if vk::api_version_major(properties.api_version) == 1
        && vk::api_version_minor(properties.api_version) < 3
    {
        debug!(
            "GPU '{}' skipped: Vulkan 1.3 not supported (version: {}.{})",
            device_name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: no queue family with graphics, compute and present support",
            device_name
        );
        return None;
    }

    let available = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(extensions) => extensions,
        Err(e) => {
            warn!("GPU '{}' skipped: cannot enumerate extensions: {}", device_name, e);
            return None;
        }
    };
    let available_names: HashSet<&CStr> = available
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();
    let missing = missing_extensions(&available_names);
    if !missing.is_empty() {
        debug!("GPU '{}' skipped: missing extensions {:?}", device_name, missing);
        return None;
    }

    let mut acceleration_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut ray_tracing_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut acceleration_features)
        .push_next(&mut ray_tracing_features)
        .push_next(&mut features_1_2);
    unsafe { instance.get_physical_device_features2(device, &mut features) };

    let supported = acceleration_features.acceleration_structure == vk::TRUE
        && ray_tracing_features.ray_tracing_pipeline == vk::TRUE
        && features_1_2.buffer_device_address == vk::TRUE
        && features_1_2.descriptor_indexing == vk::TRUE
        && features_1_2.runtime_descriptor_array == vk::TRUE
        && features_1_2.descriptor_binding_partially_bound == vk::TRUE
        && features_1_2.descriptor_binding_variable_descriptor_count == vk::TRUE;
    if !supported {
        debug!("GPU '{}' skipped: ray-tracing features not supported", device_name);
        return None;
    }

    let mut ray_tracing_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut properties2 =
        vk::PhysicalDeviceProperties2::default().push_next(&mut ray_tracing_properties);
    unsafe { instance.get_physical_device_properties2(device, &mut properties2) };

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
        ray_tracing: RayTracingProperties {
            shader_group_handle_size: ray_tracing_properties.shader_group_handle_size,
            shader_group_handle_alignment: ray_tracing_properties.shader_group_handle_alignment,
            shader_group_base_alignment: ray_tracing_properties.shader_group_base_alignment,
            max_ray_recursion_depth: ray_tracing_properties.max_ray_recursion_depth,
        },
    })
}

/// Required extensions absent from `available`.
fn missing_extensions(available: &HashSet<&CStr>) -> Vec<&'static CStr> {
    REQUIRED_EXTENSIONS
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

/// Finds queue family indices for different operations.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let flags: Vec<(vk::QueueFlags, bool)> = queue_families
        .iter()
        .enumerate()
        .map(|(i, family)| {
            let present = family.queue_count > 0
                && unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, i as u32, surface)
                        .unwrap_or(false)
                };
            let flags = if family.queue_count > 0 {
                family.queue_flags
            } else {
                vk::QueueFlags::empty()
            };
            (flags, present)
        })
        .collect();

    classify_queue_families(&flags)
}

/// Picks queue families from `(flags, present_support)` per family.
fn classify_queue_families(families: &[(vk::QueueFlags, bool)]) -> QueueFamilyIndices {
    let graphics_compute = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    let mut indices = QueueFamilyIndices::default();

    for (i, &(flags, present)) in families.iter().enumerate() {
        let i = i as u32;
        let has_graphics_compute = flags.contains(graphics_compute);

        if has_graphics_compute && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
        if has_graphics_compute && present && indices.universal_family.is_none() {
            indices.universal_family = Some(i);
        }
    }

    indices
}

/// Rates a physical device based on its capabilities.
///
/// Higher scores indicate more desirable devices.
fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // Available VRAM in MB, capped at 16 GB
    score += (info.device_local_memory() / (1024 * 1024)).min(16_000);

    // Deeper recursion allows more complex shading
    score += u64::from(info.ray_tracing.max_ray_recursion_depth.min(31));

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_classify_prefers_single_universal_family() {
        let families = [
            (vk::QueueFlags::TRANSFER, true),
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
            (
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                true,
            ),
        ];
        let indices = classify_queue_families(&families);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(0));
        assert_eq!(indices.universal_family, Some(2));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_classify_split_families_are_incomplete() {
        let families = [
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
            (vk::QueueFlags::COMPUTE, true),
        ];
        let indices = classify_queue_families(&families);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_graphics_without_compute_is_not_enough() {
        let families = [(vk::QueueFlags::GRAPHICS, true)];
        assert!(!classify_queue_families(&families).is_complete());
    }

    #[test]
    fn test_missing_extensions_reports_ray_tracing_set() {
        let available: HashSet<&CStr> = [ash::khr::swapchain::NAME].into_iter().collect();
        let missing = missing_extensions(&available);
        assert!(missing.contains(&ash::khr::acceleration_structure::NAME));
        assert!(missing.contains(&ash::khr::ray_tracing_pipeline::NAME));
        assert!(!missing.contains(&ash::khr::swapchain::NAME));

        let all: HashSet<&CStr> = REQUIRED_EXTENSIONS.iter().copied().collect();
        assert!(missing_extensions(&all).is_empty());
    }
}
