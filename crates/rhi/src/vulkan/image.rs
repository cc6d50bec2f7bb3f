//! Device-local images: render targets and textures.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::image::{ImageDesc, ImageFormat, ImageState, ImageUsage};
use crate::swapchain::Extent2D;
use crate::vulkan::device::Device;

impl ImageFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            ImageFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            ImageFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

impl ImageUsage {
    pub fn to_vk_usage(self) -> vk::ImageUsageFlags {
        match self {
            ImageUsage::RenderTarget => {
                vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
            }
            ImageUsage::Texture => {
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
            }
        }
    }
}

impl ImageState {
    /// Layout, pipeline stages and access mask of the state.
    pub fn to_vk(self) -> (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            ImageState::Undefined => (
                vk::ImageLayout::UNDEFINED,
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                vk::AccessFlags2::NONE,
            ),
            ImageState::TransferDst => (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::CLEAR,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            // Render targets stay in GENERAL; the display pass samples them there.
            ImageState::ShaderReadWrite => (
                vk::ImageLayout::GENERAL,
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                    | vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE
                    | vk::AccessFlags2::SHADER_SAMPLED_READ,
            ),
            ImageState::ShaderRead => (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags2::FRAGMENT_SHADER
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
            ),
        }
    }
}

/// Full color subresource of a single-mip, single-layer image.
pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// A live image with its view and memory.
pub struct ImageEntry {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    pub extent: Extent2D,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

impl ImageEntry {
    /// Creates a 2D image in device-local memory plus a full view of it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for an empty extent, or the error
    /// from image creation, allocation or view creation.
    pub fn new(device: &Device, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.extent.is_empty() {
            return Err(RhiError::InvalidHandle(format!(
                "Image extent must be non-zero (got {})",
                desc.extent
            )));
        }

        let format = desc.format.to_vk();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };

        let mut entry = Self {
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
        };

        if let Err(e) = bound {
            entry.destroy(device);
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        match unsafe { device.handle().create_image_view(&view_info, None) } {
            Ok(view) => entry.view = view,
            Err(e) => {
                entry.destroy(device);
                return Err(e.into());
            }
        }

        debug!(
            "Created {:?} image {} ({:?})",
            desc.usage, desc.extent, desc.format
        );
        Ok(entry)
    }

    pub fn destroy(mut self, device: &Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.handle().destroy_image_view(self.view, None);
            }
        }

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = device.allocator().lock().free(allocation)
        {
            tracing::error!("Failed to free image allocation: {:?}", e);
        }

        unsafe {
            device.handle().destroy_image(self.image, None);
        }

        debug!("Destroyed image {}", self.extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_target_usage_allows_storage_and_sampling() {
        let flags = ImageUsage::RenderTarget.to_vk_usage();
        assert!(flags.contains(vk::ImageUsageFlags::STORAGE));
        assert!(flags.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(flags.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!ImageUsage::Texture.to_vk_usage().contains(vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn test_image_state_layouts() {
        assert_eq!(ImageState::Undefined.to_vk().0, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            ImageState::TransferDst.to_vk().0,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(ImageState::ShaderReadWrite.to_vk().0, vk::ImageLayout::GENERAL);
        assert_eq!(
            ImageState::ShaderRead.to_vk().0,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(
            ImageFormat::Rgba16Float.to_vk(),
            vk::Format::R16G16B16A16_SFLOAT
        );
        assert_eq!(ImageFormat::Rgba8Unorm.to_vk(), vk::Format::R8G8B8A8_UNORM);
    }
}
