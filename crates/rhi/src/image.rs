//! Image descriptions and layout states.

use crate::swapchain::Extent2D;

/// Pixel formats the core creates images with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Accumulation / render target format.
    Rgba16Float,
    /// 8-bit textures.
    Rgba8Unorm,
    /// HDR textures.
    Rgba32Float,
}

impl ImageFormat {
    /// Size of one texel in bytes.
    pub fn texel_size(self) -> usize {
        match self {
            ImageFormat::Rgba16Float => 8,
            ImageFormat::Rgba8Unorm => 4,
            ImageFormat::Rgba32Float => 16,
        }
    }
}

/// What an image is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageUsage {
    /// Written by the ray-trace pass, sampled by the display pass, clearable.
    RenderTarget,
    /// Uploaded once, sampled by shaders.
    Texture,
}

/// Parameters for [`GpuDevice::create_image`](crate::GpuDevice::create_image).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: Extent2D,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

impl ImageDesc {
    /// Render target matching a swapchain extent.
    pub fn render_target(extent: Extent2D) -> Self {
        Self {
            extent,
            format: ImageFormat::Rgba16Float,
            usage: ImageUsage::RenderTarget,
        }
    }

    /// Bytes needed to upload the whole image.
    pub fn byte_size(&self) -> usize {
        self.extent.width as usize * self.extent.height as usize * self.format.texel_size()
    }
}

/// Layout / access state an image is transitioned between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageState {
    /// Contents undefined (freshly created).
    Undefined,
    /// Destination of a copy or clear.
    TransferDst,
    /// Read/write storage image.
    ShaderReadWrite,
    /// Sampled read-only.
    ShaderRead,
}
