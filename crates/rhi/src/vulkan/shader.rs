//! SPIR-V shader module loading.
//!
//! Shader modules only live for the duration of pipeline creation, so
//! [`Shader`] borrows the device and destroys its module on drop.

use std::path::Path;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::vulkan::device::Device;

/// Magic number opening every SPIR-V module.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Entry point every shader stage uses.
const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Raygen,
    Miss,
    ClosestHit,
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Raygen => vk::ShaderStageFlags::RAYGEN_KHR,
            ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
            ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Raygen => "raygen",
            ShaderStage::Miss => "miss",
            ShaderStage::ClosestHit => "closest hit",
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Converts SPIR-V bytes to code words, validating length and magic number.
pub fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if code.first() != Some(&SPIRV_MAGIC) {
        return Err(RhiError::ShaderError(
            "SPIR-V magic number mismatch".to_string(),
        ));
    }

    Ok(code)
}

/// Vulkan shader module scoped to pipeline creation.
pub struct Shader<'d> {
    device: &'d Device,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl<'d> Shader<'d> {
    /// Creates a shader module from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid SPIR-V, or
    /// module creation fails.
    pub fn from_spirv_file(device: &'d Device, path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;
        let code = decode_spirv(&bytes)
            .map_err(|e| RhiError::ShaderError(format!("{}: {}", path.display(), e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage create info for pipeline creation; borrows the module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Raygen.to_vk_stage(),
            vk::ShaderStageFlags::RAYGEN_KHR
        );
        assert_eq!(
            ShaderStage::ClosestHit.to_vk_stage(),
            vk::ShaderStageFlags::CLOSEST_HIT_KHR
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Miss), "miss");
        assert_eq!(format!("{}", ShaderStage::ClosestHit), "closest hit");
    }

    #[test]
    fn test_decode_spirv_rejects_misaligned() {
        assert!(matches!(
            decode_spirv(&[0u8; 5]),
            Err(RhiError::ShaderError(_))
        ));
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn test_decode_spirv_checks_magic() {
        assert!(decode_spirv(&[0u8; 8]).is_err());

        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0500u32.to_le_bytes());
        let code = decode_spirv(&bytes).unwrap();
        assert_eq!(code, vec![SPIRV_MAGIC, 0x0001_0500]);
    }
}
