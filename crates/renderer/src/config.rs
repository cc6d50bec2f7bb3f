//! Renderer configuration.

use std::path::PathBuf;

use tracer_core::Config;

/// Settings the renderer reads at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererConfig {
    /// Frames-in-flight override. `None` derives the count from the
    /// surface's minimum image count.
    pub frames_in_flight: Option<usize>,
    /// Descriptors per bindless resource class.
    pub descriptor_capacity: u32,
    /// Directory holding the compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
    /// Worker threads for per-frame jobs; 1 runs them on the render thread.
    pub job_workers: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RendererConfig {
    fn from(config: &Config) -> Self {
        Self {
            frames_in_flight: config.frames_in_flight,
            descriptor_capacity: config.descriptor_capacity,
            shader_dir: config.shader_dir.clone(),
            job_workers: std::thread::available_parallelism()
                .map_or(1, |n| n.get().min(4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_from_core_config() {
        let core = Config {
            frames_in_flight: Some(3),
            descriptor_capacity: 16,
            shader_dir: PathBuf::from("/opt/shaders"),
            ..Config::default()
        };
        let config = RendererConfig::from(&core);
        assert_eq!(config.frames_in_flight, Some(3));
        assert_eq!(config.descriptor_capacity, 16);
        assert_eq!(config.shader_dir, PathBuf::from("/opt/shaders"));
        assert!(config.job_workers >= 1);
    }
}
