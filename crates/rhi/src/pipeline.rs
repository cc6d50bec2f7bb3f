//! Pipeline descriptions.
//!
//! Only two pipeline shapes exist: the ray-tracing pipeline that fills the
//! render target and the full-screen display pass that resolves it into the
//! swapchain image.

use std::path::{Path, PathBuf};

use crate::resource::DescriptorSetLayoutHandle;

/// Parameters for [`GpuDevice::create_pipeline`](crate::GpuDevice::create_pipeline).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineDesc {
    RayTracing {
        raygen: PathBuf,
        /// Miss shaders in shader-binding-table order.
        miss: Vec<PathBuf>,
        closest_hit: PathBuf,
        set_layouts: Vec<DescriptorSetLayoutHandle>,
        push_constant_size: u32,
        max_recursion_depth: u32,
    },
    Display {
        vertex: PathBuf,
        fragment: PathBuf,
        set_layouts: Vec<DescriptorSetLayoutHandle>,
        push_constant_size: u32,
    },
}

impl PipelineDesc {
    /// Ray-tracing pipeline using the conventional shader file names in `dir`.
    pub fn ray_tracing(
        dir: &Path,
        set_layouts: Vec<DescriptorSetLayoutHandle>,
        push_constant_size: u32,
    ) -> Self {
        PipelineDesc::RayTracing {
            raygen: dir.join("pathtrace.rgen.spv"),
            miss: vec![dir.join("pathtrace.rmiss.spv"), dir.join("shadow.rmiss.spv")],
            closest_hit: dir.join("pathtrace.rchit.spv"),
            set_layouts,
            push_constant_size,
            max_recursion_depth: 1,
        }
    }

    /// Display pipeline using the conventional shader file names in `dir`.
    pub fn display(
        dir: &Path,
        set_layouts: Vec<DescriptorSetLayoutHandle>,
        push_constant_size: u32,
    ) -> Self {
        PipelineDesc::Display {
            vertex: dir.join("display.vert.spv"),
            fragment: dir.join("display.frag.spv"),
            set_layouts,
            push_constant_size,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineDesc::RayTracing { .. } => "ray tracing",
            PipelineDesc::Display { .. } => "display",
        }
    }

    pub fn set_layouts(&self) -> &[DescriptorSetLayoutHandle] {
        match self {
            PipelineDesc::RayTracing { set_layouts, .. }
            | PipelineDesc::Display { set_layouts, .. } => set_layouts,
        }
    }
}
