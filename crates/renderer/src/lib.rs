//! Ray-tracing renderer core.
//!
//! This crate keeps a GPU-resident copy of the scene and renders it:
//! - [`CommandBufferManager`]: per-thread transient command buffers, batched
//!   submission and fence-gated reclamation
//! - [`DescriptorManager`]: bindless descriptor arrays per resource class
//! - [`SceneResources`]: geometry table, bottom-level structures and the
//!   TTL-retired scene top-level structure
//! - [`JobGraph`]: per-frame jobs derived from the dirty set
//! - [`Renderer`]: the frame scheduler

pub mod command_buffer_manager;
pub mod config;
pub mod descriptor_manager;
mod error;
pub mod frame;
pub mod gpu_types;
pub mod jobs;
pub mod renderer;
pub mod scene_resources;

pub use command_buffer_manager::{CommandBufferManager, TransientCommandBuffer, TransientResource};
pub use config::RendererConfig;
pub use descriptor_manager::{DescriptorManager, ResourceClass};
pub use error::{RendererError, RendererResult};
pub use frame::FrameStatus;
pub use jobs::{JobContext, JobGraph, JobKind, JobReport};
pub use renderer::Renderer;
pub use scene_resources::{
    Geometry, INVALID_GEOMETRY_INDEX, RetiredResource, SceneResources, SceneTlas, TlasBuild,
    Texture,
};

/// Upper bound on frames in flight when the count is derived from the surface.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
