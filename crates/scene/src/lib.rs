//! Renderer-side scene model.
//!
//! This crate mirrors the external scene graph for the renderer:
//! - [`SceneChange`] events delivered over a channel
//! - Entities with transform, geometry, material and camera lens components
//! - World transform propagation through the hierarchy
//! - [`DirtyTracker`] coalescing what changed between frames

pub mod camera;
pub mod change;
pub mod components;
pub mod dirty;
pub mod entity;
mod error;
pub mod id;
pub mod scene;
pub mod transform;

pub use camera::CameraLens;
pub use change::{NodeData, PropertyValue, SceneChange, change_channel};
pub use components::{Component, ComponentKind, GeometryRenderer, Material};
pub use dirty::{DirtySet, DirtySnapshot, DirtyTracker};
pub use entity::{Entity, EntityHandle};
pub use error::{SceneError, SceneResult};
pub use id::{GeometryId, NodeId, TextureId};
pub use scene::{CameraView, Renderable, Scene};
pub use transform::{Transform, normal_matrix};
