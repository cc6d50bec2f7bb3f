//! Component payloads attached to entities.

use glam::Vec3;

use crate::camera::CameraLens;
use crate::id::{GeometryId, TextureId};
use crate::transform::Transform;

/// References the geometry an entity renders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryRenderer {
    /// `None` until the scene graph binds a geometry source.
    pub geometry: Option<GeometryId>,
}

impl GeometryRenderer {
    pub fn new(geometry: GeometryId) -> Self {
        Self {
            geometry: Some(geometry),
        }
    }
}

/// Surface parameters of the path tracer's single BSDF.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub albedo: Vec3,
    pub emission: Vec3,
    pub roughness: f32,
    pub metalness: f32,
    pub albedo_texture: Option<TextureId>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            emission: Vec3::ZERO,
            roughness: 1.0,
            metalness: 0.0,
            albedo_texture: None,
        }
    }
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self {
            albedo,
            ..Self::default()
        }
    }

    pub fn emissive(emission: Vec3) -> Self {
        Self {
            albedo: Vec3::ZERO,
            emission,
            ..Self::default()
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.emission.max_element() > 0.0
    }
}

/// Component type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Transform,
    GeometryRenderer,
    Material,
    CameraLens,
}

impl ComponentKind {
    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Transform => "transform",
            ComponentKind::GeometryRenderer => "geometry renderer",
            ComponentKind::Material => "material",
            ComponentKind::CameraLens => "camera lens",
        }
    }
}

/// A component node's state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Component {
    Transform(Transform),
    GeometryRenderer(GeometryRenderer),
    Material(Material),
    CameraLens(CameraLens),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Transform(_) => ComponentKind::Transform,
            Component::GeometryRenderer(_) => ComponentKind::GeometryRenderer,
            Component::Material(_) => ComponentKind::Material,
            Component::CameraLens(_) => ComponentKind::CameraLens,
        }
    }
}

impl From<Transform> for Component {
    fn from(value: Transform) -> Self {
        Component::Transform(value)
    }
}

impl From<GeometryRenderer> for Component {
    fn from(value: GeometryRenderer) -> Self {
        Component::GeometryRenderer(value)
    }
}

impl From<Material> for Component {
    fn from(value: Material) -> Self {
        Component::Material(value)
    }
}

impl From<CameraLens> for Component {
    fn from(value: CameraLens) -> Self {
        Component::CameraLens(value)
    }
}
