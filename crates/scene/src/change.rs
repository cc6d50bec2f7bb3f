//! Scene change events.
//!
//! The scene graph front end owns the authoring-side objects and reports
//! every mutation as a [`SceneChange`] over a channel. The renderer side
//! drains the channel once per frame tick and dispatches on the variant;
//! there is no runtime type inspection.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use glam::{Quat, Vec3};
use tracer_resources::{ImageData, MeshData};

use crate::components::{Component, ComponentKind};
use crate::dirty::DirtySet;
use crate::id::{GeometryId, NodeId, TextureId};

/// Initial state delivered with [`SceneChange::NodeCreated`].
#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    Entity {
        parent: Option<NodeId>,
        components: Vec<(NodeId, ComponentKind)>,
    },
    Component(Component),
}

/// A single updated component property.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropertyValue {
    Translation(Vec3),
    Rotation(Quat),
    Scale(Vec3),
    Geometry(Option<GeometryId>),
    Albedo(Vec3),
    Emission(Vec3),
    Roughness(f32),
    Metalness(f32),
    AlbedoTexture(Option<TextureId>),
    FieldOfView(f32),
    AspectRatio(f32),
    LensDiameter(f32),
    FocalDistance(f32),
    Gamma(f32),
    Exposure(f32),
    TonemapFactor(f32),
}

impl PropertyValue {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyValue::Translation(_) => "translation",
            PropertyValue::Rotation(_) => "rotation",
            PropertyValue::Scale(_) => "scale",
            PropertyValue::Geometry(_) => "geometry",
            PropertyValue::Albedo(_) => "albedo",
            PropertyValue::Emission(_) => "emission",
            PropertyValue::Roughness(_) => "roughness",
            PropertyValue::Metalness(_) => "metalness",
            PropertyValue::AlbedoTexture(_) => "albedoTexture",
            PropertyValue::FieldOfView(_) => "fieldOfView",
            PropertyValue::AspectRatio(_) => "aspectRatio",
            PropertyValue::LensDiameter(_) => "lensDiameter",
            PropertyValue::FocalDistance(_) => "focalDistance",
            PropertyValue::Gamma(_) => "gamma",
            PropertyValue::Exposure(_) => "exposure",
            PropertyValue::TonemapFactor(_) => "tonemapFactor",
        }
    }

    /// Component kind the property belongs to.
    pub fn component(&self) -> ComponentKind {
        match self {
            PropertyValue::Translation(_) | PropertyValue::Rotation(_) | PropertyValue::Scale(_) => {
                ComponentKind::Transform
            }
            PropertyValue::Geometry(_) => ComponentKind::GeometryRenderer,
            PropertyValue::Albedo(_)
            | PropertyValue::Emission(_)
            | PropertyValue::Roughness(_)
            | PropertyValue::Metalness(_)
            | PropertyValue::AlbedoTexture(_) => ComponentKind::Material,
            PropertyValue::FieldOfView(_)
            | PropertyValue::AspectRatio(_)
            | PropertyValue::LensDiameter(_)
            | PropertyValue::FocalDistance(_)
            | PropertyValue::Gamma(_)
            | PropertyValue::Exposure(_)
            | PropertyValue::TonemapFactor(_) => ComponentKind::CameraLens,
        }
    }

    /// Categories invalidated by applying this property.
    pub fn dirty(&self) -> DirtySet {
        match self.component() {
            ComponentKind::Transform => DirtySet::TRANSFORM,
            ComponentKind::GeometryRenderer => DirtySet::GEOMETRY,
            ComponentKind::Material => DirtySet::MATERIAL,
            ComponentKind::CameraLens => DirtySet::CAMERA,
        }
    }
}

/// Mutation reported by the scene graph front end.
#[derive(Clone, Debug)]
pub enum SceneChange {
    NodeCreated {
        node: NodeId,
        data: NodeData,
    },
    NodeDestroyed(NodeId),
    ComponentAdded {
        entity: NodeId,
        component: NodeId,
        kind: ComponentKind,
    },
    ComponentRemoved {
        entity: NodeId,
        component: NodeId,
    },
    ChildAdded {
        parent: NodeId,
        child: NodeId,
    },
    ChildRemoved {
        parent: NodeId,
        child: NodeId,
    },
    PropertyUpdated {
        node: NodeId,
        property: PropertyValue,
    },
    GeometryDataChanged(GeometryId, Arc<MeshData>),
    TextureDataChanged(TextureId, Arc<ImageData>),
}

impl SceneChange {
    pub fn name(&self) -> &'static str {
        match self {
            SceneChange::NodeCreated { .. } => "node created",
            SceneChange::NodeDestroyed(_) => "node destroyed",
            SceneChange::ComponentAdded { .. } => "component added",
            SceneChange::ComponentRemoved { .. } => "component removed",
            SceneChange::ChildAdded { .. } => "child added",
            SceneChange::ChildRemoved { .. } => "child removed",
            SceneChange::PropertyUpdated { .. } => "property updated",
            SceneChange::GeometryDataChanged(..) => "geometry data changed",
            SceneChange::TextureDataChanged(..) => "texture data changed",
        }
    }
}

/// Creates the unbounded channel the scene graph reports changes on.
pub fn change_channel() -> (Sender<SceneChange>, Receiver<SceneChange>) {
    crossbeam_channel::unbounded()
}
