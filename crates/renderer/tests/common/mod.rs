//! Shared fixtures for renderer integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;

use tracer_renderer::{CommandBufferManager, DescriptorManager, ResourceClass, SceneResources};
use tracer_resources::MeshData;
use tracer_rhi::headless::HeadlessDevice;
use tracer_scene::{
    CameraLens, Component, ComponentKind, DirtyTracker, GeometryId, GeometryRenderer, Material,
    NodeData, NodeId, Scene, SceneChange, Transform,
};

pub struct Fixture {
    pub device: Arc<HeadlessDevice>,
    pub commands: Arc<CommandBufferManager>,
    pub descriptors: Arc<DescriptorManager>,
    pub resources: SceneResources,
}

pub fn fixture(frames_in_flight: u32) -> Fixture {
    fixture_with_capacity(frames_in_flight, |_| 16)
}

/// A fixture whose descriptor arrays hold `capacity(class)` entries.
pub fn fixture_with_capacity(
    frames_in_flight: u32,
    capacity: impl Fn(ResourceClass) -> u32,
) -> Fixture {
    let device = Arc::new(HeadlessDevice::new());
    let commands = Arc::new(CommandBufferManager::new(device.clone()));
    let descriptors = Arc::new(DescriptorManager::new(device.clone()));
    for class in ResourceClass::ALL {
        descriptors
            .create_descriptor_pool(class, capacity(class))
            .unwrap();
    }
    let resources = SceneResources::new(
        device.clone(),
        commands.clone(),
        descriptors.clone(),
        frames_in_flight,
    );
    Fixture {
        device,
        commands,
        descriptors,
        resources,
    }
}

/// A mesh of `faces` disjoint triangles in the XY plane.
pub fn mesh(faces: u32) -> MeshData {
    let mut positions = Vec::new();
    let mut triangles = Vec::new();
    for face in 0..faces {
        let x = face as f32;
        let base = positions.len() as u32;
        positions.extend([
            Vec3::new(x, 0.0, 0.0),
            Vec3::new(x + 1.0, 0.0, 0.0),
            Vec3::new(x, 1.0, 0.0),
        ]);
        triangles.push([base, base + 1, base + 2]);
    }
    let normals = vec![Vec3::Z; positions.len()];
    MeshData::new(positions, normals, triangles)
}

/// Builds a scene through change events, allocating node ids.
pub struct SceneBuilder {
    pub scene: Scene,
    pub dirty: DirtyTracker,
    next_node: u64,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self {
            scene: Scene::new(),
            dirty: DirtyTracker::new(),
            next_node: 1,
        }
    }

    fn node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn apply(&mut self, change: SceneChange) {
        self.scene.apply(change, &self.dirty).unwrap();
    }

    fn component(&mut self, component: impl Into<Component>) -> NodeId {
        let node = self.node();
        self.apply(SceneChange::NodeCreated {
            node,
            data: NodeData::Component(component.into()),
        });
        node
    }

    fn entity(&mut self, components: Vec<(NodeId, ComponentKind)>) -> NodeId {
        let node = self.node();
        self.apply(SceneChange::NodeCreated {
            node,
            data: NodeData::Entity {
                parent: None,
                components,
            },
        });
        node
    }

    /// Renderable entity; returns the entity and its transform component.
    pub fn renderable(
        &mut self,
        geometry: GeometryId,
        material: Option<NodeId>,
        translation: Vec3,
    ) -> (NodeId, NodeId) {
        let transform = self.component(Transform::new().with_translation(translation));
        let renderer = self.component(GeometryRenderer::new(geometry));
        let material = match material {
            Some(material) => material,
            None => self.material(Material::default()),
        };
        let entity = self.entity(vec![
            (transform, ComponentKind::Transform),
            (renderer, ComponentKind::GeometryRenderer),
            (material, ComponentKind::Material),
        ]);
        (entity, transform)
    }

    pub fn material(&mut self, material: Material) -> NodeId {
        self.component(material)
    }

    /// Camera entity; returns the entity and its lens component.
    pub fn camera(&mut self, eye: Vec3) -> (NodeId, NodeId) {
        let transform = self.component(Transform::new().with_translation(eye));
        let lens = self.component(CameraLens::default());
        let entity = self.entity(vec![
            (transform, ComponentKind::Transform),
            (lens, ComponentKind::CameraLens),
        ]);
        (entity, lens)
    }

    pub fn geometry_data(&mut self, id: GeometryId, faces: u32) {
        self.apply(SceneChange::GeometryDataChanged(id, Arc::new(mesh(faces))));
    }
}
