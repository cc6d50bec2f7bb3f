//! Built-in demo scene fed to the renderer through change events.

use std::f32::consts::TAU;
use std::sync::Arc;

use crossbeam_channel::Sender;
use glam::{Quat, Vec3};

use tracer_resources::MeshData;
use tracer_scene::{
    CameraLens, Component, ComponentKind, GeometryId, GeometryRenderer, Material, NodeData, NodeId,
    PropertyValue, SceneChange, Transform,
};

const CUBE: GeometryId = GeometryId(1);
const GROUND: GeometryId = GeometryId(2);

/// Seconds per full turn of the cube.
const TURN_PERIOD: f32 = 8.0;

/// A lit cube spinning above a ground plane.
pub struct DemoScene {
    sender: Sender<SceneChange>,
    next_node: u64,
    cube_transform: NodeId,
    lens: NodeId,
}

impl DemoScene {
    /// Sends the initial scene.
    pub fn new(sender: Sender<SceneChange>, aspect_ratio: f32) -> Self {
        let mut demo = Self {
            sender,
            next_node: 1,
            cube_transform: NodeId(0),
            lens: NodeId(0),
        };

        demo.send(SceneChange::GeometryDataChanged(CUBE, Arc::new(cube())));
        demo.send(SceneChange::GeometryDataChanged(GROUND, Arc::new(quad(10.0))));

        let (_, cube_transform) = demo.renderable(
            CUBE,
            Material::diffuse(Vec3::new(0.8, 0.3, 0.2)),
            Transform::new().with_translation(Vec3::new(0.0, 1.0, 0.0)),
        );
        demo.renderable(
            GROUND,
            Material::diffuse(Vec3::splat(0.7)),
            Transform::new(),
        );
        demo.renderable(
            GROUND,
            Material::emissive(Vec3::splat(8.0)),
            Transform::new()
                .with_translation(Vec3::new(0.0, 4.0, 0.0))
                .with_rotation(Quat::from_rotation_x(std::f32::consts::PI))
                .with_scale(Vec3::splat(0.15)),
        );

        let camera = demo.component(Transform::looking_at(
            Vec3::new(0.0, 2.0, 6.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::Y,
        ));
        let lens = demo.component(CameraLens::new().with_aspect_ratio(aspect_ratio));
        demo.entity(vec![
            (camera, ComponentKind::Transform),
            (lens, ComponentKind::CameraLens),
        ]);

        demo.cube_transform = cube_transform;
        demo.lens = lens;
        demo
    }

    /// Advances the animation to `seconds` since start.
    pub fn update(&mut self, seconds: f32) {
        let angle = (seconds / TURN_PERIOD).fract() * TAU;
        self.send(SceneChange::PropertyUpdated {
            node: self.cube_transform,
            property: PropertyValue::Rotation(Quat::from_rotation_y(angle)),
        });
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.send(SceneChange::PropertyUpdated {
            node: self.lens,
            property: PropertyValue::AspectRatio(aspect_ratio),
        });
    }

    fn send(&self, change: SceneChange) {
        // The receiver lives as long as the renderer; nothing to do once it is gone.
        if self.sender.send(change).is_err() {
            tracing::debug!("Scene change dropped: renderer is gone");
        }
    }

    fn node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    fn component(&mut self, component: impl Into<Component>) -> NodeId {
        let node = self.node();
        self.send(SceneChange::NodeCreated {
            node,
            data: NodeData::Component(component.into()),
        });
        node
    }

    fn entity(&mut self, components: Vec<(NodeId, ComponentKind)>) -> NodeId {
        let node = self.node();
        self.send(SceneChange::NodeCreated {
            node,
            data: NodeData::Entity {
                parent: None,
                components,
            },
        });
        node
    }

    fn renderable(
        &mut self,
        geometry: GeometryId,
        material: Material,
        transform: Transform,
    ) -> (NodeId, NodeId) {
        let transform = self.component(transform);
        let renderer = self.component(GeometryRenderer::new(geometry));
        let material = self.component(material);
        let entity = self.entity(vec![
            (transform, ComponentKind::Transform),
            (renderer, ComponentKind::GeometryRenderer),
            (material, ComponentKind::Material),
        ]);
        (entity, transform)
    }
}

/// Unit cube centered at the origin, one quad per face.
fn cube() -> MeshData {
    let faces = [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::Z),
        (Vec3::Z, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y),
    ];
    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut triangles = Vec::with_capacity(12);
    for (normal, up) in faces {
        let right = up.cross(normal);
        let base = positions.len() as u32;
        for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            positions.push((normal + right * u + up * v) * 0.5);
            normals.push(normal);
        }
        triangles.push([base, base + 1, base + 2]);
        triangles.push([base, base + 2, base + 3]);
    }
    MeshData::new(positions, normals, triangles)
}

/// Square in the XZ plane facing +Y.
fn quad(size: f32) -> MeshData {
    let h = size * 0.5;
    MeshData::new(
        vec![
            Vec3::new(-h, 0.0, h),
            Vec3::new(h, 0.0, h),
            Vec3::new(h, 0.0, -h),
            Vec3::new(-h, 0.0, -h),
        ],
        vec![Vec3::Y; 4],
        vec![[0, 1, 2], [0, 2, 3]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_scene::{DirtyTracker, Scene, change_channel};

    #[test]
    fn test_demo_scene_is_renderable() {
        let (sender, receiver) = change_channel();
        let mut demo = DemoScene::new(sender, 16.0 / 9.0);
        demo.update(1.0);

        let dirty = DirtyTracker::new();
        let mut scene = Scene::new();
        assert!(scene.apply_pending(&receiver, &dirty) > 0);
        scene.update_world_transforms();

        assert_eq!(scene.renderables().len(), 3);
        assert!(scene.active_camera().is_some());
        assert!(scene.geometry_data(CUBE).is_some());
        assert!(scene.geometry_data(GROUND).is_some());
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let mesh = cube();
        assert_eq!(mesh.face_count(), 12);
        assert!(mesh.validate().is_ok());
        for triangle in mesh.triangles.iter() {
            let [a, b, c] = triangle.map(|i| mesh.positions[i as usize]);
            let normal = (b - a).cross(c - a);
            assert!(normal.dot(mesh.normals[triangle[0] as usize]) > 0.0);
        }
    }
}
