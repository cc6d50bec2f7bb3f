//! Integration tests for applying scene change events.

use std::sync::Arc;

use glam::Vec3;

use tracer_resources::MeshData;
use tracer_scene::{
    CameraLens, ComponentKind, DirtySet, DirtyTracker, GeometryId, GeometryRenderer, Material,
    NodeData, NodeId, PropertyValue, Scene, SceneChange, Transform, change_channel,
};

fn component(node: u64, component: impl Into<tracer_scene::Component>) -> SceneChange {
    SceneChange::NodeCreated {
        node: NodeId(node),
        data: NodeData::Component(component.into()),
    }
}

fn entity(node: u64, parent: Option<u64>, components: &[(u64, ComponentKind)]) -> SceneChange {
    SceneChange::NodeCreated {
        node: NodeId(node),
        data: NodeData::Entity {
            parent: parent.map(NodeId),
            components: components.iter().map(|&(id, k)| (NodeId(id), k)).collect(),
        },
    }
}

fn triangle() -> Arc<MeshData> {
    Arc::new(MeshData::new(
        vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        vec![Vec3::Z; 3],
        vec![[0, 1, 2]],
    ))
}

#[test]
fn test_renderable_needs_geometry_and_material() {
    let dirty = DirtyTracker::new();
    let mut scene = Scene::new();
    scene
        .apply(component(10, GeometryRenderer::default()), &dirty)
        .unwrap();
    scene.apply(component(11, Material::default()), &dirty).unwrap();
    scene
        .apply(
            entity(
                1,
                None,
                &[
                    (10, ComponentKind::GeometryRenderer),
                    (11, ComponentKind::Material),
                ],
            ),
            &dirty,
        )
        .unwrap();

    // Geometry renderer without a bound geometry
    assert!(scene.renderables().is_empty());

    scene
        .apply(
            SceneChange::PropertyUpdated {
                node: NodeId(10),
                property: PropertyValue::Geometry(Some(GeometryId(3))),
            },
            &dirty,
        )
        .unwrap();
    let renderables = scene.renderables();
    assert_eq!(renderables.len(), 1);
    assert_eq!(renderables[0].geometry, GeometryId(3));

    scene
        .apply(
            SceneChange::ComponentRemoved {
                entity: NodeId(1),
                component: NodeId(11),
            },
            &dirty,
        )
        .unwrap();
    assert!(scene.renderables().is_empty());
}

#[test]
fn test_world_transforms_follow_hierarchy() {
    let dirty = DirtyTracker::new();
    let mut scene = Scene::new();
    scene
        .apply(
            component(10, Transform::new().with_translation(Vec3::new(1.0, 0.0, 0.0))),
            &dirty,
        )
        .unwrap();
    scene
        .apply(
            component(20, Transform::new().with_translation(Vec3::new(0.0, 2.0, 0.0))),
            &dirty,
        )
        .unwrap();
    scene
        .apply(entity(1, None, &[(10, ComponentKind::Transform)]), &dirty)
        .unwrap();
    scene
        .apply(entity(2, Some(1), &[(20, ComponentKind::Transform)]), &dirty)
        .unwrap();
    // No transform: inherits the parent's world matrix
    scene.apply(entity(3, Some(2), &[]), &dirty).unwrap();

    scene.update_world_transforms();
    let leaf = scene.entity_by_id(NodeId(3)).unwrap();
    let origin = leaf.world_matrix().transform_point3(Vec3::ZERO);
    assert!(origin.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-5));

    scene
        .apply(
            SceneChange::PropertyUpdated {
                node: NodeId(10),
                property: PropertyValue::Translation(Vec3::new(5.0, 0.0, 0.0)),
            },
            &dirty,
        )
        .unwrap();
    scene.update_world_transforms();
    let leaf = scene.entity_by_id(NodeId(3)).unwrap();
    let origin = leaf.world_matrix().transform_point3(Vec3::ZERO);
    assert!(origin.abs_diff_eq(Vec3::new(5.0, 2.0, 0.0), 1e-5));
}

#[test]
fn test_dirty_flags_per_change_kind() {
    let dirty = DirtyTracker::new();
    let mut scene = Scene::new();
    scene.apply(component(10, Transform::new()), &dirty).unwrap();
    scene.apply(component(11, CameraLens::new()), &dirty).unwrap();
    scene.apply(entity(1, None, &[]), &dirty).unwrap();
    dirty.take();

    scene
        .apply(
            SceneChange::PropertyUpdated {
                node: NodeId(10),
                property: PropertyValue::Rotation(glam::Quat::from_rotation_y(1.0)),
            },
            &dirty,
        )
        .unwrap();
    assert_eq!(dirty.take().flags, DirtySet::TRANSFORM);

    scene
        .apply(
            SceneChange::PropertyUpdated {
                node: NodeId(11),
                property: PropertyValue::FieldOfView(45.0),
            },
            &dirty,
        )
        .unwrap();
    assert_eq!(dirty.take().flags, DirtySet::CAMERA);

    scene
        .apply(SceneChange::GeometryDataChanged(GeometryId(4), triangle()), &dirty)
        .unwrap();
    let snapshot = dirty.take();
    assert_eq!(snapshot.flags, DirtySet::GEOMETRY);
    assert_eq!(snapshot.geometries, vec![GeometryId(4)]);
    assert!(scene.geometry_data(GeometryId(4)).is_some());

    scene
        .apply(
            SceneChange::ComponentAdded {
                entity: NodeId(1),
                component: NodeId(10),
                kind: ComponentKind::Transform,
            },
            &dirty,
        )
        .unwrap();
    assert_eq!(dirty.take().flags, DirtySet::ALL);
}

#[test]
fn test_active_camera_is_first_created() {
    let dirty = DirtyTracker::new();
    let mut scene = Scene::new();
    for (entity_id, transform_id, lens_id, fov) in [(1, 10, 11, 30.0), (2, 20, 21, 90.0)] {
        scene.apply(component(transform_id, Transform::new()), &dirty).unwrap();
        scene
            .apply(
                component(lens_id, CameraLens::new().with_field_of_view(fov)),
                &dirty,
            )
            .unwrap();
        scene
            .apply(
                entity(
                    entity_id,
                    None,
                    &[
                        (transform_id, ComponentKind::Transform),
                        (lens_id, ComponentKind::CameraLens),
                    ],
                ),
                &dirty,
            )
            .unwrap();
    }

    let camera = scene.active_camera().unwrap();
    assert_eq!(camera.entity, NodeId(1));
    assert_eq!(camera.lens.field_of_view, 30.0);

    scene
        .apply(SceneChange::NodeDestroyed(NodeId(1)), &dirty)
        .unwrap();
    assert_eq!(scene.active_camera().unwrap().entity, NodeId(2));
}

#[test]
fn test_apply_pending_skips_invalid_changes() {
    let dirty = DirtyTracker::new();
    let mut scene = Scene::new();
    let (tx, rx) = change_channel();

    tx.send(entity(1, None, &[])).unwrap();
    tx.send(entity(1, None, &[])).unwrap(); // duplicate
    tx.send(SceneChange::ChildAdded {
        parent: NodeId(1),
        child: NodeId(99),
    })
    .unwrap(); // unknown child
    tx.send(entity(2, Some(1), &[])).unwrap();

    assert_eq!(scene.apply_pending(&rx, &dirty), 2);
    assert_eq!(scene.entity_count(), 2);
    let root = scene.entity_by_id(NodeId(1)).unwrap();
    assert_eq!(root.children().len(), 1);
}
