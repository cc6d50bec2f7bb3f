//! Renderer-side mirror of the scene graph.
//!
//! [`Scene`] consumes [`SceneChange`] events, keeps entities in a
//! generation-checked arena and component state keyed by node id, and marks
//! the affected categories dirty on a [`DirtyTracker`]. The renderer reads
//! it through [`Scene::renderables`] and [`Scene::active_camera`].

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use glam::Mat4;
use tracer_core::Arena;
use tracer_resources::{ImageData, MeshData};
use tracing::{debug, warn};

use crate::camera::CameraLens;
use crate::change::{NodeData, PropertyValue, SceneChange};
use crate::components::{Component, ComponentKind, GeometryRenderer, Material};
use crate::dirty::{DirtySet, DirtyTracker};
use crate::entity::{Entity, EntityHandle};
use crate::error::{SceneError, SceneResult};
use crate::id::{GeometryId, NodeId, TextureId};
use crate::transform::Transform;

/// An entity the ray tracer draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Renderable<'a> {
    pub entity: NodeId,
    pub geometry: GeometryId,
    /// Material component node; shared materials resolve to one index.
    pub material_id: NodeId,
    pub material: &'a Material,
    pub world_matrix: Mat4,
}

/// The camera primary rays are cast from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraView {
    pub entity: NodeId,
    pub world_matrix: Mat4,
    pub lens: CameraLens,
}

/// Entities, components and imported data known to the renderer.
#[derive(Default)]
pub struct Scene {
    entities: Arena<Entity>,
    lookup: HashMap<NodeId, EntityHandle>,
    components: HashMap<NodeId, Component>,
    geometries: HashMap<GeometryId, Arc<MeshData>>,
    textures: HashMap<TextureId, Arc<ImageData>>,
    next_serial: u64,
}

fn component_dirty(kind: ComponentKind) -> DirtySet {
    match kind {
        ComponentKind::Transform => DirtySet::TRANSFORM,
        ComponentKind::GeometryRenderer => DirtySet::GEOMETRY,
        ComponentKind::Material => DirtySet::MATERIAL,
        ComponentKind::CameraLens => DirtySet::CAMERA,
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    pub fn entity_handle(&self, id: NodeId) -> Option<EntityHandle> {
        self.lookup.get(&id).copied()
    }

    pub fn entity_by_id(&self, id: NodeId) -> Option<&Entity> {
        self.entity_handle(id).and_then(|h| self.entities.get(h))
    }

    pub fn component(&self, id: NodeId) -> Option<&Component> {
        self.components.get(&id)
    }

    pub fn transform(&self, entity: &Entity) -> Option<&Transform> {
        match self.attached(entity, ComponentKind::Transform)? {
            Component::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn geometry_renderer(&self, entity: &Entity) -> Option<&GeometryRenderer> {
        match self.attached(entity, ComponentKind::GeometryRenderer)? {
            Component::GeometryRenderer(g) => Some(g),
            _ => None,
        }
    }

    pub fn material(&self, entity: &Entity) -> Option<&Material> {
        match self.attached(entity, ComponentKind::Material)? {
            Component::Material(m) => Some(m),
            _ => None,
        }
    }

    pub fn camera_lens(&self, entity: &Entity) -> Option<&CameraLens> {
        match self.attached(entity, ComponentKind::CameraLens)? {
            Component::CameraLens(l) => Some(l),
            _ => None,
        }
    }

    fn attached(&self, entity: &Entity, kind: ComponentKind) -> Option<&Component> {
        self.components.get(&entity.component(kind)?)
    }

    /// Has a material and a geometry renderer bound to a geometry.
    pub fn is_renderable(&self, entity: &Entity) -> bool {
        self.material(entity).is_some()
            && self
                .geometry_renderer(entity)
                .is_some_and(|g| g.geometry.is_some())
    }

    /// Has both a transform and a camera lens.
    pub fn is_camera(&self, entity: &Entity) -> bool {
        self.transform(entity).is_some() && self.camera_lens(entity).is_some()
    }

    /// Every renderable entity, in creation order.
    pub fn renderables(&self) -> Vec<Renderable<'_>> {
        let mut entities: Vec<&Entity> = self.entities.iter().map(|(_, e)| e).collect();
        entities.sort_by_key(|e| e.serial);
        entities
            .into_iter()
            .filter_map(|entity| {
                let geometry = self.geometry_renderer(entity)?.geometry?;
                let material_id = entity.component(ComponentKind::Material)?;
                let material = self.material(entity)?;
                Some(Renderable {
                    entity: entity.id(),
                    geometry,
                    material_id,
                    material,
                    world_matrix: entity.world_matrix(),
                })
            })
            .collect()
    }

    /// The first camera entity in creation order.
    pub fn active_camera(&self) -> Option<CameraView> {
        self.entities
            .iter()
            .map(|(_, e)| e)
            .filter(|e| self.is_camera(e))
            .min_by_key(|e| e.serial)
            .and_then(|entity| {
                Some(CameraView {
                    entity: entity.id(),
                    world_matrix: entity.world_matrix(),
                    lens: *self.camera_lens(entity)?,
                })
            })
    }

    pub fn geometry_data(&self, id: GeometryId) -> Option<Arc<MeshData>> {
        self.geometries.get(&id).cloned()
    }

    pub fn texture_data(&self, id: TextureId) -> Option<Arc<ImageData>> {
        self.textures.get(&id).cloned()
    }

    /// Drains every queued change, logging and skipping the ones that fail.
    ///
    /// Returns the number of changes applied successfully.
    pub fn apply_pending(&mut self, changes: &Receiver<SceneChange>, dirty: &DirtyTracker) -> usize {
        let mut applied = 0;
        for change in changes.try_iter() {
            let name = change.name();
            match self.apply(change, dirty) {
                Ok(()) => applied += 1,
                Err(e) => warn!("Ignoring scene change ({}): {}", name, e),
            }
        }
        applied
    }

    /// Applies one change and marks what it invalidates.
    pub fn apply(&mut self, change: SceneChange, dirty: &DirtyTracker) -> SceneResult<()> {
        match change {
            SceneChange::NodeCreated { node, data } => {
                if self.lookup.contains_key(&node) || self.components.contains_key(&node) {
                    return Err(SceneError::DuplicateNode(node));
                }
                match data {
                    NodeData::Entity { parent, components } => {
                        let parent = parent.map(|p| self.require_entity(p)).transpose()?;
                        let mut entity = Entity::new(node, self.next_serial);
                        self.next_serial += 1;
                        for (component, kind) in components {
                            entity.set_component(kind, component);
                        }
                        let handle = self.entities.insert(entity);
                        self.lookup.insert(node, handle);
                        if let Some(parent) = parent {
                            self.attach(handle, parent);
                        }
                        debug!("Entity {} created", node);
                        dirty.mark_dirty(DirtySet::ALL, node);
                    }
                    NodeData::Component(component) => {
                        dirty.mark_dirty(component_dirty(component.kind()), node);
                        self.components.insert(node, component);
                    }
                }
            }
            SceneChange::NodeDestroyed(node) => {
                if let Some(handle) = self.lookup.remove(&node) {
                    self.destroy_entity(handle);
                } else if self.components.remove(&node).is_some() {
                    for (_, entity) in self.entities.iter_mut() {
                        entity.remove_component(node);
                    }
                } else {
                    return Err(SceneError::UnknownNode(node));
                }
                dirty.mark_dirty(DirtySet::ALL, node);
            }
            SceneChange::ComponentAdded {
                entity,
                component,
                kind,
            } => {
                let handle = self.require_entity(entity)?;
                if let Some(e) = self.entities.get_mut(handle) {
                    e.set_component(kind, component);
                }
                dirty.mark_dirty(DirtySet::ALL, entity);
            }
            SceneChange::ComponentRemoved { entity, component } => {
                let handle = self.require_entity(entity)?;
                if let Some(e) = self.entities.get_mut(handle) {
                    e.remove_component(component);
                }
                dirty.mark_dirty(DirtySet::ALL, entity);
            }
            SceneChange::ChildAdded { parent, child } => {
                let parent_handle = self.require_entity(parent)?;
                let child_handle = self.require_entity(child)?;
                if self.is_ancestor_or_self(child_handle, parent_handle) {
                    return Err(SceneError::HierarchyCycle { child, parent });
                }
                self.detach(child_handle);
                self.attach(child_handle, parent_handle);
                dirty.mark_dirty(DirtySet::ALL, parent);
            }
            SceneChange::ChildRemoved { parent, child } => {
                let parent_handle = self.require_entity(parent)?;
                let child_handle = self.require_entity(child)?;
                if self.entities.get(child_handle).and_then(|c| c.parent) == Some(parent_handle) {
                    self.detach(child_handle);
                }
                dirty.mark_dirty(DirtySet::ALL, parent);
            }
            SceneChange::PropertyUpdated { node, property } => {
                let component = self
                    .components
                    .get_mut(&node)
                    .ok_or(SceneError::UnknownNode(node))?;
                apply_property(component, property).ok_or(SceneError::PropertyMismatch {
                    node,
                    property: property.name(),
                })?;
                dirty.mark_dirty(property.dirty(), node);
            }
            SceneChange::GeometryDataChanged(id, data) => {
                debug!(
                    "Geometry {} data: {} vertices, {} faces",
                    id,
                    data.vertex_count(),
                    data.face_count()
                );
                self.geometries.insert(id, data);
                dirty.mark_geometry(id);
            }
            SceneChange::TextureDataChanged(id, data) => {
                self.textures.insert(id, data);
                dirty.mark_texture(id);
            }
        }
        Ok(())
    }

    /// Recomputes every entity's world matrix from the hierarchy.
    pub fn update_world_transforms(&mut self) {
        let Self {
            entities,
            components,
            ..
        } = self;

        let mut stack: Vec<(EntityHandle, Mat4)> = entities
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(h, _)| (h, Mat4::IDENTITY))
            .collect();

        while let Some((handle, parent_world)) = stack.pop() {
            let Some(entity) = entities.get_mut(handle) else {
                continue;
            };
            let local = entity
                .component(ComponentKind::Transform)
                .and_then(|id| match components.get(&id) {
                    Some(Component::Transform(t)) => Some(t.local_matrix()),
                    _ => None,
                })
                .unwrap_or(Mat4::IDENTITY);
            entity.world_matrix = parent_world * local;
            let world = entity.world_matrix;
            stack.extend(entity.children.iter().map(|&child| (child, world)));
        }
    }

    fn require_entity(&self, id: NodeId) -> SceneResult<EntityHandle> {
        self.entity_handle(id).ok_or(SceneError::UnknownNode(id))
    }

    fn is_ancestor_or_self(&self, candidate: EntityHandle, mut node: EntityHandle) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.entities.get(node).and_then(|e| e.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn attach(&mut self, child: EntityHandle, parent: EntityHandle) {
        if let Some(p) = self.entities.get_mut(parent) {
            p.append_child(child);
        }
        if let Some(c) = self.entities.get_mut(child) {
            c.parent = Some(parent);
        }
    }

    fn detach(&mut self, child: EntityHandle) {
        let Some(parent) = self.entities.get_mut(child).and_then(|c| c.parent.take()) else {
            return;
        };
        if let Some(p) = self.entities.get_mut(parent) {
            p.remove_child(child);
        }
    }

    /// Detaches from the parent and orphans the remaining children.
    fn destroy_entity(&mut self, handle: EntityHandle) {
        self.detach(handle);
        if let Some(entity) = self.entities.remove(handle) {
            debug!("Entity {} destroyed", entity.id());
            for child in entity.children {
                if let Some(c) = self.entities.get_mut(child) {
                    c.parent = None;
                }
            }
        }
    }
}

fn apply_property(component: &mut Component, property: PropertyValue) -> Option<()> {
    match (component, property) {
        (Component::Transform(t), PropertyValue::Translation(v)) => t.translation = v,
        (Component::Transform(t), PropertyValue::Rotation(q)) => t.rotation = q,
        (Component::Transform(t), PropertyValue::Scale(v)) => t.scale = v,
        (Component::GeometryRenderer(g), PropertyValue::Geometry(id)) => g.geometry = id,
        (Component::Material(m), PropertyValue::Albedo(v)) => m.albedo = v,
        (Component::Material(m), PropertyValue::Emission(v)) => m.emission = v,
        (Component::Material(m), PropertyValue::Roughness(v)) => m.roughness = v,
        (Component::Material(m), PropertyValue::Metalness(v)) => m.metalness = v,
        (Component::Material(m), PropertyValue::AlbedoTexture(id)) => m.albedo_texture = id,
        (Component::CameraLens(l), PropertyValue::FieldOfView(v)) => l.field_of_view = v,
        (Component::CameraLens(l), PropertyValue::AspectRatio(v)) => l.aspect_ratio = v,
        (Component::CameraLens(l), PropertyValue::LensDiameter(v)) => l.diameter = v,
        (Component::CameraLens(l), PropertyValue::FocalDistance(v)) => l.focal_distance = v,
        (Component::CameraLens(l), PropertyValue::Gamma(v)) => l.gamma = v,
        (Component::CameraLens(l), PropertyValue::Exposure(v)) => l.exposure = v,
        (Component::CameraLens(l), PropertyValue::TonemapFactor(v)) => l.tonemap_factor = v,
        _ => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn create_entity(scene: &mut Scene, dirty: &DirtyTracker, id: u64, parent: Option<u64>) {
        scene
            .apply(
                SceneChange::NodeCreated {
                    node: NodeId(id),
                    data: NodeData::Entity {
                        parent: parent.map(NodeId),
                        components: Vec::new(),
                    },
                },
                dirty,
            )
            .unwrap();
    }

    #[test]
    fn test_cycle_is_rejected() {
        let dirty = DirtyTracker::new();
        let mut scene = Scene::new();
        create_entity(&mut scene, &dirty, 1, None);
        create_entity(&mut scene, &dirty, 2, Some(1));

        let err = scene
            .apply(
                SceneChange::ChildAdded {
                    parent: NodeId(2),
                    child: NodeId(1),
                },
                &dirty,
            )
            .unwrap_err();
        assert_eq!(
            err,
            SceneError::HierarchyCycle {
                child: NodeId(1),
                parent: NodeId(2)
            }
        );
    }

    #[test]
    fn test_property_mismatch() {
        let dirty = DirtyTracker::new();
        let mut scene = Scene::new();
        scene
            .apply(
                SceneChange::NodeCreated {
                    node: NodeId(5),
                    data: NodeData::Component(Material::default().into()),
                },
                &dirty,
            )
            .unwrap();

        let err = scene
            .apply(
                SceneChange::PropertyUpdated {
                    node: NodeId(5),
                    property: PropertyValue::Scale(Vec3::ONE),
                },
                &dirty,
            )
            .unwrap_err();
        assert_eq!(
            err,
            SceneError::PropertyMismatch {
                node: NodeId(5),
                property: "scale"
            }
        );
    }

    #[test]
    fn test_destroy_orphans_children() {
        let dirty = DirtyTracker::new();
        let mut scene = Scene::new();
        create_entity(&mut scene, &dirty, 1, None);
        create_entity(&mut scene, &dirty, 2, Some(1));
        create_entity(&mut scene, &dirty, 3, Some(2));

        scene
            .apply(SceneChange::NodeDestroyed(NodeId(2)), &dirty)
            .unwrap();

        let root = scene.entity_by_id(NodeId(1)).unwrap();
        assert!(root.children().is_empty());
        let orphan = scene.entity_by_id(NodeId(3)).unwrap();
        assert_eq!(orphan.parent(), None);
        assert_eq!(scene.entity_count(), 2);
    }

    #[test]
    fn test_unknown_node() {
        let dirty = DirtyTracker::new();
        let mut scene = Scene::new();
        assert_eq!(
            scene.apply(SceneChange::NodeDestroyed(NodeId(9)), &dirty),
            Err(SceneError::UnknownNode(NodeId(9)))
        );
        assert!(dirty.take().is_empty());
    }
}
