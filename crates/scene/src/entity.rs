//! Entities: hierarchy nodes that reference their components by id.

use glam::Mat4;
use tracer_core::Handle;

use crate::components::ComponentKind;
use crate::id::NodeId;

/// Generation-checked reference to an entity slot in the scene.
///
/// Parent and child links are stored as handles, so a link to a destroyed
/// entity resolves to `None` instead of dangling.
pub type EntityHandle = Handle<Entity>;

/// A node in the scene hierarchy.
#[derive(Clone, Debug)]
pub struct Entity {
    id: NodeId,
    pub(crate) parent: Option<EntityHandle>,
    pub(crate) children: Vec<EntityHandle>,
    transform: Option<NodeId>,
    geometry_renderer: Option<NodeId>,
    material: Option<NodeId>,
    camera_lens: Option<NodeId>,
    pub(crate) world_matrix: Mat4,
    /// Creation sequence number; orders renderables and cameras.
    pub(crate) serial: u64,
}

impl Entity {
    pub(crate) fn new(id: NodeId, serial: u64) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            transform: None,
            geometry_renderer: None,
            material: None,
            camera_lens: None,
            world_matrix: Mat4::IDENTITY,
            serial,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<EntityHandle> {
        self.parent
    }

    pub fn children(&self) -> &[EntityHandle] {
        &self.children
    }

    /// World matrix as of the last transform update.
    pub fn world_matrix(&self) -> Mat4 {
        self.world_matrix
    }

    /// Component of the given kind attached to this entity.
    pub fn component(&self, kind: ComponentKind) -> Option<NodeId> {
        match kind {
            ComponentKind::Transform => self.transform,
            ComponentKind::GeometryRenderer => self.geometry_renderer,
            ComponentKind::Material => self.material,
            ComponentKind::CameraLens => self.camera_lens,
        }
    }

    /// Attaches `component`, replacing any previous component of that kind.
    pub(crate) fn set_component(&mut self, kind: ComponentKind, component: NodeId) {
        let slot = match kind {
            ComponentKind::Transform => &mut self.transform,
            ComponentKind::GeometryRenderer => &mut self.geometry_renderer,
            ComponentKind::Material => &mut self.material,
            ComponentKind::CameraLens => &mut self.camera_lens,
        };
        *slot = Some(component);
    }

    /// Detaches `component` from whichever slot holds it.
    pub(crate) fn remove_component(&mut self, component: NodeId) -> bool {
        for slot in [
            &mut self.transform,
            &mut self.geometry_renderer,
            &mut self.material,
            &mut self.camera_lens,
        ] {
            if *slot == Some(component) {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub(crate) fn append_child(&mut self, child: EntityHandle) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: EntityHandle) {
        self.children.retain(|&c| c != child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_slots() {
        let mut entity = Entity::new(NodeId(1), 0);
        entity.set_component(ComponentKind::Material, NodeId(2));
        entity.set_component(ComponentKind::Material, NodeId(3));
        assert_eq!(entity.component(ComponentKind::Material), Some(NodeId(3)));

        assert!(!entity.remove_component(NodeId(2)));
        assert!(entity.remove_component(NodeId(3)));
        assert_eq!(entity.component(ComponentKind::Material), None);
    }

    #[test]
    fn test_children_are_unique() {
        let mut entity = Entity::new(NodeId(1), 0);
        let child = EntityHandle::from_raw_parts(4, 0);
        entity.append_child(child);
        entity.append_child(child);
        assert_eq!(entity.children(), &[child]);
        entity.remove_child(child);
        assert!(entity.children().is_empty());
    }
}
