//! Scene errors.

use thiserror::Error;

use crate::id::NodeId;

/// Errors raised while applying scene changes.
///
/// None of these are fatal: the offending change is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// A change referenced a node the scene does not know.
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// A node was created twice.
    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),

    /// Attaching the child would make it its own ancestor.
    #[error("Attaching {child} under {parent} would create a cycle")]
    HierarchyCycle {
        /// Node being attached.
        child: NodeId,
        /// Requested parent.
        parent: NodeId,
    },

    /// A property update targeted a node of another kind.
    #[error("Property '{property}' does not apply to node {node}")]
    PropertyMismatch {
        /// Target node.
        node: NodeId,
        /// Property name.
        property: &'static str,
    },
}

/// Result type alias for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;
