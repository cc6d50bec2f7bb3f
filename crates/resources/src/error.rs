//! Error types for importer-supplied data.

use thiserror::Error;

/// Error type for mesh and image data validation.
#[derive(Error, Debug, PartialEq)]
pub enum ResourceError {
    /// The mesh has no vertices or no triangles.
    #[error("Mesh is empty ({vertices} vertices, {triangles} triangles)")]
    EmptyMesh {
        /// Number of vertices supplied.
        vertices: usize,
        /// Number of triangles supplied.
        triangles: usize,
    },

    /// A per-vertex attribute array does not match the position count.
    #[error("Attribute '{attribute}' has {actual} entries, expected {expected}")]
    AttributeCountMismatch {
        /// Name of the attribute.
        attribute: &'static str,
        /// Number of positions.
        expected: usize,
        /// Number of entries found.
        actual: usize,
    },

    /// A triangle references a vertex that does not exist.
    #[error("Triangle {triangle} references vertex {index}, but the mesh has {vertex_count}")]
    IndexOutOfRange {
        /// Triangle number.
        triangle: usize,
        /// Offending index.
        index: u32,
        /// Number of vertices.
        vertex_count: usize,
    },

    /// Pixel data does not match the declared dimensions.
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
