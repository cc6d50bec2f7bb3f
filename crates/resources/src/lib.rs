//! Importer-facing geometry and image data.
//!
//! Mesh and image importers live outside this workspace. They hand over
//! immutable, already-parsed data:
//! - [`MeshData`]: per-vertex attributes plus triangle index triples
//! - [`ImageData`]: 8-bit or 32-bit float pixels with their dimensions
//!
//! This crate validates that data and packs it into the layouts the GPU
//! consumes ([`Vertex`]), generating tangent frames when the importer did
//! not supply them.

mod error;

pub mod image;
pub mod mesh;
pub mod tangent;
pub mod vertex;

pub use error::{ResourceError, ResourceResult};
pub use image::{ImageData, PixelData};
pub use mesh::MeshData;
pub use tangent::generate_tangents;
pub use vertex::Vertex;
