//! Triangle mesh data handed over by a mesh importer.

use glam::{Vec2, Vec3};

use crate::error::{ResourceError, ResourceResult};
use crate::tangent::generate_tangents;
use crate::vertex::Vertex;

/// Immutable triangle mesh.
///
/// Every per-vertex array is either empty or as long as `positions`.
/// Normals are required; texture coordinates default to zero; tangents and
/// bitangents are generated when the importer did not supply them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub tangents: Vec<Vec3>,
    pub bitangents: Vec<Vec3>,
    /// Triangle index triples into the vertex arrays.
    pub triangles: Vec<[u32; 3]>,
}

impl MeshData {
    /// Mesh with positions, normals and triangles only.
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            normals,
            triangles,
            ..Default::default()
        }
    }

    /// Attaches texture coordinates.
    pub fn with_tex_coords(mut self, tex_coords: Vec<Vec2>) -> Self {
        self.tex_coords = tex_coords;
        self
    }

    /// Attaches importer-supplied tangent frames.
    pub fn with_tangents(mut self, tangents: Vec<Vec3>, bitangents: Vec<Vec3>) -> Self {
        self.tangents = tangents;
        self.bitangents = bitangents;
        self
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles (faces).
    #[inline]
    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether tangent frames were supplied for every vertex.
    pub fn has_tangents(&self) -> bool {
        !self.positions.is_empty()
            && self.tangents.len() == self.positions.len()
            && self.bitangents.len() == self.positions.len()
    }

    /// Checks attribute counts and index ranges.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> ResourceResult<()> {
        let vertex_count = self.positions.len();
        if vertex_count == 0 || self.triangles.is_empty() {
            return Err(ResourceError::EmptyMesh {
                vertices: vertex_count,
                triangles: self.triangles.len(),
            });
        }

        check_count("normals", vertex_count, self.normals.len(), false)?;
        check_count("tex_coords", vertex_count, self.tex_coords.len(), true)?;
        check_count("tangents", vertex_count, self.tangents.len(), true)?;
        check_count("bitangents", vertex_count, self.bitangents.len(), true)?;

        for (triangle, indices) in self.triangles.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(ResourceError::IndexOutOfRange {
                    triangle,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(())
    }

    /// Packs the mesh into GPU vertices, generating tangents if needed.
    ///
    /// # Errors
    ///
    /// Fails if the mesh does not [`validate`](Self::validate).
    pub fn to_vertices(&self) -> ResourceResult<Vec<Vertex>> {
        self.validate()?;

        let generated;
        let (tangents, bitangents) = if self.has_tangents() {
            (self.tangents.as_slice(), self.bitangents.as_slice())
        } else {
            generated = generate_tangents(self);
            (generated.0.as_slice(), generated.1.as_slice())
        };

        Ok((0..self.vertex_count())
            .map(|i| {
                Vertex::new(
                    self.positions[i],
                    self.normals[i],
                    tangents[i],
                    bitangents[i],
                    self.tex_coords.get(i).copied().unwrap_or(Vec2::ZERO),
                )
            })
            .collect())
    }

    /// Flattened index buffer contents.
    pub fn indices(&self) -> Vec<u32> {
        self.triangles.iter().flatten().copied().collect()
    }
}

fn check_count(
    attribute: &'static str,
    expected: usize,
    actual: usize,
    optional: bool,
) -> ResourceResult<()> {
    if actual == expected || (optional && actual == 0) {
        Ok(())
    } else {
        Err(ResourceError::AttributeCountMismatch {
            attribute,
            expected,
            actual,
        })
    }
}
