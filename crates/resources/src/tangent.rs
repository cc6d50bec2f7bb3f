//! Tangent frame generation for meshes imported without tangents.
//!
//! Per-triangle tangents and bitangents are derived from texture coordinate
//! deltas, accumulated on the triangle's vertices, and then orthogonalized
//! against each vertex normal (Gram-Schmidt). Vertices that only touch
//! triangles with degenerate texture coordinates get an arbitrary
//! orthonormal frame around their normal.

use glam::{Vec2, Vec3};
use tracing::debug;

use crate::mesh::MeshData;

/// Texture-space area below which a triangle contributes no tangent.
const DEGENERATE_UV_EPSILON: f32 = 1e-12;

/// Computes per-vertex unit tangents and bitangents.
///
/// The returned arrays are as long as `mesh.positions`. Triangles with
/// out-of-range indices are ignored.
pub fn generate_tangents(mesh: &MeshData) -> (Vec<Vec3>, Vec<Vec3>) {
    let vertex_count = mesh.positions.len();
    let mut tangents = vec![Vec3::ZERO; vertex_count];
    let mut bitangents = vec![Vec3::ZERO; vertex_count];
    let uv = |i: usize| mesh.tex_coords.get(i).copied().unwrap_or(Vec2::ZERO);

    let mut degenerate = 0usize;
    for triangle in &mesh.triangles {
        let [i0, i1, i2] = triangle.map(|i| i as usize);
        if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
            continue;
        }

        let e1 = mesh.positions[i1] - mesh.positions[i0];
        let e2 = mesh.positions[i2] - mesh.positions[i0];
        let d1 = uv(i1) - uv(i0);
        let d2 = uv(i2) - uv(i0);

        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < DEGENERATE_UV_EPSILON {
            degenerate += 1;
            continue;
        }
        let r = 1.0 / det;
        let tangent = (e1 * d2.y - e2 * d1.y) * r;
        let bitangent = (e2 * d1.x - e1 * d2.x) * r;

        for i in [i0, i1, i2] {
            tangents[i] += tangent;
            bitangents[i] += bitangent;
        }
    }
    if degenerate > 0 {
        debug!(
            "Tangent generation: {} of {} triangles have degenerate texture coordinates",
            degenerate,
            mesh.triangles.len()
        );
    }

    for i in 0..vertex_count {
        let normal = mesh
            .normals
            .get(i)
            .copied()
            .and_then(Vec3::try_normalize)
            .unwrap_or(Vec3::Z);
        let (tangent, bitangent) = orthonormal_frame(normal, tangents[i], bitangents[i]);
        tangents[i] = tangent;
        bitangents[i] = bitangent;
    }

    (tangents, bitangents)
}

/// Orthogonalizes an accumulated tangent against `normal`, keeping the
/// handedness implied by the accumulated bitangent.
fn orthonormal_frame(normal: Vec3, tangent: Vec3, bitangent: Vec3) -> (Vec3, Vec3) {
    let Some(tangent) = (tangent - normal * normal.dot(tangent)).try_normalize() else {
        return normal.any_orthonormal_pair();
    };
    let handedness = if normal.cross(tangent).dot(bitangent) < 0.0 {
        -1.0
    } else {
        1.0
    };
    (tangent, normal.cross(tangent) * handedness)
}
