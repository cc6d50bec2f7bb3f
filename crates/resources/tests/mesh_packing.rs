//! Integration tests for packing importer meshes into GPU vertex data.

use glam::{Vec2, Vec3};

use tracer_resources::{MeshData, ResourceError, Vertex};

fn cube_face(z: f32) -> MeshData {
    MeshData::new(
        vec![
            Vec3::new(-1.0, -1.0, z),
            Vec3::new(1.0, -1.0, z),
            Vec3::new(1.0, 1.0, z),
            Vec3::new(-1.0, 1.0, z),
        ],
        vec![Vec3::Z; 4],
        vec![[0, 1, 2], [0, 2, 3]],
    )
    .with_tex_coords(vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(0.0, 1.0),
    ])
}

#[test]
fn test_packed_vertices_match_mesh() {
    let mesh = cube_face(0.5);
    let vertices = mesh.to_vertices().expect("valid mesh");

    assert_eq!(vertices.len(), mesh.vertex_count());
    for (vertex, position) in vertices.iter().zip(&mesh.positions) {
        assert_eq!(vertex.position, *position);
        assert_eq!(vertex.normal, Vec3::Z);
        assert!(vertex.tangent.abs_diff_eq(Vec3::X, 1e-5));
        assert!(vertex.bitangent.abs_diff_eq(Vec3::Y, 1e-5));
    }

    // Bottom-level builds read the first 12 bytes of each stride as the position.
    let bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let stride = Vertex::STRIDE as usize;
    let first = &bytes[stride..stride + 12];
    let expected: &[u8] = bytemuck::bytes_of(&mesh.positions[1]);
    assert_eq!(first, expected);
}

#[test]
fn test_invalid_mesh_is_not_packed() {
    let mut mesh = cube_face(0.0);
    mesh.triangles[1] = [0, 2, 4];
    assert!(matches!(
        mesh.to_vertices(),
        Err(ResourceError::IndexOutOfRange { index: 4, .. })
    ));
}
