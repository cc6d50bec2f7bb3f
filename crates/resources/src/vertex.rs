//! Packed vertex format shared by the CPU and the ray-tracing shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// One vertex of a GPU geometry.
///
/// Shaders fetch vertices from a storage buffer with scalar block layout, so
/// the struct is tightly packed. The position comes first because
/// bottom-level acceleration structure builds read it directly from the same
/// buffer.
///
/// # Memory Layout
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 12   | position |
/// | 12     | 12   | normal |
/// | 24     | 12   | tangent |
/// | 36     | 12   | bitangent |
/// | 48     | 8    | tex_coord |
///
/// Total size: 56 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in object space.
    pub position: Vec3,
    /// Unit surface normal.
    pub normal: Vec3,
    /// Unit tangent, orthogonal to the normal.
    pub tangent: Vec3,
    /// Unit bitangent completing the tangent frame.
    pub bitangent: Vec3,
    /// Texture coordinates.
    pub tex_coord: Vec2,
}

impl Vertex {
    /// Byte stride between consecutive vertices.
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    #[inline]
    pub const fn new(
        position: Vec3,
        normal: Vec3,
        tangent: Vec3,
        bitangent: Vec3,
        tex_coord: Vec2,
    ) -> Self {
        Self {
            position,
            normal,
            tangent,
            bitangent,
            tex_coord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn test_vertex_size() {
        // 4 * Vec3 (12 bytes) + Vec2 (8 bytes) = 56 bytes
        assert_eq!(size_of::<Vertex>(), 56);
        assert_eq!(Vertex::STRIDE, 56);
        assert_eq!(align_of::<Vertex>(), 4);
    }

    #[test]
    fn test_position_is_first() {
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, normal), 12);
        assert_eq!(offset_of!(Vertex, tex_coord), 48);
    }

    #[test]
    fn test_bytemuck_cast() {
        let vertices = [Vertex::default(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 3 * 56);
    }
}
