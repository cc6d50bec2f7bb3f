//! Data shared with the ray-tracing and display shaders.
//!
//! These structures must match the shader-side layouts exactly. All use
//! `#[repr(C)]` and implement `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use tracer_scene::{CameraLens, CameraView, Material, NodeId, normal_matrix};

/// Texture index meaning "no texture".
pub const NO_TEXTURE: u32 = u32::MAX;

/// Per-instance data read by the closest-hit shader.
///
/// One entry per top-level instance, indexed by the instance custom index.
///
/// # Memory Layout
///
/// - Offset 0: world transform (64 bytes)
/// - Offset 64: basis transform for normals (64 bytes)
/// - Offset 128: material index, geometry index, face count, padding
/// - Total size: 144 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GeometryInstance {
    pub transform: Mat4,
    /// Inverse transpose of `transform`; identity when it is singular.
    pub basis: Mat4,
    pub material_index: u32,
    pub geometry_index: u32,
    pub geometry_face_count: u32,
    pub _padding: u32,
}

impl GeometryInstance {
    pub fn new(
        transform: Mat4,
        material_index: u32,
        geometry_index: u32,
        geometry_face_count: u32,
    ) -> Self {
        Self {
            transform,
            basis: normal_matrix(transform),
            material_index,
            geometry_index,
            geometry_face_count,
            _padding: 0,
        }
    }
}

/// Material parameters as laid out in the material storage buffer.
///
/// # Memory Layout
///
/// - Offset 0: albedo (12 bytes), roughness (4 bytes)
/// - Offset 16: emission (12 bytes), metalness (4 bytes)
/// - Offset 32: albedo texture index (4 bytes), padding (12 bytes)
/// - Total size: 48 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialData {
    pub albedo: [f32; 3],
    pub roughness: f32,
    pub emission: [f32; 3],
    pub metalness: f32,
    pub albedo_texture: u32,
    pub _padding: [u32; 3],
}

impl MaterialData {
    /// Packs `material`; `albedo_texture` is a texture index or [`NO_TEXTURE`].
    pub fn new(material: &Material, albedo_texture: u32) -> Self {
        Self {
            albedo: material.albedo.to_array(),
            roughness: material.roughness,
            emission: material.emission.to_array(),
            metalness: material.metalness,
            albedo_texture,
            _padding: [0; 3],
        }
    }
}

/// Push constants of the ray-tracing pass.
///
/// # Memory Layout
///
/// - Offset 0: camera-to-world matrix (64 bytes)
/// - Offset 64: tan(fov / 2), aspect ratio, lens diameter, focal distance
/// - Offset 80: frame number, padding (12 bytes)
/// - Total size: 96 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TracePushConstants {
    pub camera_to_world: Mat4,
    pub tan_half_fov: f32,
    pub aspect_ratio: f32,
    pub lens_diameter: f32,
    pub focal_distance: f32,
    /// Accumulation frame counter; zero restarts accumulation.
    pub frame_number: u32,
    pub _padding: [u32; 3],
}

impl TracePushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(camera: &CameraView, frame_number: u32) -> Self {
        Self {
            camera_to_world: camera.world_matrix,
            tan_half_fov: camera.lens.tan_half_fov(),
            aspect_ratio: camera.lens.aspect_ratio,
            lens_diameter: camera.lens.diameter,
            focal_distance: camera.lens.focal_distance,
            frame_number,
            _padding: [0; 3],
        }
    }

    /// Looking down -Z from the origin with a default lens.
    pub fn without_camera(frame_number: u32) -> Self {
        Self::new(
            &CameraView {
                entity: NodeId(0),
                world_matrix: Mat4::IDENTITY,
                lens: CameraLens::default(),
            },
            frame_number,
        )
    }
}

/// Push constants of the display pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DisplayPushConstants {
    pub exposure: f32,
    pub inv_gamma: f32,
    pub tonemap_factor: f32,
    pub _padding: f32,
}

impl DisplayPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(lens: &CameraLens) -> Self {
        Self {
            exposure: lens.exposure,
            inv_gamma: 1.0 / lens.gamma,
            tonemap_factor: lens.tonemap_factor,
            _padding: 0.0,
        }
    }
}
