//! Transform component.
//!
//! A [`Transform`] is the local placement of an entity relative to its
//! parent. World matrices are not stored here: the transform-update job
//! walks the entity hierarchy and caches the composed matrix on each
//! entity (see [`Scene::update_world_transforms`](crate::Scene::update_world_transforms)).
//!
//! # Example
//!
//! ```
//! use tracer_scene::Transform;
//! use glam::Vec3;
//!
//! let parent = Transform::new().with_translation(Vec3::new(10.0, 0.0, 0.0));
//! let child = Transform::new().with_translation(Vec3::new(0.0, 5.0, 0.0));
//!
//! let world = parent.local_matrix() * child.local_matrix();
//! let world_pos = world.transform_point3(Vec3::ZERO);
//! assert!((world_pos - Vec3::new(10.0, 5.0, 0.0)).length() < 0.001);
//! ```

use glam::{Mat3, Mat4, Quat, Vec3};

/// Translation, rotation and scale relative to the parent entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Create a new transform at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Transform at `eye` whose forward direction points at `target`.
    ///
    /// Falls back to the identity rotation when `eye` and `target` coincide.
    pub fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let rotation = match (target - eye).try_normalize() {
            Some(forward) => {
                let right = forward.cross(up).try_normalize().unwrap_or(Vec3::X);
                let up = right.cross(forward);
                Quat::from_mat3(&Mat3::from_cols(right, up, -forward))
            }
            None => Quat::IDENTITY,
        };
        Self::new().with_translation(eye).with_rotation(rotation)
    }

    /// Get the local transformation matrix.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Get the forward direction vector.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Get the right direction vector.
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Get the up direction vector.
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

/// Inverse transpose of `model`, used to transform normals.
///
/// Non-invertible matrices (e.g. zero scale) yield the identity instead of
/// NaN/Inf values.
pub fn normal_matrix(model: Mat4) -> Mat4 {
    const EPSILON: f32 = 1e-6;
    if model.determinant().abs() < EPSILON {
        Mat4::IDENTITY
    } else {
        model.inverse().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        a.abs_diff_eq(b, EPSILON)
    }

    #[test]
    fn test_transform_default() {
        let t = Transform::default();
        assert_eq!(t.translation, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.local_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_transform_builder() {
        let t = Transform::new()
            .with_translation(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(Vec3::splat(2.0));

        let p = t.local_matrix().transform_point3(Vec3::ONE);
        assert!(approx_eq_vec3(p, Vec3::new(3.0, 4.0, 5.0)));
    }

    #[test]
    fn test_direction_vectors() {
        let t = Transform::default();

        // Default orientation: -Z forward, +X right, +Y up
        assert_eq!(t.forward(), Vec3::NEG_Z);
        assert_eq!(t.right(), Vec3::X);
        assert_eq!(t.up(), Vec3::Y);
    }

    #[test]
    fn test_looking_at_points_forward_at_target() {
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let t = Transform::looking_at(eye, Vec3::new(5.0, 0.0, 5.0), Vec3::Y);
        assert!(approx_eq_vec3(t.forward(), Vec3::X));
        assert!(approx_eq_vec3(t.up(), Vec3::Y));
        assert_eq!(t.translation, eye);
    }

    #[test]
    fn test_looking_at_degenerate_target() {
        let t = Transform::looking_at(Vec3::ONE, Vec3::ONE, Vec3::Y);
        assert_eq!(t.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_normal_matrix_with_scale() {
        let model = Transform::new()
            .with_scale(Vec3::new(1.0, 2.0, 1.0))
            .local_matrix();
        assert_eq!(normal_matrix(model), model.inverse().transpose());
    }

    #[test]
    fn test_normal_matrix_non_invertible() {
        let model = Transform::new().with_scale(Vec3::ZERO).local_matrix();
        let normal = normal_matrix(model);

        // Should return identity matrix as fallback, not NaN
        assert_eq!(normal, Mat4::IDENTITY);
        assert!(!normal.is_nan());
    }
}
