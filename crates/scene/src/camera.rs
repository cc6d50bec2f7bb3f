//! Camera lens component.
//!
//! The ray tracer uses a thin-lens camera: the entity's world transform
//! places it, the lens describes how primary rays leave it and how the
//! accumulated radiance is mapped to display values.

/// Thin-lens camera parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraLens {
    /// Vertical field of view in degrees.
    pub field_of_view: f32,
    pub aspect_ratio: f32,
    /// Lens aperture diameter; zero gives a pinhole camera.
    pub diameter: f32,
    /// Distance to the plane in perfect focus.
    pub focal_distance: f32,
    pub gamma: f32,
    pub exposure: f32,
    pub tonemap_factor: f32,
}

impl Default for CameraLens {
    fn default() -> Self {
        Self {
            field_of_view: 60.0,
            aspect_ratio: 16.0 / 9.0,
            diameter: 0.0,
            focal_distance: 1.0,
            gamma: 2.2,
            exposure: 1.0,
            tonemap_factor: 1.0,
        }
    }
}

impl CameraLens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_of_view(mut self, degrees: f32) -> Self {
        self.field_of_view = degrees;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Depth of field from an aperture `diameter` focused at `focal_distance`.
    pub fn with_depth_of_field(mut self, diameter: f32, focal_distance: f32) -> Self {
        self.diameter = diameter;
        self.focal_distance = focal_distance;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    /// Tangent of half the vertical field of view.
    ///
    /// Primary ray directions in camera space are `(x * aspect * t, y * t, -1)`
    /// for normalized device coordinates `x, y`.
    pub fn tan_half_fov(&self) -> f32 {
        (self.field_of_view.to_radians() * 0.5).tan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lens_is_pinhole() {
        let lens = CameraLens::default();
        assert_eq!(lens.diameter, 0.0);
        assert_eq!(lens.field_of_view, 60.0);
    }

    #[test]
    fn test_tan_half_fov() {
        let lens = CameraLens::new().with_field_of_view(90.0);
        assert!((lens.tan_half_fov() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_builder_sets_depth_of_field() {
        let lens = CameraLens::new()
            .with_depth_of_field(0.1, 4.0)
            .with_aspect_ratio(1.0)
            .with_exposure(2.0);
        assert_eq!(lens.diameter, 0.1);
        assert_eq!(lens.focal_distance, 4.0);
        assert_eq!(lens.aspect_ratio, 1.0);
        assert_eq!(lens.exposure, 2.0);
    }
}
