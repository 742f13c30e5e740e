//! Lighting

use super::staging::SceneUniformData;
use crate::foundation::math::{to_cols_array, Mat4, Mat4Ext, Vec3};

/// Shadow-casting directional light (like sunlight)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels, normalized
    pub direction: Vec3,
    /// Light color
    pub color: Vec3,
    /// Light intensity
    pub intensity: f32,
    /// Ambient light color
    pub ambient_color: Vec3,
    /// Ambient light intensity
    pub ambient_intensity: f32,
    /// Point the shadow frustum is centered on
    pub shadow_center: Vec3,
    /// Half width and height of the shadow frustum
    pub shadow_half_extent: f32,
    /// Depth of the shadow frustum
    pub shadow_depth: f32,
}

impl DirectionalLight {
    /// Create a directional light
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
            ..Self::default()
        }
    }

    /// Set ambient lighting
    pub fn with_ambient(mut self, color: Vec3, intensity: f32) -> Self {
        self.ambient_color = color;
        self.ambient_intensity = intensity;
        self
    }

    /// Set the region the shadow map covers
    pub fn with_shadow_volume(mut self, center: Vec3, half_extent: f32, depth: f32) -> Self {
        self.shadow_center = center;
        self.shadow_half_extent = half_extent;
        self.shadow_depth = depth;
        self
    }

    /// World to shadow clip space
    ///
    /// Looks along the light direction from half the shadow depth behind the
    /// center, with an orthographic box mapping depth to `[0, 1]`.
    pub fn light_view_projection(&self) -> Mat4 {
        let direction = self.direction.normalize();
        let eye = self.shadow_center - direction * (self.shadow_depth * 0.5);
        // Straight-down light needs a different up vector
        let up = if direction.y.abs() > 0.99 {
            Vec3::z()
        } else {
            Vec3::y()
        };

        let view = Mat4::look_at(eye, self.shadow_center, up);
        let e = self.shadow_half_extent;
        let projection = Mat4::orthographic_zero_to_one(-e, e, -e, e, 0.0, self.shadow_depth);
        projection * view
    }

    /// Scene uniform record for this light
    pub fn scene_data(&self) -> SceneUniformData {
        let d = self.direction;
        let c = self.color;
        let a = self.ambient_color;
        SceneUniformData {
            ambient: [a.x, a.y, a.z, self.ambient_intensity],
            sun_direction: [d.x, d.y, d.z, 0.0],
            sun_color: [c.x, c.y, c.z, self.intensity],
            light_view_projection: to_cols_array(&self.light_view_projection()),
        }
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.2, -1.0, -0.3).normalize(),
            color: Vec3::new(1.0, 1.0, 0.9),
            intensity: 1.0,
            ambient_color: Vec3::new(0.5, 0.7, 1.0),
            ambient_intensity: 0.3,
            shadow_center: Vec3::zeros(),
            shadow_half_extent: 20.0,
            shadow_depth: 60.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_shadow_center_lands_mid_depth() {
        let light = DirectionalLight::default();
        let clip = light.light_view_projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);

        assert_relative_eq!(clip.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.z, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_vertical_light_is_well_defined() {
        let light = DirectionalLight::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0);
        let matrix = light.light_view_projection();
        assert!(matrix.iter().all(|v| v.is_finite()));

        // Points above the center are closer to the light
        let above = matrix * Vec4::new(0.0, 5.0, 0.0, 1.0);
        let below = matrix * Vec4::new(0.0, -5.0, 0.0, 1.0);
        assert!(above.z < below.z);
    }

    #[test]
    fn test_scene_data_packs_intensities_in_w() {
        let light = DirectionalLight::default().with_ambient(Vec3::new(0.1, 0.2, 0.3), 0.25);
        let data = light.scene_data();
        assert_eq!(data.ambient, [0.1, 0.2, 0.3, 0.25]);
        assert_eq!(data.sun_color[3], 1.0);
        assert_eq!(data.sun_direction[3], 0.0);
    }
}
