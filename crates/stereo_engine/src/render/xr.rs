//! Stereo view derivation
//!
//! A view provider reports one pose and field of view per eye each frame.
//! From those the renderer derives the per-eye view and projection
//! matrices and a head camera record for shaders that want a single
//! viewpoint.

use super::staging::CameraUniformData;
use crate::foundation::math::{projection_from_fov, to_cols_array, Fov, Mat4, Pose, Vec3};

/// Pose and field of view of one eye
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeView {
    /// Eye pose in tracking space
    pub pose: Pose,
    /// Eye field of view
    pub fov: Fov,
}

impl EyeView {
    /// World to view for this eye
    ///
    /// `rig_offset` shifts the world under the tracking space, which is how
    /// the camera rig moves through the scene.
    pub fn view_matrix(&self, rig_offset: Vec3) -> Mat4 {
        self.pose.inverse_rigid() * Mat4::new_translation(&rig_offset)
    }

    /// View to clip for this eye
    pub fn projection(&self, near: f32, far: f32) -> Mat4 {
        projection_from_fov(&self.fov, near, far)
    }

    /// World to clip for this eye
    pub fn view_projection(&self, rig_offset: Vec3, near: f32, far: f32) -> Mat4 {
        self.projection(near, far) * self.view_matrix(rig_offset)
    }
}

/// Both eyes for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoViews {
    /// Left eye, then right eye
    pub eyes: [EyeView; 2],
    /// Camera rig translation applied to both eyes
    pub rig_offset: Vec3,
}

impl StereoViews {
    /// Pose halfway between the eyes
    pub fn head_pose(&self) -> Pose {
        let [left, right] = &self.eyes;
        Pose {
            position: (left.pose.position + right.pose.position) * 0.5,
            orientation: left.pose.orientation.slerp(&right.pose.orientation, 0.5),
        }
    }

    /// Field of view covering both eyes
    pub fn combined_fov(&self) -> Fov {
        let [left, right] = &self.eyes;
        Fov {
            angle_left: left.fov.angle_left.min(right.fov.angle_left),
            angle_right: left.fov.angle_right.max(right.fov.angle_right),
            angle_up: left.fov.angle_up.max(right.fov.angle_up),
            angle_down: left.fov.angle_down.min(right.fov.angle_down),
        }
    }

    /// Camera record for the head viewpoint
    pub fn camera_data(&self, near: f32, far: f32) -> CameraUniformData {
        let head = EyeView {
            pose: self.head_pose(),
            fov: self.combined_fov(),
        };
        let view = head.view_matrix(self.rig_offset);
        let projection = head.projection(near, far);
        let position = head.pose.position - self.rig_offset;

        CameraUniformData {
            view: to_cols_array(&view),
            projection: to_cols_array(&projection),
            view_projection: to_cols_array(&(projection * view)),
            position: [position.x, position.y, position.z, 1.0],
        }
    }
}

/// Source of per-frame eye poses
pub trait ViewProvider {
    /// Views for `frame_number`, or `None` when tracking is lost
    ///
    /// A frame without views is skipped entirely.
    fn locate_views(&mut self, frame_number: u64) -> Option<StereoViews>;
}

/// Fixed stereo pair around a head pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticViewProvider {
    /// Head pose in tracking space
    pub head: Pose,
    /// Distance between the eyes
    pub ipd: f32,
    /// Per-eye field of view
    pub fov: Fov,
    /// Camera rig translation
    pub rig_offset: Vec3,
    /// When false, every frame reports lost tracking
    pub tracking: bool,
}

impl Default for StaticViewProvider {
    fn default() -> Self {
        Self {
            head: Pose::from_position(Vec3::new(0.0, 1.6, 0.0)),
            ipd: 0.064,
            fov: Fov::symmetric(90f32.to_radians(), 90f32.to_radians()),
            rig_offset: Vec3::zeros(),
            tracking: true,
        }
    }
}

impl StaticViewProvider {
    /// Views for the current head pose
    pub fn views(&self) -> StereoViews {
        let half = self.head.orientation * Vec3::new(self.ipd * 0.5, 0.0, 0.0);
        let eye = |offset: Vec3| EyeView {
            pose: Pose {
                position: self.head.position + offset,
                orientation: self.head.orientation,
            },
            fov: self.fov,
        };
        StereoViews {
            eyes: [eye(-half), eye(half)],
            rig_offset: self.rig_offset,
        }
    }
}

impl ViewProvider for StaticViewProvider {
    fn locate_views(&mut self, _frame_number: u64) -> Option<StereoViews> {
        self.tracking.then(|| self.views())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Quat, Vec4};
    use approx::assert_relative_eq;

    #[test]
    fn test_eye_view_is_inverse_pose_then_rig() {
        let eye = EyeView {
            pose: Pose {
                position: Vec3::new(0.1, 1.6, 0.0),
                orientation: Quat::from_axis_angle(&Vec3::y_axis(), 0.4),
            },
            fov: Fov::symmetric(1.5, 1.5),
        };
        let rig = Vec3::new(0.0, 0.0, -3.0);

        let expected = eye.pose.to_matrix().try_inverse().unwrap() * Mat4::new_translation(&rig);
        assert_relative_eq!(eye.view_matrix(rig), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_eye_position_maps_to_view_origin() {
        let provider = StaticViewProvider {
            rig_offset: Vec3::new(2.0, 0.0, 0.0),
            ..StaticViewProvider::default()
        };
        let views = provider.views();

        for eye in &views.eyes {
            let world = eye.pose.position - views.rig_offset;
            let in_view = eye.view_matrix(views.rig_offset)
                * Vec4::new(world.x, world.y, world.z, 1.0);
            assert_relative_eq!(in_view, Vec4::new(0.0, 0.0, 0.0, 1.0), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_static_provider_separates_eyes_by_ipd() {
        let provider = StaticViewProvider::default();
        let views = provider.views();
        let gap = views.eyes[1].pose.position - views.eyes[0].pose.position;

        assert_relative_eq!(gap.norm(), 0.064, epsilon = 1e-6);
        assert_relative_eq!(views.head_pose().position, provider.head.position, epsilon = 1e-6);
    }

    #[test]
    fn test_lost_tracking_yields_none() {
        let mut provider = StaticViewProvider {
            tracking: false,
            ..StaticViewProvider::default()
        };
        assert!(provider.locate_views(0).is_none());
        provider.tracking = true;
        assert!(provider.locate_views(1).is_some());
    }

    #[test]
    fn test_camera_data_uses_head_position() {
        let provider = StaticViewProvider::default();
        let camera = provider.views().camera_data(0.05, 100.0);
        assert_relative_eq!(camera.position[1], 1.6, epsilon = 1e-6);
        assert_relative_eq!(camera.position[3], 1.0);
    }
}
