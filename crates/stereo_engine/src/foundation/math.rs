//! Math utilities and types
//!
//! Provides the fundamental math types shared by the scene graph, the XR view
//! derivation and the GPU record layouts.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Column-major `[[f32; 4]; 4]` layout of a matrix, as shaders expect it.
pub fn to_cols_array(matrix: &Mat4) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (col, column) in out.iter_mut().enumerate() {
        for (row, value) in column.iter_mut().enumerate() {
            *value = matrix[(row, col)];
        }
    }
    out
}

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix (translation · rotation · scale)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Apply this transform to a point
    pub fn transform_point(&self, point: Point3) -> Point3 {
        self.to_matrix().transform_point(&point)
    }
}

/// Rigid pose as reported by a tracking runtime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Position in tracking space
    pub position: Vec3,
    /// Orientation in tracking space
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Identity pose at the tracking origin
    pub fn identity() -> Self {
        Self {
            position: Vec3::zeros(),
            orientation: Quat::identity(),
        }
    }

    /// Pose translated to `position` with identity orientation
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::identity(),
        }
    }

    /// Pose rotated counter-clockwise about +Y and placed at `position`
    pub fn rotate_ccw_about_y(radians: f32, position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::from_axis_angle(&Vec3::y_axis(), radians),
        }
    }

    /// Pose as a homogeneous matrix (translation · rotation)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position) * self.orientation.to_homogeneous()
    }

    /// Inverse of the rigid pose matrix, computed without a general inverse
    pub fn inverse_rigid(&self) -> Mat4 {
        let inverse_rotation = self.orientation.inverse();
        let inverse_translation = -(inverse_rotation * self.position);
        Mat4::new_translation(&inverse_translation) * inverse_rotation.to_homogeneous()
    }
}

/// Asymmetric field of view, angles in radians
///
/// Left and down angles are usually negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fov {
    /// Angle of the left edge
    pub angle_left: f32,
    /// Angle of the right edge
    pub angle_right: f32,
    /// Angle of the top edge
    pub angle_up: f32,
    /// Angle of the bottom edge
    pub angle_down: f32,
}

impl Fov {
    /// Symmetric field of view from horizontal and vertical full angles
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self {
            angle_left: -horizontal * 0.5,
            angle_right: horizontal * 0.5,
            angle_up: vertical * 0.5,
            angle_down: -vertical * 0.5,
        }
    }
}

/// Projection for an asymmetric frustum in Vulkan clip conventions.
///
/// Y points down in clip space and depth maps to `[0, 1]`. A `far` at or
/// below `near` produces an infinite far plane.
pub fn projection_from_fov(fov: &Fov, near: f32, far: f32) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_down = fov.angle_down.tan();
    let tan_up = fov.angle_up.tan();

    let tan_width = tan_right - tan_left;
    // Vulkan flips Y relative to GL
    let tan_height = tan_down - tan_up;

    let (m22, m23) = if far <= near {
        (-1.0, -near)
    } else {
        (-far / (far - near), -(far * near) / (far - near))
    };

    Mat4::new(
        2.0 / tan_width, 0.0, (tan_right + tan_left) / tan_width, 0.0,
        0.0, 2.0 / tan_height, (tan_up + tan_down) / tan_height, 0.0,
        0.0, 0.0, m22, m23,
        0.0, 0.0, -1.0, 0.0,
    )
}

/// Extension trait for Mat4 with additional convenience methods
pub trait Mat4Ext {
    /// Create a look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Orthographic projection mapping depth to `[0, 1]`
    fn orthographic_zero_to_one(
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    ) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new(
            1.0, 0.0, 0.0, -eye.x,
            0.0, 1.0, 0.0, -eye.y,
            0.0, 0.0, 1.0, -eye.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn orthographic_zero_to_one(
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    ) -> Mat4 {
        Mat4::new(
            2.0 / (right - left), 0.0, 0.0, -(right + left) / (right - left),
            0.0, 2.0 / (top - bottom), 0.0, -(top + bottom) / (top - bottom),
            0.0, 0.0, -1.0 / (far - near), -near / (far - near),
            0.0, 0.0, 0.0, 1.0,
        )
    }
}
