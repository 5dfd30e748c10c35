//! Object placement in world space.
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use kiln_scene::Transform;
//! use kiln_scene::bounds::Aabb;
//!
//! let transform = Transform::from_position(Vec3::new(4.0, 0.0, 0.0)).with_uniform_scale(2.0);
//! let local = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
//! let world = transform.transform_bounds(&local);
//! assert_eq!(world.min, Vec3::new(3.0, -1.0, -1.0));
//! ```

use glam::{Mat4, Quat, Vec3};

use crate::bounds::Aabb;

/// Position, rotation and scale of a scene object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Position in world space
    pub position: Vec3,
    /// Rotation as a quaternion
    pub rotation: Quat,
    /// Scale factor
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// No translation, rotation or scale.
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// A transform that only translates.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Replaces the rotation.
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Replaces the scale.
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Replaces the scale with the same factor on every axis.
    pub fn with_uniform_scale(self, scale: f32) -> Self {
        self.with_scale(Vec3::splat(scale))
    }

    /// Rotates about the world Y axis.
    pub fn rotate_y(&mut self, angle: f32) {
        self.rotation = (Quat::from_rotation_y(angle) * self.rotation).normalize();
    }

    /// Local-to-world matrix (scale, then rotate, then translate).
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// World-space box enclosing a local-space box.
    pub fn transform_bounds(&self, local: &Aabb) -> Aabb {
        local.transformed(&self.matrix())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_identity_matrix() {
        assert_eq!(Transform::default().matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_matrix_applies_scale_before_translation() {
        let transform = Transform::from_position(Vec3::new(0.0, 1.0, 0.0)).with_uniform_scale(3.0);
        let point = transform.matrix().transform_point3(Vec3::X);
        assert_relative_eq!(point.x, 3.0);
        assert_relative_eq!(point.y, 1.0);
    }

    #[test]
    fn test_rotate_y_quarter_turn() {
        let mut transform = Transform::IDENTITY;
        transform.rotate_y(std::f32::consts::FRAC_PI_2);
        let point = transform.matrix().transform_point3(Vec3::X);
        assert_relative_eq!(point.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(point.z, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_transform_bounds() {
        let transform = Transform::from_position(Vec3::new(0.0, 0.0, -10.0));
        let world = transform.transform_bounds(&Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)));
        assert_relative_eq!(world.center().z, -10.0);
        assert_relative_eq!(world.half_extents().x, 1.0);
    }
}
