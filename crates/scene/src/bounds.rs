//! Bounding volumes and view-frustum tests.
//!
//! # Overview
//!
//! - [`Aabb`] - axis-aligned box, re-fitted after transformation from its
//!   eight corners
//! - [`Plane`] - `normal · p + d = 0`, with the normal pointing inward
//! - [`Frustum`] - six planes extracted from a view-projection matrix
//!
//! The box/plane test keeps a box unless it lies entirely on the negative
//! side of a plane:
//!
//! ```text
//! d = dot(n, center) + plane_d
//! r = dot(half_extents, abs(n))
//! keep if d >= -r
//! ```
//!
//! # Example
//!
//! ```
//! use glam::{Mat4, Vec3};
//! use kiln_scene::bounds::{Aabb, Frustum};
//!
//! let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
//! let proj = Mat4::perspective_rh(60_f32.to_radians(), 1.0, 0.1, 100.0);
//! let frustum = Frustum::from_view_projection(&(proj * view));
//!
//! assert!(frustum.intersects(&Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))));
//! assert!(!frustum.intersects(&Aabb::new(Vec3::new(-1.0, -1.0, 8.0), Vec3::new(1.0, 1.0, 9.0))));
//! ```

use glam::{Mat4, Vec3, Vec4};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// A box that contains nothing; growing it by a point yields that point.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    /// Creates a box from its corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// A box centered on `center` extending `half_extents` each way.
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// The smallest box containing every point, or [`Aabb::EMPTY`].
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |mut aabb, point| {
            aabb.grow(point);
            aabb
        })
    }

    /// Extends the box to contain `point`.
    pub fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// The smallest box containing both boxes.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Whether the box contains no points.
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Center point.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half the size along each axis.
    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The eight corners.
    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// The box enclosing this one after `matrix` is applied.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(
            self.corners()
                .into_iter()
                .map(|corner| matrix.transform_point3(corner)),
        )
    }
}

/// A plane `normal · p + d = 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    /// Unit normal, pointing to the inside.
    pub normal: Vec3,
    /// Distance term.
    pub d: f32,
}

impl Plane {
    /// Creates a plane from a normal and distance term.
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Builds a unit-normal plane from `(a, b, c, d)` coefficients.
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.truncate();
        let length = normal.length();
        if length > 0.0 {
            Self::new(normal / length, coefficients.w / length)
        } else {
            Self::new(normal, coefficients.w)
        }
    }

    /// Signed distance from the plane; positive on the inside.
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Whether any part of `aabb` lies on the inside of the plane.
    pub fn intersects_or_inside(&self, aabb: &Aabb) -> bool {
        let distance = self.signed_distance(aabb.center());
        let radius = aabb.half_extents().dot(self.normal.abs());
        distance >= -radius
    }
}

/// Index of each plane in [`Frustum::planes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrustumPlane {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Near = 4,
    Far = 5,
}

/// Six inward-facing planes bounding the visible volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    /// Planes in [`FrustumPlane`] order.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the frustum from a view-projection matrix.
    ///
    /// Expects column vectors (`clip = m * world`) and clip-space depth in
    /// `[0, 1]`, which is what `glam`'s `*_rh` projections produce. A flipped
    /// Y axis only swaps the bottom and top planes.
    pub fn from_view_projection(m: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// The plane at `which`.
    #[inline]
    pub fn plane(&self, which: FrustumPlane) -> &Plane {
        &self.planes[which as usize]
    }

    /// Whether `aabb` is at least partly inside all six planes.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.intersects_or_inside(aabb))
    }

    /// Whether `point` is inside all six planes.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn test_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(90_f32.to_radians(), 1.0, 0.1, 50.0);
        Frustum::from_view_projection(&(proj * view))
    }

    fn unit_box_at(center: Vec3) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn test_from_points() {
        let aabb = Aabb::from_points([
            Vec3::new(1.0, -2.0, 0.0),
            Vec3::new(-1.0, 3.0, 4.0),
            Vec3::new(0.0, 0.0, -4.0),
        ]);
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, -4.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 4.0));
        assert!(Aabb::from_points([]).is_empty());
    }

    #[test]
    fn test_transformed_refits_rotated_box() {
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let rotated = aabb.transformed(&Mat4::from_rotation_y(45_f32.to_radians()));
        let expected = 2.0_f32.sqrt();
        assert_relative_eq!(rotated.max.x, expected, epsilon = 1e-5);
        assert_relative_eq!(rotated.min.z, -expected, epsilon = 1e-5);
        assert_relative_eq!(rotated.max.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_transformed_translates() {
        let aabb = unit_box_at(Vec3::ZERO);
        let moved = aabb.transformed(&Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert_relative_eq!(moved.center().x, 10.0);
        assert_relative_eq!(moved.half_extents().x, 0.5);
    }

    #[test]
    fn test_planes_are_normalized() {
        for plane in test_frustum().planes {
            assert_relative_eq!(plane.normal.length(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_plane_box_straddling() {
        let plane = Plane::new(Vec3::X, 0.0);
        assert!(plane.intersects_or_inside(&unit_box_at(Vec3::new(0.2, 0.0, 0.0))));
        assert!(plane.intersects_or_inside(&unit_box_at(Vec3::new(-0.4, 0.0, 0.0))));
        assert!(!plane.intersects_or_inside(&unit_box_at(Vec3::new(-0.6, 0.0, 0.0))));
    }

    #[test]
    fn test_frustum_keeps_visible_box() {
        assert!(test_frustum().intersects(&unit_box_at(Vec3::ZERO)));
    }

    #[test]
    fn test_frustum_culls_box_behind_camera() {
        assert!(!test_frustum().intersects(&unit_box_at(Vec3::new(0.0, 0.0, 8.0))));
    }

    #[test]
    fn test_frustum_culls_box_beyond_far_plane() {
        assert!(!test_frustum().intersects(&unit_box_at(Vec3::new(0.0, 0.0, -60.0))));
    }

    #[test]
    fn test_frustum_culls_box_to_the_side() {
        // At distance 5 the 90 degree frustum spans x in [-5, 5].
        assert!(!test_frustum().intersects(&unit_box_at(Vec3::new(7.0, 0.0, 0.0))));
        assert!(test_frustum().intersects(&unit_box_at(Vec3::new(5.2, 0.0, 0.0))));
    }

    #[test]
    fn test_plane_order() {
        let frustum = test_frustum();
        // Camera looks down -Z, so the near plane faces -Z.
        assert!(frustum.plane(FrustumPlane::Near).normal.z < -0.99);
        assert!(frustum.plane(FrustumPlane::Far).normal.z > 0.99);
        assert!(frustum.plane(FrustumPlane::Left).normal.x > 0.0);
        assert!(frustum.plane(FrustumPlane::Right).normal.x < 0.0);
    }

    #[test]
    fn test_contains_point() {
        let frustum = test_frustum();
        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 6.0)));
    }
}
