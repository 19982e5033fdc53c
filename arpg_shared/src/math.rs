//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.
//!
//! Conventions: +Y is up, rotations are Euler angles in degrees and yaw is the
//! rotation about +Y.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);
    pub const UP: Self = Self::new(0.0, 1.0, 0.0);
    pub const DOWN: Self = Self::new(0.0, -1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn distance_sq(self, other: Self) -> f32 {
        (other - self).len_sq()
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Returns the unit vector, or zero for a zero-length input.
    pub fn normalized(self) -> Self {
        let len = self.len();
        if len <= f32::EPSILON {
            Self::ZERO
        } else {
            self * (1.0 / len)
        }
    }

    /// Removes the component along `normal` (assumed unit length).
    pub fn project_on_plane(self, normal: Self) -> Self {
        self - normal * self.dot(normal)
    }

    /// Rotates the vector about +Y by `yaw_deg` degrees.
    pub fn rotate_yaw(self, yaw_deg: f32) -> Self {
        let (s, c) = yaw_deg.to_radians().sin_cos();
        Self::new(self.x * c + self.z * s, self.y, -self.x * s + self.z * c)
    }

    pub fn with_y(self, y: f32) -> Self {
        Self::new(self.x, y, self.z)
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }

    /// Per-axis shortest-path interpolation of Euler angles in degrees.
    pub fn lerp_angles(self, to: Self, t: f32) -> Self {
        Self::new(
            lerp_angle(self.x, to.x, t),
            lerp_angle(self.y, to.y, t),
            lerp_angle(self.z, to.z, t),
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// 4D vector (colours and other packed quadruples).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vec4 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Add for Vec4 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z, self.w + rhs.w)
    }
}

impl Sub for Vec4 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z, self.w - rhs.w)
    }
}

/// Wraps an angle in degrees into `(-180, 180]`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let a = angle.rem_euclid(360.0);
    if a > 180.0 {
        a - 360.0
    } else {
        a
    }
}

/// Interpolates between two angles (degrees) along the shortest arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    from + wrap_degrees(to - from) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn lerp_angle_crosses_zero_the_short_way() {
        let mid = lerp_angle(350.0, 10.0, 0.5);
        assert!((wrap_degrees(mid) - 0.0).abs() < 1e-4, "got {mid}");

        let quarter = lerp_angle(10.0, 350.0, 0.25);
        assert!((quarter - 5.0).abs() < 1e-4, "got {quarter}");
    }

    #[test]
    fn project_on_plane_drops_normal_component() {
        let v = Vec3::new(3.0, -2.0, 1.0);
        let p = v.project_on_plane(Vec3::UP);
        assert_eq!(p, Vec3::new(3.0, 0.0, 1.0));
    }

    #[test]
    fn rotate_yaw_quarter_turn() {
        let fwd = Vec3::new(0.0, 0.0, 1.0).rotate_yaw(90.0);
        assert!((fwd.x - 1.0).abs() < 1e-5);
        assert!(fwd.z.abs() < 1e-5);
    }
}
