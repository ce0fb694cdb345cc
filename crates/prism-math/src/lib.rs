// SPDX-License-Identifier: CEPL-1.0
//! Small linear-algebra layer on top of glam: TRS transforms, bounding boxes,
//! projection and the clip-space visibility test used for culling.

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

/// Local transform of a scene node, composed as `T * R * S`.
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
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Inverse of `to_mat4`, built from the parts instead of a general 4x4 inverse.
    pub fn to_inverse_mat4(&self) -> Mat4 {
        let inv_scale = Vec3::new(
            recip_or_zero(self.scale.x),
            recip_or_zero(self.scale.y),
            recip_or_zero(self.scale.z),
        );
        Mat4::from_scale(inv_scale)
            * Mat4::from_quat(self.rotation.conjugate())
            * Mat4::from_translation(-self.translation)
    }
}

fn recip_or_zero(v: f32) -> f32 {
    if v == 0.0 {
        0.0
    } else {
        1.0 / v
    }
}

/// Inverse-transpose of the upper 3x3, widened back to a Mat4 for push constants.
pub fn normal_matrix(world: &Mat4) -> Mat4 {
    let m = Mat3::from_mat4(*world);
    if m.determinant().abs() <= f32::EPSILON {
        return Mat4::IDENTITY;
    }
    Mat4::from_mat3(m.inverse().transpose())
}

/// Axis-aligned box in object space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box; extending it with any point yields that point.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        points.into_iter().fold(Self::EMPTY, |mut b, p| {
            b.extend(p);
            b
        })
    }

    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

/// Perspective parameters. `vfov` is in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Perspective {
    pub aspect: f32,
    pub vfov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Perspective {
    fn default() -> Self {
        Self {
            aspect: 800.0 / 600.0,
            vfov: 45f32.to_radians(),
            near: 0.1,
            far: 10.0,
        }
    }
}

impl Perspective {
    /// Right-handed projection with Vulkan's `[0, 1]` depth range.
    /// Y is not flipped here; the backend uses a negative-height viewport.
    pub fn matrix(&self) -> Mat4 {
        if self.far.is_finite() {
            Mat4::perspective_rh(self.vfov, self.aspect, self.near, self.far)
        } else {
            Mat4::perspective_infinite_rh(self.vfov, self.aspect, self.near)
        }
    }
}

/// Returns false when every corner of `bounds`, transformed by `clip_from_object`,
/// lies outside the same clip plane. Conservative: boxes straddling a frustum
/// corner may pass.
pub fn aabb_in_frustum(clip_from_object: &Mat4, bounds: &Aabb) -> bool {
    if bounds.is_empty() {
        return false;
    }
    let clip = bounds
        .corners()
        .map(|c| *clip_from_object * c.extend(1.0));

    // Planes in homogeneous form so points behind the eye (w < 0) classify correctly.
    let outside: [fn(&Vec4) -> bool; 6] = [
        |p| p.x < -p.w,
        |p| p.x > p.w,
        |p| p.y < -p.w,
        |p| p.y > p.w,
        |p| p.z < 0.0,
        |p| p.z > p.w,
    ];
    !outside.iter().any(|test| clip.iter().all(test))
}

/// Rotates `dir` by `yaw` around `up` and by `pitch` around the camera right axis.
/// The pitch is rejected in full (returned unchanged on that axis) when the result
/// would come within `pole_margin` radians of `up` or `-up`.
pub fn orbit_direction(dir: Vec3, up: Vec3, yaw: f32, pitch: f32, pole_margin: f32) -> Vec3 {
    let up = up.normalize_or_zero();
    let dir = dir.normalize_or_zero();
    if up == Vec3::ZERO || dir == Vec3::ZERO {
        return dir;
    }

    let yawed = Quat::from_axis_angle(up, yaw) * dir;
    let right = yawed.cross(up).normalize_or_zero();
    if right == Vec3::ZERO || pitch == 0.0 {
        return yawed;
    }

    let pitched = Quat::from_axis_angle(right, pitch) * yawed;
    let angle_to_up = pitched.dot(up).clamp(-1.0, 1.0).acos();
    if angle_to_up < pole_margin || angle_to_up > std::f32::consts::PI - pole_margin {
        yawed
    } else {
        pitched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-4
    }

    #[test]
    fn transform_composes_trs() {
        let t = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            scale: Vec3::splat(2.0),
        };
        let p = t.to_mat4().transform_point3(Vec3::X);
        assert!(approx(p, Vec3::new(1.0, 4.0, 3.0)));

        let back = t.to_inverse_mat4().transform_point3(p);
        assert!(approx(back, Vec3::X));
    }

    #[test]
    fn normal_matrix_undoes_nonuniform_scale() {
        let world = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(&world).transform_vector3(Vec3::X);
        assert!(approx(n, Vec3::new(0.5, 0.0, 0.0)));
    }

    #[test]
    fn aabb_from_points_and_corners() {
        let b = Aabb::from_points([Vec3::new(-1.0, 0.0, 2.0), Vec3::new(1.0, 3.0, -2.0)]);
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, -2.0));
        assert_eq!(b.max, Vec3::new(1.0, 3.0, 2.0));
        assert!(b.corners().contains(&Vec3::new(1.0, 0.0, -2.0)));
        assert!(Aabb::EMPTY.is_empty());
    }

    #[test]
    fn frustum_keeps_visible_and_rejects_behind() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let clip = Perspective::default().matrix() * view;
        let unit = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));

        assert!(aabb_in_frustum(&clip, &unit));

        let behind = clip * Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0));
        assert!(!aabb_in_frustum(&behind, &unit));

        let beyond_far = clip * Mat4::from_translation(Vec3::new(0.0, 0.0, -20.0));
        assert!(!aabb_in_frustum(&beyond_far, &unit));

        let far_left = clip * Mat4::from_translation(Vec3::new(-50.0, 0.0, 0.0));
        assert!(!aabb_in_frustum(&far_left, &unit));
    }

    #[test]
    fn orbit_rejects_pitch_near_pole() {
        let dir = Vec3::X;
        let up = Vec3::Z;
        let margin = 10f32.to_radians();

        let small = orbit_direction(dir, up, 0.0, 5f32.to_radians(), margin);
        assert!(!approx(small, dir));

        // 85 degrees up from the horizon lands within 10 degrees of +Z.
        let big = orbit_direction(dir, up, 0.0, 85f32.to_radians(), margin);
        assert!(approx(big, dir));

        let yaw_only = orbit_direction(dir, up, std::f32::consts::PI, 85f32.to_radians(), margin);
        assert!(approx(yaw_only, Vec3::new(-dir.x, -dir.y, dir.z)));
    }
}
