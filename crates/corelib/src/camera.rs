use crate::{Mat4, Vec3, Vec4};

/// Off-center perspective volume (OpenGL `frustumM` semantics).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl Frustum {
    pub const fn new(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
            near,
            far,
        }
    }

    /// Column-major projection with clip z in [-w, w].
    pub fn matrix(&self) -> Mat4 {
        let r_width = 1.0 / (self.right - self.left);
        let r_height = 1.0 / (self.top - self.bottom);
        let r_depth = 1.0 / (self.near - self.far);

        let x = 2.0 * self.near * r_width;
        let y = 2.0 * self.near * r_height;
        let a = (self.right + self.left) * r_width;
        let b = (self.top + self.bottom) * r_height;
        let c = (self.far + self.near) * r_depth;
        let d = 2.0 * self.far * self.near * r_depth;

        Mat4::from_cols(
            Vec4::new(x, 0.0, 0.0, 0.0),
            Vec4::new(0.0, y, 0.0, 0.0),
            Vec4::new(a, b, c, -1.0),
            Vec4::new(0.0, 0.0, d, 0.0),
        )
    }

    /// Vertical field of view (radians) implied by `top`, `bottom` and `near`.
    pub fn fov_y(&self) -> f32 {
        (self.top / self.near).atan() - (self.bottom / self.near).atan()
    }
}

impl Default for Frustum {
    fn default() -> Self {
        Self::new(-1.0, 1.0, -1.0, 1.0, 2.0, 9.0)
    }
}

/// Fixed look-at camera (right-handed) with a frustum projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub frustum: Frustum,
}

impl Camera {
    pub fn new(eye: Vec3, target: Vec3, up: Vec3, frustum: Frustum) -> Self {
        Self {
            eye,
            target,
            up,
            frustum,
        }
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// NOTE: OpenGL-style projection (z in [-1,1]). The shipped vertex shader
    /// remaps depth for wgpu.
    #[inline]
    pub fn proj(&self) -> Mat4 {
        self.frustum.matrix()
    }

    #[inline]
    pub fn proj_view(&self) -> Mat4 {
        self.proj() * self.view()
    }

    #[inline]
    pub fn with_eye(mut self, eye: Vec3) -> Self {
        self.eye = eye;
        self
    }

    #[inline]
    pub fn with_target(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(
            Vec3::new(0.0, 3.0, -4.0),
            Vec3::ZERO,
            Vec3::Y,
            Frustum::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_matches_gl_layout() {
        let m = Frustum::default().matrix().to_cols_array();
        assert!((m[0] - 2.0).abs() < 1e-6);
        assert!((m[5] - 2.0).abs() < 1e-6);
        assert!((m[10] - (-11.0 / 7.0)).abs() < 1e-6);
        assert!((m[11] + 1.0).abs() < 1e-6);
        assert!((m[14] - (-36.0 / 7.0)).abs() < 1e-5);
        assert_eq!(m[15], 0.0);
    }

    #[test]
    fn near_and_far_planes_map_to_clip_bounds() {
        let proj = Frustum::default().matrix();
        let near = proj * Vec4::new(0.0, 0.0, -2.0, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -9.0, 1.0);
        assert!((near.z / near.w + 1.0).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn default_camera_keeps_origin_inside_volume() {
        let pv = Camera::default().proj_view();
        let clip = pv * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0 && ndc.z.abs() <= 1.0);
        assert!(pv.to_cols_array().iter().all(|f| f.is_finite()));
    }

    #[test]
    fn fov_follows_extent() {
        let fov = Frustum::default().fov_y();
        assert!((fov - 2.0 * 0.5f32.atan()).abs() < 1e-6);
    }
}
