use glam::{Mat4, Vec3, Vec4};

use crate::FRUSTUM_PLANE_COUNT;

/// Free-flying camera. Right handed, looking down -Z at zero yaw and pitch.
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y: f32,
    pub z_near: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            fov_y: 60f32.to_radians(),
            z_near: 0.01,
        }
    }
}

impl Camera {
    pub fn forward(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(sy * cp, sp, -cy * cp)
    }

    pub fn look_at(&mut self, target: Vec3) {
        let dir = (target - self.position).normalize_or_zero();
        if dir == Vec3::ZERO {
            return;
        }
        self.pitch = dir.y.clamp(-1.0, 1.0).asin();
        self.yaw = dir.x.atan2(-dir.z);
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// Infinite reverse-Z projection: depth is 1 at the near plane and
    /// approaches 0 at infinity.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_infinite_reverse_rh(self.fov_y, aspect, self.z_near)
    }
}

/// World-space planes `(n, d)` with unit `n` pointing inwards, extracted
/// from a view-projection matrix: left, right, bottom, top, near.
pub fn frustum_planes(view_projection: &Mat4) -> [Vec4; FRUSTUM_PLANE_COUNT] {
    let m = view_projection.transpose();
    let (r0, r1, r2, r3) = (m.x_axis, m.y_axis, m.z_axis, m.w_axis);
    [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 - r2].map(|p| {
        let len = p.truncate().length();
        if len > 0.0 { p / len } else { p }
    })
}

#[derive(Clone, Copy, Debug)]
pub struct CameraState {
    pub view: Mat4,
    pub position: Vec3,
    pub frustum_planes: [Vec4; FRUSTUM_PLANE_COUNT],
}

impl CameraState {
    fn capture(camera: &Camera, projection: &Mat4) -> Self {
        let view = camera.view();
        Self { view, position: camera.position, frustum_planes: frustum_planes(&(*projection * view)) }
    }
}

/// The live camera plus the snapshot culling runs against. The snapshot
/// follows the live camera except while frozen.
#[derive(Clone, Debug)]
pub struct FrameCamera {
    pub live: CameraState,
    pub frozen: CameraState,
    pub projection: Mat4,
}

impl FrameCamera {
    pub fn new(camera: &Camera, aspect: f32) -> Self {
        let projection = camera.projection(aspect);
        let live = CameraState::capture(camera, &projection);
        Self { live, frozen: live, projection }
    }

    pub fn update(&mut self, camera: &Camera, aspect: f32, freeze: bool) {
        self.projection = camera.projection(aspect);
        self.live = CameraState::capture(camera, &self.projection);
        if !freeze {
            self.frozen = self.live;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inside(planes: &[Vec4], p: Vec3) -> bool {
        planes.iter().all(|plane| plane.truncate().dot(p) + plane.w >= 0.0)
    }

    #[test]
    fn planes_bound_the_view() {
        let camera = Camera::default();
        let state = FrameCamera::new(&camera, 16.0 / 9.0).live;
        assert!(inside(&state.frustum_planes, Vec3::new(0.0, 0.0, -5.0)));
        assert!(inside(&state.frustum_planes, Vec3::new(0.0, 0.0, -1.0e6)));
        assert!(!inside(&state.frustum_planes, Vec3::new(0.0, 0.0, 5.0)));
        assert!(!inside(&state.frustum_planes, Vec3::new(100.0, 0.0, -5.0)));
        assert!(!inside(&state.frustum_planes, Vec3::new(0.0, -100.0, -5.0)));
        // Just in front of the camera but before the near plane.
        assert!(!inside(&state.frustum_planes, Vec3::new(0.0, 0.0, -0.001)));
    }

    #[test]
    fn look_at_points_forward() {
        let mut camera = Camera { position: Vec3::new(10.0, 5.0, 0.0), ..Default::default() };
        camera.look_at(Vec3::ZERO);
        let expected = (Vec3::ZERO - camera.position).normalize();
        assert!(camera.forward().distance(expected) < 1e-5);
    }

    #[test]
    fn frozen_snapshot_holds_while_frozen() {
        let mut camera = Camera::default();
        let mut frame = FrameCamera::new(&camera, 1.0);
        camera.position = Vec3::new(3.0, 0.0, 0.0);
        frame.update(&camera, 1.0, true);
        assert_eq!(frame.frozen.position, Vec3::ZERO);
        assert_eq!(frame.live.position, camera.position);
        frame.update(&camera, 1.0, false);
        assert_eq!(frame.frozen.position, camera.position);
    }
}
