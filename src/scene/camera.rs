//! 相机
//!
//! 第一人称相机：位置 + 俯仰 / 偏航（度数）。
//! 视图矩阵为左手坐标系，投影矩阵把深度映射到 [0, 1]。

use crate::core::math::{constants::DEG_TO_RAD, matrix, Matrix4, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vector3,
    /// 俯仰角（度数），正值向下看
    pub pitch: f32,
    /// 偏航角（度数），0 朝向 +Z
    pub yaw: f32,
    /// 垂直视场角（度数）
    pub fov_y: f32,
    pub near_z: f32,
    pub far_z: f32,
    pub exposure: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vector3::new(0.0, 2.0, -8.0),
            pitch: 10.0,
            yaw: 0.0,
            fov_y: 60.0,
            near_z: 0.1,
            far_z: 1000.0,
            exposure: 1.0,
        }
    }
}

impl Camera {
    pub fn forward(&self) -> Vector3 {
        let pitch = self.pitch * DEG_TO_RAD;
        let yaw = self.yaw * DEG_TO_RAD;
        Vector3::new(yaw.sin() * pitch.cos(), -pitch.sin(), yaw.cos() * pitch.cos())
    }

    pub fn right(&self) -> Vector3 {
        Vector3::y().cross(&self.forward()).normalize()
    }

    /// 沿视线方向移动
    pub fn walk(&mut self, distance: f32) {
        self.position += self.forward() * distance;
    }

    /// 沿右方向平移
    pub fn strafe(&mut self, distance: f32) {
        self.position += self.right() * distance;
    }

    /// 俯仰角限制在 ±89°，避免与上方向共线
    pub fn rotate(&mut self, delta_pitch: f32, delta_yaw: f32) {
        self.pitch = (self.pitch + delta_pitch).clamp(-89.0, 89.0);
        self.yaw = (self.yaw + delta_yaw).rem_euclid(360.0);
    }

    pub fn view_matrix(&self) -> Matrix4 {
        matrix::look_to_lh(&self.position, &self.forward(), &Vector3::y())
    }

    pub fn projection_matrix(&self, aspect: f32) -> Matrix4 {
        matrix::perspective_lh(self.fov_y * DEG_TO_RAD, aspect.max(1e-3), self.near_z, self.far_z)
    }

    /// 从屏幕像素发出的拾取射线，返回 (起点, 单位方向)
    pub fn screen_ray(&self, x: f32, y: f32, width: u32, height: u32) -> (Vector3, Vector3) {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let ndc_x = 2.0 * x / w - 1.0;
        let ndc_y = 1.0 - 2.0 * y / h;
        let tan_half = (self.fov_y * DEG_TO_RAD * 0.5).tan();

        let forward = self.forward();
        let right = self.right();
        let up = forward.cross(&right);
        let direction = forward + right * (ndc_x * tan_half * w / h) + up * (ndc_y * tan_half);
        (self.position, direction.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_default_axes() {
        let mut camera = Camera::default();
        camera.pitch = 0.0;
        assert_relative_eq!(camera.forward(), Vector3::z(), epsilon = 1e-6);
        assert_relative_eq!(camera.right(), Vector3::x(), epsilon = 1e-6);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate(200.0, 0.0);
        assert_eq!(camera.pitch, 89.0);
        camera.rotate(0.0, -30.0);
        assert_relative_eq!(camera.yaw, 330.0);
    }

    #[test]
    fn test_screen_ray_through_center_is_forward() {
        let camera = Camera::default();
        let (origin, dir) = camera.screen_ray(640.0, 360.0, 1280, 720);
        assert_eq!(origin, camera.position);
        assert_relative_eq!(dir, camera.forward(), epsilon = 1e-5);

        let (_, left) = camera.screen_ray(0.0, 360.0, 1280, 720);
        assert!(left.dot(&camera.right()) < 0.0);
    }

    #[test]
    fn test_point_ahead_has_positive_view_depth() {
        let camera = Camera::default();
        let ahead = camera.position + camera.forward() * 5.0;
        let p = camera
            .view_matrix()
            .transform_point(&crate::core::math::Point3::from(ahead));
        assert_relative_eq!(p.z, 5.0, epsilon = 1e-4);
    }
}
