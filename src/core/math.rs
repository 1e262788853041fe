//! 数学库模块
//!
//! 基于 `nalgebra` 的类型别名与渲染常用的矩阵构造。
//! 所有矩阵遵循左手坐标系、深度范围 [0, 1]，与 D3D12 的裁剪空间一致。

pub use nalgebra::{Matrix4 as Mat4, Point3, UnitQuaternion, Vector2 as Vec2, Vector3 as Vec3};

pub type Vector2 = Vec2<f32>;
pub type Vector3 = Vec3<f32>;
pub type Matrix4 = Mat4<f32>;
pub type Quaternion = UnitQuaternion<f32>;

/// 颜色类型（RGBA，范围 0.0-1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// 打包为 RGBA8（R 在最低字节），叠加层顶点使用该格式
    pub fn to_rgba8(self) -> u32 {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        q(self.r) | (q(self.g) << 8) | (q(self.b) << 16) | (q(self.a) << 24)
    }

    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const CORNFLOWER: Color = Color::new(0.392, 0.584, 0.929, 1.0);
}

/// 常用数学常量
pub mod constants {
    pub const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;
    pub const EPSILON: f32 = 1e-6;
}

/// 矩阵构造辅助函数
pub mod matrix {
    use super::{Matrix4, Vector3};

    /// 由平移、欧拉角（弧度，按 X → Y → Z 顺序）和缩放构造世界矩阵
    pub fn trs(position: &Vector3, rotation_rad: &Vector3, scale: &Vector3) -> Matrix4 {
        let rotation = nalgebra::Rotation3::from_euler_angles(
            rotation_rad.x,
            rotation_rad.y,
            rotation_rad.z,
        );
        Matrix4::new_translation(position)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(scale)
    }

    /// 左手坐标系的观察矩阵
    pub fn look_to_lh(eye: &Vector3, forward: &Vector3, up: &Vector3) -> Matrix4 {
        let z = forward.normalize();
        let x = up.cross(&z).normalize();
        let y = z.cross(&x);
        Matrix4::new(
            x.x, x.y, x.z, -x.dot(eye),
            y.x, y.y, y.z, -y.dot(eye),
            z.x, z.y, z.z, -z.dot(eye),
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// 左手坐标系透视投影，深度映射到 [0, 1]
    ///
    /// `nalgebra::Matrix4::new_perspective` 是右手、深度 [-1, 1] 的 OpenGL 约定，
    /// 不能直接用于 D3D。
    pub fn perspective_lh(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4 {
        let h = 1.0 / (fov_y * 0.5).tan();
        let w = h / aspect;
        let range = far / (far - near);
        Matrix4::new(
            w, 0.0, 0.0, 0.0,
            0.0, h, 0.0, 0.0,
            0.0, 0.0, range, -range * near,
            0.0, 0.0, 1.0, 0.0,
        )
    }
}
