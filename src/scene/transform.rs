//! Transform
//!
//! 管理实体的位置、旋转（欧拉角，度数）和缩放。

use crate::core::math::{constants::DEG_TO_RAD, matrix, Matrix4, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vector3,
    /// 欧拉角（度数）
    pub rotation: Vector3,
    pub scale: Vector3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    pub fn from_position(position: Vector3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, degrees: Vector3) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_scale(mut self, scale: Vector3) -> Self {
        self.scale = scale;
        self
    }

    /// 世界矩阵：缩放 → 旋转 → 平移
    pub fn world_matrix(&self) -> Matrix4 {
        matrix::trs(&self.position, &(self.rotation * DEG_TO_RAD), &self.scale)
    }
}
