//! 场景光源
//!
//! 一个方向光、最多四个点光源和一个聚光灯。光源不写入场景文件。

use crate::core::math::Vector3;
use crate::renderer::constant_buffer::{
    DirectionalLightConstants, LightConstants, PointLightConstants, SpotLightConstants,
    MAX_POINT_LIGHTS,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vector3,
    pub diffuse: Vector3,
    pub strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vector3,
    pub diffuse: Vector3,
    pub strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub position: Vector3,
    pub direction: Vector3,
    pub diffuse: Vector3,
    pub strength: f32,
    /// 内锥角余弦
    pub inner_cutoff: f32,
    /// 外锥角余弦
    pub outer_cutoff: f32,
}

/// 光源计数，与逐帧常量中的三个计数字段对应
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightCounts {
    pub point: i32,
    pub directional: i32,
    pub spot: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightSet {
    pub directional: Option<DirectionalLight>,
    point_lights: Vec<PointLight>,
    pub spot: Option<SpotLight>,
}

impl Default for LightSet {
    fn default() -> Self {
        Self {
            directional: Some(DirectionalLight {
                direction: Vector3::new(0.3, -1.0, 0.4).normalize(),
                diffuse: Vector3::new(1.0, 0.96, 0.9),
                strength: 1.0,
            }),
            point_lights: vec![PointLight {
                position: Vector3::new(0.0, 3.0, -2.0),
                diffuse: Vector3::new(1.0, 0.6, 0.3),
                strength: 4.0,
            }],
            spot: None,
        }
    }
}

impl LightSet {
    pub fn empty() -> Self {
        Self {
            directional: None,
            point_lights: Vec::new(),
            spot: None,
        }
    }

    /// 添加点光源；槽位已满时返回 `false`
    pub fn add_point_light(&mut self, light: PointLight) -> bool {
        if self.point_lights.len() >= MAX_POINT_LIGHTS {
            tracing::warn!(max = MAX_POINT_LIGHTS, "Point light ignored, all slots in use");
            return false;
        }
        self.point_lights.push(light);
        true
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.point_lights
    }

    pub fn counts(&self) -> LightCounts {
        LightCounts {
            point: self.point_lights.len() as i32,
            directional: self.directional.is_some() as i32,
            spot: self.spot.is_some() as i32,
        }
    }

    pub fn to_constants(&self) -> LightConstants {
        let mut constants = LightConstants::default();

        for (slot, light) in constants.point_lights.iter_mut().zip(&self.point_lights) {
            *slot = PointLightConstants {
                position: light.position.into(),
                strength: light.strength,
                diffuse: light.diffuse.into(),
                _pad: 0.0,
            };
        }

        if let Some(light) = &self.directional {
            constants.directional = DirectionalLightConstants {
                direction: light.direction.into(),
                _pad: 0.0,
                diffuse: light.diffuse.into(),
                strength: light.strength,
            };
        }

        if let Some(light) = &self.spot {
            constants.spot = SpotLightConstants {
                position: light.position.into(),
                inner_cutoff: light.inner_cutoff,
                direction: light.direction.into(),
                outer_cutoff: light.outer_cutoff,
                diffuse: light.diffuse.into(),
                strength: light.strength,
            };
        }

        constants
    }
}
