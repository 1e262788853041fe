//! 适配器选择
//!
//! 在枚举到的适配器中挑选用于创建设备的那一个：
//! 优先支持所需特性等级、显存最大的硬件适配器；
//! 只有在没有合格硬件适配器且允许时才退回软件适配器。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{GraphicsError, Result};

/// Direct3D 特性等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    #[serde(rename = "11_0")]
    Level11_0,
    #[serde(rename = "11_1")]
    Level11_1,
    #[serde(rename = "12_0")]
    Level12_0,
    #[serde(rename = "12_1")]
    Level12_1,
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
        };
        f.write_str(text)
    }
}

/// 适配器描述
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    /// 专用显存，字节
    pub dedicated_video_memory: u64,
    pub is_software: bool,
    /// 适配器支持的最高特性等级
    pub max_feature_level: FeatureLevel,
}

impl AdapterInfo {
    pub fn supports(&self, level: FeatureLevel) -> bool {
        self.max_feature_level >= level
    }
}

/// 选择适配器，返回其在 `adapters` 中的下标
pub fn select_adapter(
    adapters: &[AdapterInfo],
    required: FeatureLevel,
    allow_software: bool,
) -> Result<usize> {
    let best = |software: bool| {
        adapters
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_software == software && a.supports(required))
            .max_by_key(|(_, a)| a.dedicated_video_memory)
            .map(|(i, _)| i)
    };

    if let Some(index) = best(false) {
        return Ok(index);
    }

    if allow_software {
        if let Some(index) = best(true) {
            tracing::warn!(
                adapter = %adapters[index].name,
                "No hardware adapter qualifies, falling back to software adapter"
            );
            return Ok(index);
        }
    }

    Err(GraphicsError::NoSuitableAdapter {
        required: required.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, memory_mb: u64, software: bool, level: FeatureLevel) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            vendor_id: 0,
            device_id: 0,
            dedicated_video_memory: memory_mb * 1024 * 1024,
            is_software: software,
            max_feature_level: level,
        }
    }

    #[test]
    fn picks_largest_qualifying_hardware_adapter() {
        let adapters = vec![
            adapter("integrated", 512, false, FeatureLevel::Level12_0),
            adapter("warp", 0, true, FeatureLevel::Level12_1),
            adapter("discrete", 8192, false, FeatureLevel::Level12_1),
            adapter("old", 16384, false, FeatureLevel::Level11_0),
        ];
        assert_eq!(select_adapter(&adapters, FeatureLevel::Level12_0, true).unwrap(), 2);
    }

    #[test]
    fn software_only_when_allowed() {
        let adapters = vec![adapter("warp", 0, true, FeatureLevel::Level12_1)];
        assert_eq!(select_adapter(&adapters, FeatureLevel::Level12_0, true).unwrap(), 0);
        assert!(select_adapter(&adapters, FeatureLevel::Level12_0, false).is_err());
    }

    #[test]
    fn no_candidate_is_reported() {
        let adapters = vec![adapter("old", 1024, false, FeatureLevel::Level11_0)];
        let err = select_adapter(&adapters, FeatureLevel::Level12_0, false).unwrap_err();
        assert!(err.to_string().contains("12_0"));
    }
}
