//! 核心功能模块
//!
//! 本模块提供了渲染引擎的基础功能：数学库、日志系统、配置管理和错误处理。
//! 这些模块独立于具体的图形 API。
//!
//! - `math`：nalgebra 类型别名与 D3D 约定的矩阵构造
//! - `log`：tracing 日志初始化
//! - `config`：TOML 配置加载与命令行覆盖
//! - `error`：统一错误类型
//! - `input`：键鼠状态与相机控制

pub mod config;
pub mod error;
pub mod input;
pub mod log;
pub mod math;

pub use config::Config;
pub use error::{EngineError, Result};
pub use math::{Color, Matrix4, Vector3};
