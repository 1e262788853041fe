//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "Insight"
//!
//! [graphics]
//! backend = "headless"   # 或 "dx12"
//! vsync = true
//! frames_in_flight = 3
//! feature_level = "12_0"
//!
//! [logging]
//! level = "info"
//! file_output = false
//!
//! [scene]
//! path = "assets/scenes/demo.json"
//!
//! [runtime]
//! threading = "single"   # 或 "render_thread"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::gfx::adapter::FeatureLevel;

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 启动场景
    #[serde(default)]
    pub scene: SceneConfig,

    /// 线程模型与 headless 运行参数
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步；关闭时以 sync interval 0 呈现
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 帧槽数量（2..=4）
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: u32,

    /// 设备创建所需的最低特性等级
    #[serde(default = "default_feature_level")]
    pub feature_level: FeatureLevel,

    /// 没有硬件适配器时是否接受软件适配器（WARP）
    #[serde(default)]
    pub allow_software_adapter: bool,

    /// 启用 D3D12 调试层
    #[serde(default)]
    pub debug_layer: bool,

    /// 每个帧槽初始的逐对象常量容量
    #[serde(default = "default_max_objects")]
    pub max_objects: u32,

    /// 着色器可见 CBV/SRV/UAV 堆的初始容量
    #[serde(default = "default_shader_heap_capacity")]
    pub shader_heap_capacity: u32,

    /// 每个帧槽的叠加层（UI / 编辑器）上传环大小，单位字节
    #[serde(default = "default_overlay_buffer_size")]
    pub overlay_buffer_size: u64,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 模拟 GPU 时间线的参考设备
    Headless,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 场景配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneConfig {
    /// 启动时加载的场景文件；为空时使用内置演示场景
    #[serde(default)]
    pub path: Option<String>,
}

/// 线程模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// 更新与渲染在同一个循环中
    Single,
    /// 渲染器运行在独立线程上
    RenderThread,
}

/// 运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_threading")]
    pub threading: ThreadingMode,

    /// `--headless` 模式下渲染的帧数
    #[serde(default = "default_headless_frames")]
    pub headless_frames: u32,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "Insight".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Headless
    }
}
fn default_vsync() -> bool { true }
fn default_frames_in_flight() -> u32 { 3 }
fn default_feature_level() -> FeatureLevel { FeatureLevel::Level12_0 }
fn default_max_objects() -> u32 { 64 }
fn default_shader_heap_capacity() -> u32 { 256 }
fn default_overlay_buffer_size() -> u64 { 1024 * 1024 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "logs/insight.log".to_string() }
fn default_threading() -> ThreadingMode { ThreadingMode::Single }
fn default_headless_frames() -> u32 { 120 }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            frames_in_flight: default_frames_in_flight(),
            feature_level: default_feature_level(),
            allow_software_adapter: false,
            debug_layer: false,
            max_objects: default_max_objects(),
            shader_heap_capacity: default_shader_heap_capacity(),
            overlay_buffer_size: default_overlay_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threading: default_threading(),
            headless_frames: default_headless_frames(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                // 日志系统此时尚未初始化，这里的事件只在测试订阅者下可见
                tracing::debug!(error = %err, "Falling back to default configuration");
                Self::default()
            }
        }
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--headless`: 选择后端
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    /// - `--scene <path>`: 启动场景
    /// - `--frames <n>`: headless 模式渲染帧数
    /// - `--render-thread`: 使用独立渲染线程
    /// - `--no-vsync`: 关闭垂直同步
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        if args.iter().any(|a| a == "--render-thread") {
            self.runtime.threading = ThreadingMode::RenderThread;
        }

        if args.iter().any(|a| a == "--no-vsync") {
            self.graphics.vsync = false;
        }

        if let Some(width) = value_after(&args, "--width").and_then(|v| v.parse().ok()) {
            self.window.width = width;
        }

        if let Some(height) = value_after(&args, "--height").and_then(|v| v.parse().ok()) {
            self.window.height = height;
        }

        if let Some(frames) = value_after(&args, "--frames").and_then(|v| v.parse().ok()) {
            self.runtime.headless_frames = frames;
        }

        if let Some(scene) = value_after(&args, "--scene") {
            self.scene.path = Some(scene.to_string());
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid(
                "window.width/height",
                "Window dimensions must be greater than 0",
            ));
        }

        if !(2..=4).contains(&self.graphics.frames_in_flight) {
            return Err(invalid(
                "graphics.frames_in_flight",
                "Frames in flight must be between 2 and 4",
            ));
        }

        if self.graphics.max_objects == 0 {
            return Err(invalid(
                "graphics.max_objects",
                "Per-frame object capacity must be greater than 0",
            ));
        }

        // 每个帧槽至少需要一个逐对象 CBV
        let required = self.graphics.frames_in_flight * self.graphics.max_objects;
        if self.graphics.shader_heap_capacity < required {
            return Err(invalid(
                "graphics.shader_heap_capacity",
                &format!(
                    "Capacity {} is smaller than frames_in_flight * max_objects ({})",
                    self.graphics.shader_heap_capacity, required
                ),
            ));
        }

        if self.graphics.overlay_buffer_size < 64 * 1024 {
            return Err(invalid(
                "graphics.overlay_buffer_size",
                "Overlay buffer must be at least 64 KiB",
            ));
        }

        Ok(())
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1).map(String::as_str)
}

fn invalid(field: &str, reason: &str) -> super::error::EngineError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Headless => "Headless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.frames_in_flight = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.shader_heap_capacity = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args([
            "insight_render",
            "--headless",
            "--width",
            "640",
            "--frames",
            "7",
            "--scene",
            "level.json",
            "--render-thread",
        ]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.runtime.headless_frames, 7);
        assert_eq!(config.scene.path.as_deref(), Some("level.json"));
        assert_eq!(config.runtime.threading, ThreadingMode::RenderThread);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            backend = "headless"
            frames_in_flight = 2
            feature_level = "11_1"

            [runtime]
            threading = "render_thread"
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.graphics.feature_level, FeatureLevel::Level11_1);
        assert_eq!(config.runtime.threading, ThreadingMode::RenderThread);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Config::from_file_or_default("does/not/exist.toml");
        assert_eq!(config.window.title, "Insight");
    }
}
