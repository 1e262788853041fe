//! Insight - 实时渲染核心
//!
//! DirectX 12 渲染核心，外加一个可在任何平台运行的 headless 参考后端。
//! 本库提供帧同步、描述符堆、常量上传和交换链管理，
//! 以及驱动它们的场景、编辑器和主循环。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（数学、日志、配置、错误处理、输入）
//! - `gfx`: 图形后端抽象层（`Backend` trait 族，DX12 与 headless 实现）
//! - `renderer`: 帧生命周期、同步、资源管理、渲染线程
//! - `scene`: 实体、组件、相机、光源与 JSON 场景文件
//! - `editor`: egui 编辑器叠加层
//! - `engine`: 把以上部分串成主循环
//!
//! # 使用示例
//!
//! ```no_run
//! use insight_render::core::config::{Config, GraphicsBackend};
//! use insight_render::engine::Engine;
//! use insight_render::gfx::SurfaceDesc;
//!
//! let mut config = Config::default();
//! config.graphics.backend = GraphicsBackend::Headless;
//! let surface = SurfaceDesc { width: 1280, height: 720, buffer_count: 3, window: None };
//!
//! let mut engine = Engine::new(config, surface)?;
//! for _ in 0..60 {
//!     engine.tick()?;
//! }
//! engine.shutdown()?;
//! # Ok::<(), insight_render::core::EngineError>(())
//! ```

pub mod core;
pub mod editor;
pub mod engine;
pub mod gfx;
pub mod renderer;
pub mod scene;
