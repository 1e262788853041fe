//! 渲染器模块
//!
//! 帧生命周期、GPU 同步和资源管理都实现为对 `gfx::Backend` 泛型的代码
//! （`FrameRenderer<B>`）。`Renderer` 在运行时按配置选择后端，
//! 以枚举分发到具体实例，避免动态分发。
//!
//! # 组成
//!
//! - `sync`：帧槽环与 fence 时间线
//! - `descriptor`：线性分配的描述符堆
//! - `constant_buffer`：常量布局与上传
//! - `swapchain`：交换链与渲染目标
//! - `pass`：通道顺序与叠加层接口
//! - `texture`：叠加层纹理的上传与退役
//! - `frame`：把以上部分组合成一帧
//! - `thread`：独立渲染线程

use crate::core::config::{GraphicsBackend, GraphicsConfig};
use crate::core::error::Result;
use crate::gfx::headless::{HeadlessBackend, HeadlessInstance};
use crate::gfx::{Instance, InstanceDesc, SurfaceDesc};
use crate::scene::SceneSnapshot;

#[cfg(target_os = "windows")]
use crate::gfx::dx12::{Dx12Backend, Dx12Instance};

pub mod constant_buffer;
pub mod descriptor;
pub mod frame;
pub mod pass;
pub mod stats;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod thread;
pub mod vertex;

pub use frame::FrameRenderer;
pub use pass::{OverlayMesh, OverlayPainter, RenderPass, PASS_ORDER};
pub use stats::FrameStats;
pub use texture::{OverlayTextureId, OverlayTextureUpdate};

/// 按后端分发的渲染器
pub enum Renderer {
    Headless(FrameRenderer<HeadlessBackend>),
    #[cfg(target_os = "windows")]
    Dx12(FrameRenderer<Dx12Backend>),
}

impl Renderer {
    pub fn new(config: &GraphicsConfig, surface: &SurfaceDesc) -> Result<Self> {
        let desc = InstanceDesc {
            debug_layer: config.debug_layer,
        };

        match config.backend {
            GraphicsBackend::Headless => {
                tracing::info!("Initializing headless backend");
                let instance = HeadlessInstance::create(&desc)?;
                Self::headless(&instance, config, surface)
            }
            #[cfg(target_os = "windows")]
            GraphicsBackend::Dx12 => {
                tracing::info!("Initializing DX12 backend");
                let instance = Dx12Instance::create(&desc)?;
                Ok(Renderer::Dx12(FrameRenderer::new(&instance, config, surface)?))
            }
            #[cfg(not(target_os = "windows"))]
            GraphicsBackend::Dx12 => Err(crate::core::error::EngineError::Initialization(
                "DX12 backend is only available on Windows".to_string(),
            )),
        }
    }

    /// 用指定的 headless 实例创建（测试可以控制完成模式）
    pub fn headless(instance: &HeadlessInstance, config: &GraphicsConfig, surface: &SurfaceDesc) -> Result<Self> {
        Ok(Renderer::Headless(FrameRenderer::new(instance, config, surface)?))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Renderer::Headless(_) => "Headless",
            #[cfg(target_os = "windows")]
            Renderer::Dx12(_) => "DX12",
        }
    }

    pub fn render(&mut self, snapshot: &SceneSnapshot) -> Result<FrameStats> {
        match self {
            Renderer::Headless(r) => r.render(snapshot).cloned(),
            #[cfg(target_os = "windows")]
            Renderer::Dx12(r) => r.render(snapshot).cloned(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        match self {
            Renderer::Headless(r) => r.resize(width, height),
            #[cfg(target_os = "windows")]
            Renderer::Dx12(r) => r.resize(width, height),
        }
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool, width: u32, height: u32) -> Result<()> {
        match self {
            Renderer::Headless(r) => r.set_fullscreen(fullscreen, width, height),
            #[cfg(target_os = "windows")]
            Renderer::Dx12(r) => r.set_fullscreen(fullscreen, width, height),
        }
    }

    pub fn add_painter(&mut self, painter: Box<dyn OverlayPainter>) {
        match self {
            Renderer::Headless(r) => r.add_painter(painter),
            #[cfg(target_os = "windows")]
            Renderer::Dx12(r) => r.add_painter(painter),
        }
    }

    pub fn stats(&self) -> &FrameStats {
        match self {
            Renderer::Headless(r) => r.stats(),
            #[cfg(target_os = "windows")]
            Renderer::Dx12(r) => r.stats(),
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        match self {
            Renderer::Headless(r) => r.shutdown(),
            #[cfg(target_os = "windows")]
            Renderer::Dx12(r) => r.shutdown(),
        }
    }
}
