//! Insight - 实时渲染核心
//!
//! 可以通过配置文件或命令行参数选择图形后端与线程模型。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 无窗口运行 120 帧（任何平台）
//! cargo run -- --headless --frames 120
//!
//! # DirectX 12 + 独立渲染线程
//! cargo run -- --dx12 --render-thread --scene assets/scenes/demo.json
//! ```
//!
//! # 架构概览
//!
//! ```text
//! ┌─────────────┐
//! │   main.rs   │  窗口与事件循环
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │   Engine    │  输入 / 场景 / 编辑器
//! └──────┬──────┘
//!        │ SceneSnapshot
//! ┌──────▼──────┐
//! │  Renderer   │  帧同步与资源管理（可在独立线程）
//! └──────┬──────┘
//!        │
//!   ┌────┴─────┐
//!   │          │
//! ┌─▼──┐  ┌────▼───┐
//! │DX12│  │Headless│  具体后端实现
//! └────┘  └────────┘
//! ```
//!
//! # 快捷键
//!
//! - `F1`：显示 / 隐藏编辑器
//! - `F11`：切换全屏
//! - `WASD` + 右键拖动：移动相机
//! - 左键：拾取实体

use anyhow::Context;
use raw_window_handle::HasWindowHandle;
use tracing::{debug, error, info};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use insight_render::core::config::{Config, GraphicsBackend};
use insight_render::core::log;
use insight_render::engine::Engine;
use insight_render::gfx::SurfaceDesc;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载引擎配置文件（config.toml）
/// 2. 应用命令行参数覆盖并验证
/// 3. 初始化日志系统
/// 4. headless 后端：无窗口渲染固定帧数后退出
/// 5. 其他后端：创建窗口与引擎，进入事件循环
fn main() -> anyhow::Result<()> {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("invalid configuration")?;

    log::init_logger(&config.logging).context("failed to initialize logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Insight starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        frames_in_flight = config.graphics.frames_in_flight,
        threading = ?config.runtime.threading,
        "Graphics configuration"
    );

    if config.graphics.backend == GraphicsBackend::Headless {
        return run_headless(config);
    }
    run_windowed(config)
}

fn run_headless(config: Config) -> anyhow::Result<()> {
    let frames = config.runtime.headless_frames;
    let surface = SurfaceDesc {
        width: config.window.width,
        height: config.window.height,
        buffer_count: config.graphics.frames_in_flight,
        window: None,
    };

    let mut engine = Engine::new(config, surface).inspect_err(|e| error!(error = %e, "Failed to initialize engine"))?;
    for _ in 0..frames {
        engine.tick()?;
    }
    engine.shutdown()?;

    let stats = engine.stats();
    info!(
        frames = stats.frame_number,
        last_completed = stats.last_completed,
        cpu_waits = stats.cpu_waits,
        "Headless run finished"
    );
    Ok(())
}

fn run_windowed(config: Config) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .with_resizable(config.window.resizable)
        .build(&event_loop)
        .context("failed to create window")?;

    let size = window.inner_size();
    let surface = SurfaceDesc {
        width: size.width,
        height: size.height,
        buffer_count: config.graphics.frames_in_flight,
        window: Some(window.window_handle().context("window has no native handle")?.as_raw()),
    };

    let windowed_size = (config.window.width, config.window.height);
    let mut engine = Engine::new(config, surface).inspect_err(|e| error!(error = %e, "Failed to initialize engine"))?;
    let mut fullscreen = false;
    info!("Entering main loop...");

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down...");
                elwt.exit();
            }
            WindowEvent::Resized(new_size) => {
                debug!(width = new_size.width, height = new_size.height, "Window resized");
                if let Err(e) = engine.resize(new_size.width, new_size.height) {
                    error!(error = %e, "Resize failed");
                    elwt.exit();
                }
            }
            WindowEvent::Focused(false) => engine.input_mut().reset(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        text,
                        repeat,
                        ..
                    },
                ..
            } => {
                if state == ElementState::Pressed && !repeat {
                    match code {
                        KeyCode::F1 => engine.editor_mut().toggle(),
                        KeyCode::F11 => {
                            fullscreen = !fullscreen;
                            let (width, height) = if fullscreen {
                                window
                                    .current_monitor()
                                    .map(|m| (m.size().width, m.size().height))
                                    .unwrap_or(windowed_size)
                            } else {
                                windowed_size
                            };
                            if let Err(e) = engine.set_fullscreen(fullscreen, width, height) {
                                error!(error = %e, "Fullscreen transition failed");
                                fullscreen = !fullscreen;
                            }
                        }
                        _ => {}
                    }
                }
                if let (ElementState::Pressed, Some(text)) = (state, text.as_deref()) {
                    engine.editor_mut().text(text);
                }
                engine.input_mut().on_keyboard_input(code, state);
            }
            WindowEvent::CursorMoved { position, .. } => {
                engine.editor_mut().pointer_moved(position.x as f32, position.y as f32);
                engine.input_mut().on_mouse_move((position.x, position.y));
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                match button {
                    MouseButton::Left => {
                        // 先判断编辑器是否占用指针，再把按键交给编辑器
                        if pressed && !engine.editor().wants_pointer() {
                            engine.click();
                        }
                        engine.editor_mut().pointer_button(true, pressed);
                    }
                    MouseButton::Right => {
                        engine.editor_mut().pointer_button(false, pressed);
                        if pressed {
                            engine.input_mut().lock_cursor(&window);
                        } else {
                            engine.input_mut().unlock_cursor(&window);
                        }
                    }
                    _ => {}
                }
                engine.input_mut().on_mouse_button(button, state);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (x * 20.0, y * 20.0),
                    MouseScrollDelta::PixelDelta(p) => (p.x as f32, p.y as f32),
                };
                engine.editor_mut().scroll(dx, dy);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = engine.tick() {
                    error!(error = %e, "Frame failed");
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => window.request_redraw(),
        Event::LoopExiting => {
            if let Err(e) = engine.shutdown() {
                error!(error = %e, "Shutdown failed");
            }
        }
        _ => {}
    })?;

    Ok(())
}
