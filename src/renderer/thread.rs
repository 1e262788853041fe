//! 独立渲染线程
//!
//! 渲染器整体移动到专用线程上，游戏线程只通过通道与它交流：
//!
//! - 场景快照走容量为 1 的通道：一份在通道里等待，一份正在渲染，
//!   游戏线程最多领先一帧；
//! - 调整大小 / 全屏请求带回复通道，调用方阻塞到渲染线程完成为止；
//! - 渲染统计走无界通道，游戏线程每帧只取最新的一份。
//!
//! 关闭时渲染线程先排空 GPU，再退出；`join` 返回线程里的第一个错误。

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::core::error::{EngineError, Result};
use crate::renderer::stats::FrameStats;
use crate::renderer::Renderer;
use crate::scene::SceneSnapshot;

/// 发给渲染线程的命令
pub enum RenderCommand {
    Frame(Box<SceneSnapshot>),
    Resize {
        width: u32,
        height: u32,
        reply: Sender<Result<()>>,
    },
    Fullscreen {
        fullscreen: bool,
        width: u32,
        height: u32,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

pub struct RenderThread {
    commands: Sender<RenderCommand>,
    stats: Receiver<FrameStats>,
    latest: FrameStats,
    handle: Option<JoinHandle<Result<()>>>,
}

impl RenderThread {
    pub fn spawn(renderer: Renderer) -> Result<Self> {
        let (commands, command_rx) = bounded::<RenderCommand>(1);
        let (stats_tx, stats) = unbounded();
        let latest = renderer.stats().clone();

        let handle = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                let result = run(renderer, command_rx, stats_tx);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Render thread stopped");
                }
                result
            })?;

        tracing::info!("Render thread started");
        Ok(Self {
            commands,
            stats,
            latest,
            handle: Some(handle),
        })
    }

    fn send(&self, command: RenderCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::Runtime("render thread is no longer running".to_string()))
    }

    /// 发布一帧快照；渲染线程落后一帧以上时阻塞
    pub fn submit(&self, snapshot: SceneSnapshot) -> Result<()> {
        self.send(RenderCommand::Frame(Box::new(snapshot)))
    }

    fn request(&self, make: impl FnOnce(Sender<Result<()>>) -> RenderCommand) -> Result<()> {
        let (reply, response) = bounded(1);
        self.send(make(reply))?;
        response
            .recv()
            .map_err(|_| EngineError::Runtime("render thread exited before acknowledging".to_string()))?
    }

    /// 同步调整大小，返回时交换链已经按新尺寸重建
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.request(|reply| RenderCommand::Resize { width, height, reply })
    }

    pub fn set_fullscreen(&self, fullscreen: bool, width: u32, height: u32) -> Result<()> {
        self.request(|reply| RenderCommand::Fullscreen {
            fullscreen,
            width,
            height,
            reply,
        })
    }

    /// 最近一次收到的渲染统计
    pub fn latest_stats(&mut self) -> &FrameStats {
        if let Some(stats) = self.stats.try_iter().last() {
            self.latest = stats;
        }
        &self.latest
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 停止渲染线程并等待它排空 GPU
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // 线程已经因错误退出时发送会失败，直接 join 取回错误
        let _ = self.commands.send(RenderCommand::Shutdown);
        let result = handle
            .join()
            .map_err(|_| EngineError::Runtime("render thread panicked".to_string()))?;
        tracing::info!("Render thread joined");
        result
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "Render thread shutdown failed");
        }
    }
}

fn run(mut renderer: Renderer, commands: Receiver<RenderCommand>, stats: Sender<FrameStats>) -> Result<()> {
    for command in commands.iter() {
        match command {
            RenderCommand::Frame(snapshot) => {
                let frame = renderer.render(&snapshot)?;
                // 游戏线程已经退出时统计无人接收
                let _ = stats.send(frame);
            }
            RenderCommand::Resize { width, height, reply } => {
                let result = renderer.resize(width, height);
                // 统计先于回复发出，调用方返回后就能看到新尺寸
                let _ = stats.send(renderer.stats().clone());
                let _ = reply.send(result);
            }
            RenderCommand::Fullscreen {
                fullscreen,
                width,
                height,
                reply,
            } => {
                let result = renderer.set_fullscreen(fullscreen, width, height);
                let _ = stats.send(renderer.stats().clone());
                let _ = reply.send(result);
            }
            RenderCommand::Shutdown => break,
        }
    }
    renderer.shutdown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{GraphicsBackend, GraphicsConfig};
    use crate::gfx::headless::{CompletionMode, HeadlessInstance};
    use crate::gfx::SurfaceDesc;
    use crate::scene::Scene;

    fn renderer() -> Renderer {
        let config = GraphicsConfig {
            backend: GraphicsBackend::Headless,
            ..Default::default()
        };
        let surface = SurfaceDesc {
            width: 320,
            height: 240,
            buffer_count: 3,
            window: None,
        };
        Renderer::headless(&HeadlessInstance::with_mode(CompletionMode::Immediate), &config, &surface).unwrap()
    }

    #[test]
    fn test_frames_and_resize_round_trip() {
        let mut thread = RenderThread::spawn(renderer()).unwrap();
        let scene = Scene::demo();
        for _ in 0..4 {
            thread.submit(scene.snapshot(0.016)).unwrap();
        }
        thread.resize(640, 480).unwrap();
        // resize 的回复晚于之前所有帧
        assert_eq!(thread.latest_stats().frame_number, 4);

        thread.submit(scene.snapshot(0.016)).unwrap();
        thread.shutdown().unwrap();
        assert_eq!(thread.latest_stats().frame_number, 5);
        assert_eq!(thread.latest_stats().extent, (640, 480));
        assert!(!thread.is_running());
    }

    #[test]
    fn test_requests_after_shutdown_fail() {
        let mut thread = RenderThread::spawn(renderer()).unwrap();
        thread.shutdown().unwrap();
        assert!(thread.resize(10, 10).is_err());
        assert!(thread.submit(SceneSnapshot::default()).is_err());
    }
}
