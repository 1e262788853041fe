//! 引擎主循环
//!
//! 把场景、编辑器、输入和渲染器串成一帧：
//!
//! ```text
//! 输入 → 场景 update → 编辑器（读写实时场景，输出三角形）→ 快照 → 渲染
//! ```
//!
//! 渲染既可以在同一个循环里完成（`ThreadingMode::Single`），
//! 也可以交给独立的渲染线程（`ThreadingMode::RenderThread`），
//! 此时游戏线程只发布快照，最多领先渲染线程一帧。

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::core::config::{Config, ThreadingMode};
use crate::core::error::Result;
use crate::core::input::InputSystem;
use crate::editor::{EditorOverlay, FrameTimeGraph};
use crate::gfx::SurfaceDesc;
use crate::renderer::thread::RenderThread;
use crate::renderer::{FrameStats, RenderPass, Renderer};
use crate::scene::{serializer, EntityId, Scene};

/// 未指定场景文件时编辑器保存到这里
pub const DEFAULT_SAVE_PATH: &str = "assets/scenes/scratch.json";

/// 渲染器的运行方式
pub enum RenderDriver {
    Inline(Renderer),
    Threaded(RenderThread),
}

pub struct Engine {
    config: Config,
    scene: Scene,
    editor: EditorOverlay,
    input: InputSystem,
    driver: RenderDriver,
    extent: (u32, u32),
    last_tick: Instant,
    frame_count: u64,
}

impl Engine {
    /// 加载启动场景并按配置创建渲染器
    pub fn new(config: Config, surface: SurfaceDesc) -> Result<Self> {
        let scene = startup_scene(&config);
        let renderer = Renderer::new(&config.graphics, &surface)?;
        Self::with_renderer(config, scene, renderer, (surface.width, surface.height))
    }

    /// 使用已经创建好的渲染器（测试可以注入 headless 实例）
    pub fn with_renderer(config: Config, scene: Scene, mut renderer: Renderer, extent: (u32, u32)) -> Result<Self> {
        renderer.add_painter(Box::new(FrameTimeGraph::default()));
        let backend = renderer.backend_name();

        let driver = match config.runtime.threading {
            ThreadingMode::Single => RenderDriver::Inline(renderer),
            ThreadingMode::RenderThread => RenderDriver::Threaded(RenderThread::spawn(renderer)?),
        };

        info!(
            backend,
            threading = ?config.runtime.threading,
            scene = scene.name(),
            entities = scene.len(),
            "Engine initialized"
        );

        Ok(Self {
            config,
            scene,
            editor: EditorOverlay::new(),
            input: InputSystem::new(),
            driver,
            extent,
            last_tick: Instant::now(),
            frame_count: 0,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn editor(&self) -> &EditorOverlay {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut EditorOverlay {
        &mut self.editor
    }

    pub fn input_mut(&mut self) -> &mut InputSystem {
        &mut self.input
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// 游戏线程已经发布的帧数
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 用墙钟时间推进一帧
    pub fn tick(&mut self) -> Result<()> {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.tick_with(delta)
    }

    /// 用固定时间步推进一帧
    pub fn tick_with(&mut self, delta_seconds: f32) -> Result<()> {
        self.input.update_camera(&mut self.scene.camera, delta_seconds);
        self.scene.update(delta_seconds);

        // 编辑器可能增删实体，必须在快照之前运行
        let editor = self.editor.build(&mut self.scene, self.extent);
        let mut snapshot = self.scene.snapshot(delta_seconds);
        snapshot
            .overlays
            .extend(editor.meshes.into_iter().map(|mesh| (RenderPass::Editor, mesh)));
        snapshot.texture_updates = editor.texture_updates;
        snapshot.texture_frees = editor.texture_frees;

        let stats = match &mut self.driver {
            RenderDriver::Inline(renderer) => renderer.render(&snapshot)?,
            RenderDriver::Threaded(thread) => {
                thread.submit(snapshot)?;
                thread.latest_stats().clone()
            }
        };
        self.editor.update_stats(stats);
        self.frame_count += 1;

        if self.editor.take_save_request() {
            // 保存失败不终止主循环
            if let Err(e) = self.save_scene() {
                error!(error = %e, "Failed to save scene");
            }
        }
        Ok(())
    }

    /// 最新的渲染统计；渲染线程模式下可能落后一帧
    pub fn stats(&mut self) -> FrameStats {
        match &mut self.driver {
            RenderDriver::Inline(renderer) => renderer.stats().clone(),
            RenderDriver::Threaded(thread) => thread.latest_stats().clone(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        debug!(width, height, "Resizing");
        self.extent = (width, height);
        match &mut self.driver {
            RenderDriver::Inline(renderer) => renderer.resize(width, height),
            RenderDriver::Threaded(thread) => thread.resize(width, height),
        }
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool, width: u32, height: u32) -> Result<()> {
        info!(fullscreen, width, height, "Switching fullscreen state");
        self.extent = (width, height);
        match &mut self.driver {
            RenderDriver::Inline(renderer) => renderer.set_fullscreen(fullscreen, width, height),
            RenderDriver::Threaded(thread) => thread.set_fullscreen(fullscreen, width, height),
        }
    }

    /// 在当前指针位置拾取实体
    pub fn click(&mut self) -> Option<EntityId> {
        self.editor.click_select(&self.scene, self.extent)
    }

    /// 写回启动场景文件；没有启动场景时写到 `DEFAULT_SAVE_PATH`
    pub fn save_scene(&mut self) -> Result<PathBuf> {
        let path = self
            .config
            .scene
            .path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_PATH));
        self.save_scene_to(&path)?;
        Ok(path)
    }

    /// 写出前先移除仍停留在“无”值上的组件，保证内存中的场景与重新加载的一致
    pub fn save_scene_to(&mut self, path: &Path) -> Result<()> {
        let pruned = self.scene.prune_unset_components();
        if pruned > 0 {
            debug!(pruned, "Removed unset components before saving");
        }
        serializer::write_scene(&self.scene, path)?;
        Ok(())
    }

    /// 停止渲染（渲染线程模式下 join 线程），GPU 排空后返回
    pub fn shutdown(&mut self) -> Result<()> {
        info!(frames = self.frame_count, "Engine shutting down");
        match &mut self.driver {
            RenderDriver::Inline(renderer) => renderer.shutdown(),
            RenderDriver::Threaded(thread) => thread.shutdown(),
        }
    }
}

/// 启动场景：配置了路径就加载，失败时退回内置演示场景
fn startup_scene(config: &Config) -> Scene {
    match config.scene.path.as_deref() {
        Some(path) => match serializer::load_scene(path) {
            Ok(scene) => scene,
            Err(e) => {
                warn!(path, error = %e, "Falling back to the demo scene");
                Scene::demo()
            }
        },
        None => Scene::demo(),
    }
}
