//! 引擎主循环：启动场景、两种线程模型、编辑器叠加层

use std::path::PathBuf;

use insight_render::core::config::{Config, GraphicsBackend, ThreadingMode};
use insight_render::engine::Engine;
use insight_render::gfx::SurfaceDesc;
use insight_render::scene::{Component, Material, MeshRenderer};

fn config(threading: ThreadingMode) -> Config {
    let mut config = Config::default();
    config.graphics.backend = GraphicsBackend::Headless;
    config.runtime.threading = threading;
    config
}

fn surface(config: &Config) -> SurfaceDesc {
    SurfaceDesc {
        width: config.window.width,
        height: config.window.height,
        buffer_count: config.graphics.frames_in_flight,
        window: None,
    }
}

fn demo_path() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("assets/scenes/demo.json")
        .to_string_lossy()
        .into_owned()
}

#[test]
fn engine_starts_from_the_configured_scene() {
    let mut config = config(ThreadingMode::Single);
    config.scene.path = Some(demo_path());
    let surface = surface(&config);

    let mut engine = Engine::new(config, surface).unwrap();
    assert_eq!(engine.scene().name(), "Demo");
    assert_eq!(engine.scene().len(), 4);

    for _ in 0..5 {
        engine.tick_with(1.0 / 60.0).unwrap();
    }
    let stats = engine.stats();
    assert_eq!(stats.frame_number, 5);
    assert_eq!(stats.backend, "Headless");
    assert!(stats.frames_pending() <= 3);
    engine.shutdown().unwrap();
}

#[test]
fn missing_scene_falls_back_to_the_demo() {
    let mut config = config(ThreadingMode::Single);
    config.scene.path = Some("does/not/exist.json".to_string());
    let surface = surface(&config);

    let mut engine = Engine::new(config, surface).unwrap();
    assert_eq!(engine.scene().len(), 5);
    engine.tick_with(1.0 / 60.0).unwrap();
    engine.shutdown().unwrap();
}

#[test]
fn hiding_the_editor_removes_its_draws() {
    let config = config(ThreadingMode::Single);
    let surface = surface(&config);
    let mut engine = Engine::new(config, surface).unwrap();

    engine.tick_with(1.0 / 60.0).unwrap();
    let with_editor = engine.stats().draw_calls;

    engine.editor_mut().toggle();
    assert!(!engine.editor().is_visible());
    engine.tick_with(1.0 / 60.0).unwrap();
    let without_editor = engine.stats().draw_calls;

    assert!(without_editor < with_editor);
    // 场景几何始终绘制
    assert!(without_editor >= engine.scene().len() as u32);
    engine.shutdown().unwrap();
}

#[test]
fn render_thread_acknowledges_resize_before_next_frame() {
    let config = config(ThreadingMode::RenderThread);
    let surface = surface(&config);
    let mut engine = Engine::new(config, surface).unwrap();

    for _ in 0..3 {
        engine.tick_with(1.0 / 60.0).unwrap();
    }
    engine.resize(1024, 768).unwrap();
    // resize 返回时渲染线程已经处理完之前的全部帧
    assert_eq!(engine.stats().frame_number, 3);
    assert_eq!(engine.stats().extent, (1024, 768));

    engine.tick_with(1.0 / 60.0).unwrap();
    engine.shutdown().unwrap();
    assert_eq!(engine.stats().frame_number, 4);
    assert_eq!(engine.extent(), (1024, 768));
}

#[test]
fn minimize_and_restore_keeps_the_loop_alive() {
    let config = config(ThreadingMode::RenderThread);
    let surface = surface(&config);
    let mut engine = Engine::new(config, surface).unwrap();

    engine.tick_with(1.0 / 60.0).unwrap();
    engine.resize(0, 0).unwrap();
    engine.tick_with(1.0 / 60.0).unwrap();
    engine.resize(1280, 720).unwrap();
    engine.tick_with(1.0 / 60.0).unwrap();
    engine.shutdown().unwrap();

    let stats = engine.stats();
    assert_eq!(stats.frame_number, 2);
    assert_eq!(stats.skipped_frames, 1);
    assert_eq!(engine.frame_count(), 3);
}

#[test]
fn spawning_past_the_object_capacity_grows_it() {
    let mut config = config(ThreadingMode::Single);
    config.graphics.max_objects = 4;
    config.graphics.shader_heap_capacity = 12;
    let surface = surface(&config);
    let mut engine = Engine::new(config, surface).unwrap();
    engine.tick_with(1.0 / 60.0).unwrap();
    assert_eq!(engine.stats().object_capacity, 8);

    for i in 0..5 {
        engine
            .scene_mut()
            .spawn(format!("Extra {i}"))
            .add_component(Component::MeshRenderer(MeshRenderer {
                model: "builtin:cube".to_string(),
                material: Material::default(),
            }));
    }
    engine.tick_with(1.0 / 60.0).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.object_capacity, 16);
    assert!(stats.draw_calls >= 10);
    engine.shutdown().unwrap();
}
