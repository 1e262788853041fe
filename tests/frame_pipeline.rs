//! 帧生命周期：帧槽环、上传内存复用、通道顺序、关闭时排空

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use insight_render::core::config::{GraphicsBackend, GraphicsConfig};
use insight_render::core::error::{EngineError, GraphicsError};
use insight_render::gfx::headless::{CompletionMode, GpuEvent, HeadlessBackend, HeadlessInstance};
use insight_render::gfx::{AdapterInfo, FeatureLevel, PipelineKind, ScissorRect, SurfaceDesc};
use insight_render::renderer::{
    FrameRenderer, OverlayMesh, OverlayTextureId, OverlayTextureUpdate, RenderPass, PASS_ORDER,
};
use insight_render::scene::{Scene, SceneSnapshot};

fn config() -> GraphicsConfig {
    GraphicsConfig {
        backend: GraphicsBackend::Headless,
        frames_in_flight: 3,
        max_objects: 8,
        shader_heap_capacity: 24,
        ..Default::default()
    }
}

fn surface() -> SurfaceDesc {
    SurfaceDesc {
        width: 640,
        height: 480,
        buffer_count: 3,
        window: None,
    }
}

/// `Manual` 模式下 drop 会排空所有已提交的帧，测试结束前必须让时间线完成
fn renderer(mode: CompletionMode) -> FrameRenderer<HeadlessBackend> {
    FrameRenderer::new(&HeadlessInstance::with_mode(mode), &config(), &surface()).unwrap()
}

#[test]
fn cpu_runs_ahead_until_the_ring_is_full() {
    let mut renderer = renderer(CompletionMode::Manual);
    let timeline = renderer.device().timeline();
    let snapshot = Scene::demo().snapshot(0.016);

    for expected in 1..=3u64 {
        let stats = renderer.render(&snapshot).unwrap();
        assert_eq!(stats.last_signaled, expected);
        assert_eq!(stats.cpu_waits, 0);
    }
    assert_eq!(timeline.completed(), 0);

    // 第 4 帧复用帧槽 0，必须等 GPU 完成 fence 1
    let gpu = {
        let timeline = timeline.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            timeline.complete_up_to(1);
        })
    };
    let stats = renderer.render(&snapshot).unwrap().clone();
    gpu.join().unwrap();

    assert_eq!(stats.frame_number, 4);
    assert_eq!(stats.cpu_waits, 1);
    assert!(timeline.completed() >= 1);

    // 帧槽 0 的上传内存只在等待之后才被重写
    let events = timeline.events().snapshot();
    let wait = events
        .iter()
        .position(|e| *e == GpuEvent::CpuWait(1))
        .expect("frame 4 waited for fence 1");
    let signal_3 = events
        .iter()
        .position(|e| *e == GpuEvent::Signaled(3))
        .unwrap();
    assert!(signal_3 < wait);
    assert!(!events[signal_3..wait]
        .iter()
        .any(|e| matches!(e, GpuEvent::UploadWrite { .. })));

    timeline.complete_all();
}

#[test]
fn frames_keep_running_with_a_slow_gpu() {
    let mut renderer = renderer(CompletionMode::Manual);
    let timeline = renderer.device().timeline();
    let snapshot = Scene::demo().snapshot(0.016);

    // GPU 始终落后最新提交一帧，直到 CPU 停止提交
    let stop = Arc::new(AtomicBool::new(false));
    let gpu = {
        let timeline = timeline.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(2));
                let signaled = timeline.last_signaled();
                timeline.complete_up_to(signaled.saturating_sub(1));
            }
            timeline.complete_all();
        })
    };

    for _ in 0..10 {
        renderer.render(&snapshot).unwrap();
        let stats = renderer.stats();
        assert!(stats.frames_pending() <= 3, "pending {}", stats.frames_pending());
    }
    stop.store(true, Ordering::Release);
    gpu.join().unwrap();
    renderer.shutdown().unwrap();
    assert_eq!(renderer.stats().frame_number, 10);
}

#[test]
fn passes_record_in_fixed_order_with_overlays() {
    let mut renderer = renderer(CompletionMode::Immediate);
    let events = renderer.device().events();

    let mut snapshot = Scene::demo().snapshot(0.016);
    let mut ui = OverlayMesh::default();
    ui.push_rect([10.0, 10.0], [100.0, 40.0], 0xff20_2020);
    let mut editor = OverlayMesh::default();
    editor.push_rect([0.0, 0.0], [50.0, 50.0], 0x80ff_ffff);
    // 提交顺序与通道顺序相反，录制时仍按通道分组
    snapshot.overlays.push((RenderPass::Editor, editor));
    snapshot.overlays.push((RenderPass::Ui, ui));

    renderer.render(&snapshot).unwrap();
    let log = events.snapshot();

    let begins: Vec<RenderPass> = log
        .iter()
        .filter_map(|e| match e {
            GpuEvent::PassBegin(pass) => Some(*pass),
            _ => None,
        })
        .collect();
    assert_eq!(begins, PASS_ORDER.to_vec());

    let pass_of = |index: usize| {
        log[..index]
            .iter()
            .rev()
            .find_map(|e| match e {
                GpuEvent::PassBegin(pass) => Some(*pass),
                _ => None,
            })
            .unwrap()
    };
    for (index, event) in log.iter().enumerate() {
        match event {
            GpuEvent::Draw { .. } => assert_eq!(pass_of(index), RenderPass::Geometry),
            GpuEvent::OverlayDraw { .. } => assert!(pass_of(index).is_overlay()),
            GpuEvent::Present { .. } => assert_eq!(pass_of(index), RenderPass::Present),
            _ => {}
        }
    }
    assert_eq!(events.count(|e| matches!(e, GpuEvent::OverlayDraw { .. })), 2);
    assert!(events.count(|e| *e == GpuEvent::PipelineBound(PipelineKind::Overlay)) >= 1);
}

#[test]
fn overlay_textures_are_copied_before_the_passes_that_sample_them() {
    let mut renderer = renderer(CompletionMode::Immediate);
    let events = renderer.device().events();
    let atlas = OverlayTextureId::Managed(0);

    let mut snapshot = SceneSnapshot {
        texture_updates: vec![OverlayTextureUpdate {
            id: atlas,
            origin: None,
            width: 16,
            height: 16,
            pixels: vec![0xff; 16 * 16 * 4],
        }],
        ..Default::default()
    };
    let clips = [
        ScissorRect {
            left: 0,
            top: 0,
            right: 320,
            bottom: 240,
        },
        ScissorRect {
            left: 320,
            top: 240,
            right: 640,
            bottom: 480,
        },
    ];
    for clip in clips {
        let mut mesh = OverlayMesh::default();
        mesh.push_rect([0.0, 0.0], [640.0, 480.0], 0xffff_ffff);
        mesh.texture = atlas;
        mesh.clip = Some(clip);
        snapshot.overlays.push((RenderPass::Editor, mesh));
    }
    renderer.render(&snapshot).unwrap();
    let log = events.snapshot();

    let first_pass = log
        .iter()
        .position(|e| matches!(e, GpuEvent::PassBegin(_)))
        .unwrap();
    let copies: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, GpuEvent::TextureCopy { .. }))
        .map(|(index, _)| index)
        .collect();
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().all(|&index| index < first_pass));

    // 每次叠加层绘制之前都设置了自己的裁剪矩形和纹理表
    let draws: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, GpuEvent::OverlayDraw { .. }))
        .map(|(index, _)| index)
        .collect();
    assert_eq!(draws.len(), 2);
    for (draw, clip) in draws.iter().zip(clips) {
        assert_eq!(log[draw - 2], GpuEvent::Scissor(clip));
        assert!(matches!(log[draw - 1], GpuEvent::RootTable { slot: 1, .. }));
    }
}

#[test]
fn per_object_descriptors_do_not_overlap_between_slots() {
    let mut renderer = renderer(CompletionMode::Immediate);
    let events = renderer.device().events();
    let snapshot = Scene::demo().snapshot(0.016);

    let mut per_frame: Vec<Vec<u64>> = Vec::new();
    for _ in 0..4 {
        events.clear();
        renderer.render(&snapshot).unwrap();
        per_frame.push(
            events
                .snapshot()
                .into_iter()
                .filter_map(|e| match e {
                    GpuEvent::RootTable { slot: 0, handle } => Some(handle),
                    _ => None,
                })
                .collect(),
        );
    }

    for handles in &per_frame {
        assert_eq!(handles.len(), 5);
    }
    for a in 0..3 {
        for b in (a + 1)..3 {
            assert!(
                per_frame[a].iter().all(|h| !per_frame[b].contains(h)),
                "slots {a} and {b} share per-object descriptors"
            );
        }
    }
    // 第 4 帧回到帧槽 0
    assert_eq!(per_frame[3], per_frame[0]);
}

#[test]
fn shutdown_waits_for_all_submitted_frames() {
    let mut renderer = renderer(CompletionMode::Manual);
    let timeline = renderer.device().timeline();
    let snapshot = Scene::demo().snapshot(0.016);
    renderer.render(&snapshot).unwrap();
    renderer.render(&snapshot).unwrap();
    assert_eq!(timeline.completed(), 0);

    let gpu = {
        let timeline = timeline.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            timeline.complete_all();
        })
    };
    renderer.shutdown().unwrap();
    gpu.join().unwrap();

    assert_eq!(timeline.completed(), timeline.last_signaled());
    // 重复关闭不再等待
    renderer.shutdown().unwrap();
}

#[test]
fn dropping_the_renderer_waits_for_in_flight_frames() {
    let mut renderer = renderer(CompletionMode::Manual);
    let timeline = renderer.device().timeline();
    let snapshot = Scene::demo().snapshot(0.016);
    renderer.render(&snapshot).unwrap();
    renderer.render(&snapshot).unwrap();
    assert_eq!(timeline.completed(), 0);

    let gpu = {
        let timeline = timeline.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            timeline.complete_all();
        })
    };
    drop(renderer);

    // drop 返回时所有已提交的 fence 都已完成
    assert!(timeline.completed() >= 2);
    assert_eq!(timeline.completed(), timeline.last_signaled());
    gpu.join().unwrap();
}

#[test]
fn empty_snapshot_still_clears_and_presents() {
    let mut renderer = renderer(CompletionMode::Immediate);
    let events = renderer.device().events();
    renderer.render(&SceneSnapshot::default()).unwrap();

    assert_eq!(events.count(|e| matches!(e, GpuEvent::Draw { .. })), 0);
    assert_eq!(events.count(|e| matches!(e, GpuEvent::ClearColor { .. })), 1);
    assert_eq!(events.count(|e| matches!(e, GpuEvent::Present { .. })), 1);
}

fn adapter(name: &str, level: FeatureLevel, is_software: bool) -> AdapterInfo {
    AdapterInfo {
        name: name.to_string(),
        vendor_id: 0x1414,
        device_id: 0,
        dedicated_video_memory: 512 << 20,
        is_software,
        max_feature_level: level,
    }
}

#[test]
fn device_creation_requires_a_qualifying_adapter() {
    let instance = HeadlessInstance::with_adapters(
        vec![
            adapter("old hardware", FeatureLevel::Level11_1, false),
            adapter("warp", FeatureLevel::Level12_1, true),
        ],
        CompletionMode::Immediate,
    );

    let Err(err) = FrameRenderer::<HeadlessBackend>::new(&instance, &config(), &surface()) else {
        panic!("an 11_1 hardware adapter must not satisfy 12_0");
    };
    assert!(matches!(
        err,
        EngineError::Graphics(GraphicsError::NoSuitableAdapter { .. })
    ));

    let config = GraphicsConfig {
        allow_software_adapter: true,
        ..config()
    };
    let mut renderer = FrameRenderer::<HeadlessBackend>::new(&instance, &config, &surface()).unwrap();
    renderer.render(&Scene::demo().snapshot(0.016)).unwrap();
    assert_eq!(renderer.stats().adapter, "warp");
}
