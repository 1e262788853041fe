//! 帧渲染器
//!
//! `FrameRenderer<B>` 持有设备、队列、交换链目标和帧槽环，每帧执行：
//!
//! 1. 取得帧槽租约（必要时等待该槽上一次提交的 fence）
//! 2. 写入逐对象 / 逐帧 / 光照 / 后处理常量、叠加层顶点和纹理像素
//! 3. 重置分配器和命令列表，录制纹理拷贝，再按 `PASS_ORDER` 录制
//! 4. 关闭、执行、呈现、signal
//!
//! 设备与队列在所有帧槽和渲染目标之后析构；`Drop` 先排空 GPU。

use crate::core::error::{GraphicsError, Result};
use crate::core::math::Color;
use crate::core::config::GraphicsConfig;
use crate::gfx::adapter::{select_adapter, AdapterInfo};
use crate::gfx::{
    Backend, CommandList, CommandQueue, Device, GpuBufferRange, Instance, PipelineKind, ResourceState,
    ScissorRect, SurfaceDesc, UploadMemory, Viewport,
};
use crate::renderer::constant_buffer::{
    align_up, CbAlignment, ConstantBuffer, LightConstants, PerFrameConstants, PerObjectConstants,
    PostFxConstants,
};
use crate::renderer::descriptor::{DescriptorHandle, DescriptorHeap, DescriptorHeapType};
use crate::renderer::pass::{OverlayMesh, OverlayPainter, RenderPass, PASS_ORDER};
use crate::renderer::stats::{FrameStats, FrameTimer};
use crate::renderer::swapchain::SwapchainTargets;
use crate::renderer::sync::{FrameSync, GpuIdle};
use crate::renderer::texture::{OverlayTextureId, OverlayTextures, INITIAL_STAGING_SIZE, MAX_OVERLAY_TEXTURES};
use crate::renderer::vertex::{unit_cube, OverlayVertex};
use crate::scene::SceneSnapshot;

/// 几何管线的根参数槽位
mod root {
    pub const OBJECT_TABLE: u32 = 0;
    pub const FRAME_CBV: u32 = 1;
    pub const LIGHTS_CBV: u32 = 2;
    pub const POST_FX_CBV: u32 = 3;
    /// 叠加层管线：屏幕尺寸（2 个 32 位常量）
    pub const OVERLAY_SCREEN: u32 = 0;
    /// 叠加层管线：纹理 SRV 表
    pub const OVERLAY_TEXTURE: u32 = 1;
}

/// 叠加层数据在上传缓冲区中的对齐
const OVERLAY_ALIGNMENT: u64 = 16;

/// 每个帧槽独占的资源
pub struct FrameResources<B: Backend> {
    allocator: B::CommandAllocator,
    objects: ConstantBuffer<B, PerObjectConstants>,
    frame: ConstantBuffer<B, PerFrameConstants>,
    lights: ConstantBuffer<B, LightConstants>,
    post_fx: ConstantBuffer<B, PostFxConstants>,
    overlay: B::UploadBuffer,
    texture_staging: B::UploadBuffer,
    /// 本槽逐对象 CBV 在着色器可见堆中的起始句柄
    object_cbvs: DescriptorHandle,
    /// 本槽叠加层纹理 SRV 表，`MAX_OVERLAY_TEXTURES` 个
    texture_table: DescriptorHandle,
}

impl<B: Backend> FrameResources<B> {
    fn create(
        device: &B::Device,
        heap: &mut DescriptorHeap<B>,
        slot: usize,
        object_capacity: u32,
        overlay_size: u64,
    ) -> Result<Self> {
        let allocator = device.create_command_allocator(&format!("frame {slot} allocator"))?;
        let objects = ConstantBuffer::new(
            device,
            object_capacity,
            CbAlignment::D3D12,
            &format!("frame {slot} objects"),
        )?;
        let frame = ConstantBuffer::new(device, 1, CbAlignment::D3D12, &format!("frame {slot} constants"))?;
        let lights = ConstantBuffer::new(device, 1, CbAlignment::D3D12, &format!("frame {slot} lights"))?;
        let post_fx = ConstantBuffer::new(device, 1, CbAlignment::D3D12, &format!("frame {slot} post fx"))?;
        let overlay = device.create_upload_buffer(overlay_size, &format!("frame {slot} overlay"))?;
        let texture_staging =
            device.create_upload_buffer(INITIAL_STAGING_SIZE, &format!("frame {slot} texture staging"))?;

        let object_cbvs = heap.allocate(object_capacity)?;
        let increment = heap.increment_size();
        for index in 0..object_capacity {
            device.create_constant_buffer_view(
                object_cbvs.offset(index, increment).cpu,
                objects.gpu_address(index),
                objects.stride() as u32,
            );
        }
        let texture_table = heap.allocate(MAX_OVERLAY_TEXTURES)?;

        Ok(Self {
            allocator,
            objects,
            frame,
            lights,
            post_fx,
            overlay,
            texture_staging,
            object_cbvs,
            texture_table,
        })
    }

    pub fn object_capacity(&self) -> u32 {
        self.objects.count()
    }
}

/// 一次叠加层绘制在上传缓冲区中的位置
#[derive(Debug, Clone, Copy)]
struct OverlayBatch {
    pass: RenderPass,
    vertices: GpuBufferRange,
    indices: GpuBufferRange,
    index_count: u32,
    clip: ScissorRect,
    texture: OverlayTextureId,
    /// 纹理在本槽 SRV 表中的下标
    texture_slot: u32,
}

/// 后端无关的帧渲染器
pub struct FrameRenderer<B: Backend> {
    config: GraphicsConfig,
    adapter: AdapterInfo,
    clear_color: Color,
    painters: Vec<Box<dyn OverlayPainter>>,
    timer: FrameTimer,
    stats: FrameStats,
    object_capacity: u32,
    shut_down: bool,

    textures: OverlayTextures<B>,
    frames: FrameSync<B, FrameResources<B>>,
    command_list: B::CommandList,
    shader_heap: DescriptorHeap<B>,
    cube: B::Mesh,
    targets: SwapchainTargets<B>,
    queue: B::Queue,
    device: B::Device,
}

fn shader_heap_capacity(config: &GraphicsConfig, frames: u32, object_capacity: u32) -> u32 {
    config
        .shader_heap_capacity
        .max(frames * (object_capacity + MAX_OVERLAY_TEXTURES))
}

impl<B: Backend> FrameRenderer<B> {
    /// 选择适配器、创建设备和全部帧资源
    pub fn new(instance: &B::Instance, config: &GraphicsConfig, surface: &SurfaceDesc) -> Result<Self> {
        let adapters = instance.enumerate_adapters()?;
        for adapter in &adapters {
            tracing::debug!(
                name = %adapter.name,
                memory_mb = adapter.dedicated_video_memory / (1024 * 1024),
                software = adapter.is_software,
                "Adapter found"
            );
        }
        let index = select_adapter(&adapters, config.feature_level, config.allow_software_adapter)?;
        let adapter = adapters[index].clone();
        let device = instance.create_device(index, config.feature_level)?;
        let queue = device.create_queue()?;

        let frame_count = config.frames_in_flight;
        let surface = SurfaceDesc {
            buffer_count: frame_count,
            ..*surface
        };
        let targets = SwapchainTargets::new(&device, &queue, &surface)?;

        let object_capacity = config.max_objects.max(1);
        let mut shader_heap = DescriptorHeap::create(
            &device,
            "shader visible",
            DescriptorHeapType::CbvSrvUav,
            shader_heap_capacity(config, frame_count, object_capacity),
        )?;

        let resources = (0..frame_count as usize)
            .map(|slot| {
                FrameResources::create(
                    &device,
                    &mut shader_heap,
                    slot,
                    object_capacity,
                    config.overlay_buffer_size,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let command_list = device.create_command_list(&resources[0].allocator)?;
        let frames = FrameSync::new(resources)?;

        let (vertices, indices) = unit_cube();
        let cube = device.create_mesh(&vertices, &indices)?;

        tracing::info!(
            backend = B::NAME,
            adapter = %adapter.name,
            feature_level = %config.feature_level,
            frames_in_flight = frame_count,
            object_capacity,
            "Renderer initialized"
        );

        let stats = FrameStats {
            backend: B::NAME,
            adapter: adapter.name.clone(),
            frames_in_flight: frame_count as usize,
            object_capacity,
            extent: targets.extent(),
            ..Default::default()
        };

        Ok(Self {
            config: config.clone(),
            adapter,
            clear_color: Color::CORNFLOWER,
            painters: Vec::new(),
            timer: FrameTimer::default(),
            stats,
            object_capacity,
            shut_down: false,
            textures: OverlayTextures::new(),
            frames,
            command_list,
            shader_heap,
            cube,
            targets,
            queue,
            device,
        })
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn targets(&self) -> &SwapchainTargets<B> {
        &self.targets
    }

    pub fn shader_heap(&self) -> &DescriptorHeap<B> {
        &self.shader_heap
    }

    pub fn object_capacity(&self) -> u32 {
        self.object_capacity
    }

    pub fn textures(&self) -> &OverlayTextures<B> {
        &self.textures
    }

    /// 注册叠加层绘制者，按注册顺序在其通道内绘制
    pub fn add_painter(&mut self, painter: Box<dyn OverlayPainter>) {
        tracing::debug!(pass = painter.pass().name(), "Overlay painter registered");
        self.painters.push(painter);
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// 窗口客户区变化（同步完成）
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let idle = self.frames.wait_for_gpu(&self.queue)?;
        self.targets.resize(&self.device, &idle, width, height)?;
        self.refresh_stats(0);
        Ok(())
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool, width: u32, height: u32) -> Result<()> {
        let idle = self.frames.wait_for_gpu(&self.queue)?;
        self.targets
            .set_fullscreen(&self.device, &idle, fullscreen, width, height)?;
        tracing::info!(fullscreen, width, height, "Fullscreen state changed");
        self.refresh_stats(0);
        Ok(())
    }

    /// 可绘制对象超过每槽容量时，在 GPU 空闲后按倍数扩容
    pub fn ensure_object_capacity(&mut self, required: u32) -> Result<()> {
        if required <= self.object_capacity {
            return Ok(());
        }

        let new_capacity = required.next_power_of_two().max(self.object_capacity * 2);
        let idle = self.frames.drain(&self.queue)?;
        self.rebuild_frame_resources(&idle, new_capacity)?;

        tracing::info!(
            old = self.object_capacity,
            new = new_capacity,
            heap_capacity = self.shader_heap.capacity(),
            "Object capacity grown"
        );
        self.object_capacity = new_capacity;
        Ok(())
    }

    fn rebuild_frame_resources(&mut self, idle: &GpuIdle, object_capacity: u32) -> Result<()> {
        let frames = self.frames.frame_count() as u32;
        let heap_capacity = shader_heap_capacity(&self.config, frames, object_capacity);
        self.shader_heap.recreate(&self.device, idle, heap_capacity)?;

        let device = &self.device;
        let heap = &mut self.shader_heap;
        let overlay_size = self.config.overlay_buffer_size;
        self.frames.rebuild_resources(idle, |slot, resources| {
            *resources = FrameResources::create(device, heap, slot, object_capacity, overlay_size)?;
            Ok(())
        })
    }

    /// 渲染一帧
    pub fn render(&mut self, snapshot: &SceneSnapshot) -> Result<&FrameStats> {
        self.timer.record_frame();
        self.frames.poll(&self.queue);
        self.textures.release_completed(self.queue.completed_value());
        self.textures.enqueue(
            &snapshot.texture_updates,
            &snapshot.texture_frees,
            self.frames.last_issued(),
        );

        if self.targets.is_minimized() {
            self.stats.skipped_frames += 1;
            self.refresh_stats(0);
            return Ok(&self.stats);
        }

        self.ensure_object_capacity(snapshot.drawables.len() as u32)?;

        let extent = self.targets.extent();
        let mut painted: Vec<(RenderPass, OverlayMesh)> = Vec::new();
        for painter in &mut self.painters {
            let pass = painter.pass();
            painted.extend(painter.paint(extent).into_iter().map(|mesh| (pass, mesh)));
        }
        let overlays = painted
            .iter()
            .map(|(pass, mesh)| (*pass, mesh))
            .chain(snapshot.overlays.iter().map(|(pass, mesh)| (*pass, mesh)));

        // 本帧之前的全部提交；替换掉的纹理等到它完成后再析构
        let retire_fence = self.frames.last_issued();
        let mut lease = self.frames.begin_frame(&self.queue)?;
        let slot = lease.index();

        let resources = lease.resources_mut();
        upload_constants(resources, snapshot, extent)?;
        let mut batches = upload_overlays(resources, overlays, extent)?;
        let copies = self
            .textures
            .prepare(&self.device, &mut resources.texture_staging, slot, retire_fence)?;
        let table = self.textures.write_table(
            &self.device,
            resources.texture_table,
            self.shader_heap.increment_size(),
            batches.iter().map(|batch| batch.texture),
        );
        for batch in &mut batches {
            batch.texture_slot = table.index_of(batch.texture);
        }
        self.command_list.reset(&mut resources.allocator)?;
        self.textures
            .record_copies(&mut self.command_list, &resources.texture_staging, &copies);

        let recorded = record_passes(
            &mut self.command_list,
            &self.targets,
            &self.shader_heap,
            &self.cube,
            lease.resources(),
            snapshot,
            &batches,
            self.clear_color.to_array(),
        );
        // 录制失败也要关闭命令列表，下次才能重置
        let closed = self.command_list.close();
        let draws = recorded?;
        closed?;

        let interval = if self.config.vsync { 1 } else { 0 };
        let targets = &mut self.targets;
        let fence = lease.submit(&self.queue, &self.command_list, || targets.present(interval))?;

        tracing::trace!(slot, fence = fence.value(), draws, "Frame submitted");
        self.refresh_stats(draws);
        Ok(&self.stats)
    }

    fn refresh_stats(&mut self, draws: u32) {
        let sync = self.frames.stats();
        self.stats.frame_number = sync.frames_submitted;
        self.stats.last_signaled = sync.last_signaled.value();
        self.stats.last_completed = sync.last_completed.value();
        self.stats.cpu_waits = sync.cpu_waits;
        self.stats.draw_calls = draws;
        self.stats.object_capacity = self.object_capacity;
        self.stats.extent = self.targets.extent();
        self.stats.fps = self.timer.fps();
        self.stats.frame_time_ms = self.timer.frame_time_ms();
        self.stats.heaps = vec![
            self.shader_heap.stats(),
            self.targets.rtv_heap().stats(),
            self.targets.dsv_heap().stats(),
        ];
    }

    /// 排空所有在途帧；之后才能释放 GPU 资源
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        let idle = self.frames.drain(&self.queue)?;
        self.textures.release_completed(idle.fence());
        self.shut_down = true;
        tracing::info!(fence = idle.fence().value(), "Renderer shut down");
        Ok(())
    }
}

impl<B: Backend> Drop for FrameRenderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "Failed to drain GPU before releasing resources");
        }
    }
}

fn upload_constants<B: Backend>(
    resources: &mut FrameResources<B>,
    snapshot: &SceneSnapshot,
    extent: (u32, u32),
) -> Result<()> {
    let camera = &snapshot.camera;
    let aspect = extent.0 as f32 / extent.1.max(1) as f32;
    let view: [[f32; 4]; 4] = camera.view_matrix().into();
    let projection: [[f32; 4]; 4] = camera.projection_matrix(aspect).into();

    for (index, drawable) in snapshot.drawables.iter().enumerate() {
        let constants = PerObjectConstants {
            world: drawable.world.into(),
            view,
            projection,
        };
        resources.objects.write(index as u32, &constants)?;
    }

    let counts = snapshot.light_counts;
    let frame = PerFrameConstants {
        camera_position: camera.position.into(),
        exposure: camera.exposure,
        near_z: camera.near_z,
        far_z: camera.far_z,
        delta_ms: snapshot.delta_seconds * 1000.0,
        time: snapshot.time,
        num_point_lights: counts.point,
        num_directional_lights: counts.directional,
        num_spot_lights: counts.spot,
        _pad0: 0.0,
        screen_size: [extent.0 as f32, extent.1 as f32],
        _pad1: [0.0; 2],
    };
    resources.frame.write(0, &frame)?;
    resources.lights.write(0, &snapshot.lights)?;
    resources.post_fx.write(0, &snapshot.post_fx)?;
    Ok(())
}

/// 把叠加层网格依次拷贝进本槽的上传缓冲区；放不下的网格和裁剪为空的网格被丢弃
fn upload_overlays<'a, B: Backend>(
    resources: &mut FrameResources<B>,
    meshes: impl Iterator<Item = (RenderPass, &'a OverlayMesh)>,
    extent: (u32, u32),
) -> Result<Vec<OverlayBatch>> {
    let memory = &mut resources.overlay;
    let capacity = memory.size();
    let base = memory.gpu_address();
    let mut offset = 0u64;
    let mut batches = Vec::new();
    let mut dropped = 0usize;

    for (pass, mesh) in meshes {
        if mesh.is_empty() {
            continue;
        }
        let clip = mesh
            .clip
            .unwrap_or(ScissorRect::full(extent.0, extent.1))
            .clamp_to(extent.0, extent.1);
        if clip.is_empty() {
            continue;
        }
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertex_offset = align_up(offset, OVERLAY_ALIGNMENT);
        let index_offset = align_up(vertex_offset + vertex_bytes.len() as u64, OVERLAY_ALIGNMENT);
        let end = index_offset + index_bytes.len() as u64;
        if end > capacity {
            dropped += 1;
            continue;
        }

        memory.write(vertex_offset, vertex_bytes)?;
        memory.write(index_offset, index_bytes)?;
        batches.push(OverlayBatch {
            pass,
            vertices: GpuBufferRange {
                address: base + vertex_offset,
                size: vertex_bytes.len() as u64,
                stride: std::mem::size_of::<OverlayVertex>() as u32,
            },
            indices: GpuBufferRange {
                address: base + index_offset,
                size: index_bytes.len() as u64,
                stride: std::mem::size_of::<u32>() as u32,
            },
            index_count: mesh.indices.len() as u32,
            clip,
            texture: mesh.texture,
            texture_slot: 0,
        });
        offset = end;
    }

    if dropped > 0 {
        tracing::warn!(dropped, capacity, "Overlay upload buffer full, meshes skipped");
    }
    Ok(batches)
}

#[allow(clippy::too_many_arguments)]
fn record_passes<B: Backend>(
    list: &mut B::CommandList,
    targets: &SwapchainTargets<B>,
    shader_heap: &DescriptorHeap<B>,
    cube: &B::Mesh,
    resources: &FrameResources<B>,
    snapshot: &SceneSnapshot,
    batches: &[OverlayBatch],
    clear_color: [f32; 4],
) -> Result<u32> {
    let back_buffer = targets.current_back_buffer_index();
    let rtv = targets.rtv(back_buffer).ok_or_else(|| {
        GraphicsError::SwapchainError(format!("no render target view for back buffer {back_buffer}"))
    })?;
    let dsv = targets
        .dsv()
        .ok_or_else(|| GraphicsError::SwapchainError("depth stencil view missing".to_string()))?;
    let (width, height) = targets.extent();
    let object_table = resources.object_cbvs.gpu.ok_or_else(|| {
        GraphicsError::ResourceCreation("object CBV range is not shader visible".to_string())
    })?;
    let texture_table = resources.texture_table.gpu.ok_or_else(|| {
        GraphicsError::ResourceCreation("overlay texture table is not shader visible".to_string())
    })?;
    let increment = shader_heap.increment_size();
    let mut draws = 0;

    for pass in PASS_ORDER {
        list.begin_pass(pass);
        match pass {
            RenderPass::Clear => {
                list.transition(
                    targets.swapchain(),
                    back_buffer,
                    ResourceState::Present,
                    ResourceState::RenderTarget,
                );
                list.set_render_target(rtv, Some(dsv));
                list.clear_render_target(rtv, clear_color);
                list.clear_depth_stencil(dsv, 1.0);
            }
            RenderPass::Geometry => {
                list.set_render_target(rtv, Some(dsv));
                list.set_viewport(Viewport::full(width, height));
                list.set_scissor(ScissorRect::full(width, height));
                list.bind_pipeline(PipelineKind::Geometry);
                list.set_descriptor_heaps(&[shader_heap.native()]);
                list.set_root_constant_buffer(root::FRAME_CBV, resources.frame.gpu_address(0));
                list.set_root_constant_buffer(root::LIGHTS_CBV, resources.lights.gpu_address(0));
                list.set_root_constant_buffer(root::POST_FX_CBV, resources.post_fx.gpu_address(0));
                // 场景遍历顺序，不排序也不合批
                for index in 0..snapshot.drawables.len() as u32 {
                    list.set_root_descriptor_table(root::OBJECT_TABLE, object_table.offset(index, increment));
                    list.draw_mesh(cube);
                    draws += 1;
                }
            }
            RenderPass::Ui | RenderPass::Editor => {
                let pass_batches: Vec<_> = batches.iter().filter(|b| b.pass == pass).collect();
                if !pass_batches.is_empty() {
                    list.set_render_target(rtv, None);
                    list.set_viewport(Viewport::full(width, height));
                    list.bind_pipeline(PipelineKind::Overlay);
                    list.set_descriptor_heaps(&[shader_heap.native()]);
                    list.set_root_constants(
                        root::OVERLAY_SCREEN,
                        &[(width as f32).to_bits(), (height as f32).to_bits()],
                    );
                    for batch in pass_batches {
                        list.set_scissor(batch.clip);
                        list.set_root_descriptor_table(
                            root::OVERLAY_TEXTURE,
                            texture_table.offset(batch.texture_slot, increment),
                        );
                        list.draw_overlay(batch.vertices, batch.indices, batch.index_count);
                        draws += 1;
                    }
                }
            }
            RenderPass::Present => {
                list.transition(
                    targets.swapchain(),
                    back_buffer,
                    ResourceState::RenderTarget,
                    ResourceState::Present,
                );
            }
        }
        list.end_pass(pass);
    }

    Ok(draws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GraphicsBackend;
    use crate::gfx::headless::{CompletionMode, GpuEvent, HeadlessBackend, HeadlessInstance};
    use crate::renderer::texture::OverlayTextureUpdate;
    use crate::scene::Scene;

    const ATLAS: OverlayTextureId = OverlayTextureId::Managed(1);

    fn atlas_update() -> OverlayTextureUpdate {
        OverlayTextureUpdate {
            id: ATLAS,
            origin: None,
            width: 4,
            height: 2,
            pixels: vec![u8::MAX; 32],
        }
    }

    fn atlas_mesh(clip: Option<ScissorRect>) -> OverlayMesh {
        let mut mesh = OverlayMesh::default();
        mesh.push_rect([0.0, 0.0], [32.0, 32.0], 0xffff_ffff);
        mesh.texture = ATLAS;
        mesh.clip = clip;
        mesh
    }

    fn config() -> GraphicsConfig {
        GraphicsConfig {
            backend: GraphicsBackend::Headless,
            max_objects: 4,
            shader_heap_capacity: 12,
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

    /// `Manual` 模式的渲染器在 drop 前必须完成时间线，否则排空会一直等待
    fn renderer(mode: CompletionMode) -> FrameRenderer<HeadlessBackend> {
        FrameRenderer::new(&HeadlessInstance::with_mode(mode), &config(), &surface()).unwrap()
    }

    #[test]
    fn test_frame_records_passes_in_order() {
        let mut renderer = renderer(CompletionMode::OnWait);
        let events = renderer.device().events();
        let snapshot = Scene::demo().snapshot(0.016);
        renderer.render(&snapshot).unwrap();

        let passes: Vec<_> = events
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                GpuEvent::PassBegin(pass) => Some(pass),
                _ => None,
            })
            .collect();
        assert_eq!(passes, PASS_ORDER.to_vec());
        assert_eq!(events.count(|e| matches!(e, GpuEvent::Draw { .. })), 5);
        assert_eq!(renderer.stats().draw_calls, 5);
        assert_eq!(renderer.stats().frame_number, 1);
    }

    #[test]
    fn test_object_capacity_grows_when_idle() {
        let mut renderer = renderer(CompletionMode::OnWait);
        let mut scene = Scene::demo();
        for i in 0..6 {
            scene
                .spawn(format!("extra {i}"))
                .add_component(crate::scene::Component::MeshRenderer(crate::scene::MeshRenderer {
                    model: "cube".into(),
                    material: Default::default(),
                }));
        }
        renderer.render(&scene.snapshot(0.016)).unwrap();
        assert_eq!(renderer.object_capacity(), 16);
        assert!(renderer.shader_heap().capacity() >= 3 * 16);
        assert_eq!(renderer.stats().draw_calls, 11);
    }

    #[test]
    fn test_minimized_frames_are_skipped() {
        let mut renderer = renderer(CompletionMode::Immediate);
        renderer.resize(0, 0).unwrap();
        let stats = renderer.render(&SceneSnapshot::default()).unwrap().clone();
        assert_eq!(stats.skipped_frames, 1);
        assert_eq!(stats.frame_number, 0);

        renderer.resize(800, 600).unwrap();
        renderer.render(&SceneSnapshot::default()).unwrap();
        assert_eq!(renderer.stats().extent, (800, 600));
        assert_eq!(renderer.stats().frame_number, 1);
    }

    #[test]
    fn test_overlay_batches_sample_their_texture_inside_their_clip() {
        let mut renderer = renderer(CompletionMode::Immediate);
        let events = renderer.device().events();
        let clip = ScissorRect {
            left: 8,
            top: 8,
            right: 700,
            bottom: 100,
        };
        let offscreen = ScissorRect {
            left: 900,
            top: 0,
            right: 1000,
            bottom: 10,
        };
        let snapshot = SceneSnapshot {
            overlays: vec![
                (RenderPass::Editor, atlas_mesh(Some(clip))),
                (RenderPass::Editor, atlas_mesh(Some(offscreen))),
            ],
            texture_updates: vec![atlas_update()],
            ..Default::default()
        };
        renderer.render(&snapshot).unwrap();

        // 白色纹理与图集各拷贝一次；完全在屏幕外的网格不绘制
        assert_eq!(events.count(|e| matches!(e, GpuEvent::TextureCopy { .. })), 2);
        assert_eq!(events.count(|e| matches!(e, GpuEvent::OverlayDraw { .. })), 1);
        let clamped = ScissorRect {
            right: 640,
            ..clip
        };
        assert!(events.snapshot().contains(&GpuEvent::Scissor(clamped)));
        assert_eq!(renderer.textures().extent(ATLAS), Some((4, 2)));

        let again = SceneSnapshot {
            overlays: snapshot.overlays.clone(),
            ..Default::default()
        };
        renderer.render(&again).unwrap();
        assert_eq!(events.count(|e| matches!(e, GpuEvent::TextureCopy { .. })), 2);
        assert_eq!(events.count(|e| matches!(e, GpuEvent::OverlayDraw { .. })), 2);
    }

    #[test]
    fn test_texture_updates_wait_out_minimized_frames() {
        let mut renderer = renderer(CompletionMode::Immediate);
        renderer.resize(0, 0).unwrap();
        let snapshot = SceneSnapshot {
            texture_updates: vec![atlas_update()],
            ..Default::default()
        };
        renderer.render(&snapshot).unwrap();
        assert!(!renderer.textures().contains(ATLAS));
        assert_eq!(renderer.textures().pending_count(), 1);

        renderer.resize(640, 480).unwrap();
        renderer.render(&SceneSnapshot::default()).unwrap();
        assert!(renderer.textures().contains(ATLAS));
        assert_eq!(renderer.textures().pending_count(), 0);
    }

    #[test]
    fn test_freed_texture_outlives_its_last_frame() {
        let mut renderer = renderer(CompletionMode::Manual);
        let events = renderer.device().events();
        let timeline = renderer.device().timeline();
        let released = |events: &crate::gfx::headless::EventLog| {
            events.count(|e| matches!(e, GpuEvent::TextureReleased { .. }))
        };

        renderer
            .render(&SceneSnapshot {
                overlays: vec![(RenderPass::Editor, atlas_mesh(None))],
                texture_updates: vec![atlas_update()],
                ..Default::default()
            })
            .unwrap();
        renderer
            .render(&SceneSnapshot {
                texture_frees: vec![ATLAS],
                ..Default::default()
            })
            .unwrap();
        renderer.render(&SceneSnapshot::default()).unwrap();
        assert!(!renderer.textures().contains(ATLAS));
        assert_eq!(renderer.textures().retired_count(), 1);
        assert_eq!(released(&events), 0);

        timeline.complete_all();
        renderer.render(&SceneSnapshot::default()).unwrap();
        assert_eq!(renderer.textures().retired_count(), 0);
        assert_eq!(
            events.count(|e| matches!(e, GpuEvent::TextureReleased { in_flight: false, .. })),
            1
        );

        timeline.complete_all();
    }
}
