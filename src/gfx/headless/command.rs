//! 命令分配器与命令列表

use std::sync::Arc;

use super::queue::{Shared, Tracked, View};
use super::{
    GpuEvent, HeadlessBackend, HeadlessDepthStencilView, HeadlessDescriptorHeap, HeadlessMesh,
    HeadlessRenderTargetView, HeadlessSwapchain, HeadlessTexture, HeadlessUploadBuffer,
};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    CommandList, GpuAddress, GpuBufferRange, GpuDescriptorHandle, NativeDescriptorHeap,
    PipelineKind, ResourceState, ScissorRect, TextureCopy, UploadMemory, Viewport,
    TEXEL_SIZE, TEXTURE_PITCH_ALIGNMENT, TEXTURE_PLACEMENT_ALIGNMENT,
};
use crate::renderer::pass::RenderPass;

/// 命令分配器
#[derive(Debug)]
pub struct HeadlessCommandAllocator {
    id: u64,
    name: String,
}

impl HeadlessCommandAllocator {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// 命令列表
///
/// 录制期间检查绑定状态；第一个违规被保存下来，由 `close` 返回。
pub struct HeadlessCommandList {
    id: u64,
    shared: Arc<Shared>,
    recording: bool,
    references: Vec<Tracked>,
    draws: u32,
    pass: Option<RenderPass>,
    pipeline: Option<PipelineKind>,
    heaps_bound: bool,
    error: Option<String>,
}

impl HeadlessCommandList {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let id = shared.next_id();
        Self {
            id,
            shared,
            recording: false,
            references: Vec::new(),
            draws: 0,
            pass: None,
            pipeline: None,
            heaps_bound: false,
            error: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recording
    }

    pub(crate) fn references(&self) -> &[Tracked] {
        &self.references
    }

    pub(crate) fn draw_count(&self) -> u32 {
        self.draws
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            let message = message.into();
            tracing::error!(list = self.id, %message, "Command list validation failed");
            self.error = Some(message);
        }
    }

    fn push(&self, event: GpuEvent) {
        self.shared.events.push(event);
    }

    fn require_pipeline(&mut self, what: &str) -> Option<PipelineKind> {
        if self.pass.is_none() {
            self.fail(format!("{what} recorded outside of a render pass"));
            return None;
        }
        if self.pipeline.is_none() {
            self.fail(format!("{what} recorded before a pipeline was bound in this pass"));
        }
        self.pipeline
    }

    fn reference_address(&mut self, address: GpuAddress, what: &str) {
        let buffer = self.shared.state.lock().buffer_at(address);
        match buffer {
            Some(id) => self.references.push(Tracked::Buffer(id)),
            None => self.fail(format!("{what} references unknown GPU address {address:#x}")),
        }
    }
}

impl CommandList<HeadlessBackend> for HeadlessCommandList {
    fn reset(&mut self, allocator: &mut HeadlessCommandAllocator) -> Result<()> {
        if self.recording {
            return Err(GraphicsError::Validation(format!(
                "command list {} reset while still recording",
                self.id
            ))
            .into());
        }

        {
            let state = self.shared.state.lock();
            if let Some(fence) = state.in_use(Tracked::Allocator(allocator.id)) {
                return Err(GraphicsError::Validation(format!(
                    "command allocator '{}' reset while the GPU is still executing fence {} (completed {})",
                    allocator.name, fence, state.completed
                ))
                .into());
            }
        }

        self.recording = true;
        self.references.clear();
        self.references.push(Tracked::Allocator(allocator.id));
        self.draws = 0;
        self.pass = None;
        self.pipeline = None;
        self.heaps_bound = false;
        self.error = None;
        self.push(GpuEvent::CommandListReset {
            list: self.id,
            allocator: allocator.id,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.recording {
            return Err(GraphicsError::Validation(format!(
                "command list {} closed twice",
                self.id
            ))
            .into());
        }
        if let Some(pass) = self.pass {
            self.fail(format!("command list closed inside {pass:?} pass"));
        }
        self.recording = false;
        self.push(GpuEvent::CommandListClosed { list: self.id });

        match self.error.take() {
            Some(message) => Err(GraphicsError::Validation(message).into()),
            None => Ok(()),
        }
    }

    fn begin_pass(&mut self, pass: RenderPass) {
        if let Some(open) = self.pass {
            self.fail(format!("{pass:?} pass begun while {open:?} is still open"));
        }
        // 每个通道重新建立自己的绑定状态
        self.pass = Some(pass);
        self.pipeline = None;
        self.heaps_bound = false;
        self.push(GpuEvent::PassBegin(pass));
    }

    fn end_pass(&mut self, pass: RenderPass) {
        if self.pass != Some(pass) {
            self.fail(format!("{pass:?} pass ended but {:?} is open", self.pass));
        }
        self.pass = None;
        self.push(GpuEvent::PassEnd(pass));
    }

    fn bind_pipeline(&mut self, pipeline: PipelineKind) {
        self.pipeline = Some(pipeline);
        self.push(GpuEvent::PipelineBound(pipeline));
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&HeadlessDescriptorHeap]) {
        if heaps.iter().any(|h| h.gpu_start().is_none()) {
            self.fail("SetDescriptorHeaps called with a heap that is not shader visible");
        }
        self.heaps_bound = true;
        self.push(GpuEvent::HeapsBound { count: heaps.len() });
    }

    fn transition(
        &mut self,
        swapchain: &HeadlessSwapchain,
        index: u32,
        before: ResourceState,
        after: ResourceState,
    ) {
        if let Err(message) = swapchain.transition(index, before, after) {
            self.fail(message);
        }
        self.push(GpuEvent::Transition {
            buffer: index,
            before,
            after,
        });
    }

    fn set_render_target(&mut self, rtv: &HeadlessRenderTargetView, _dsv: Option<&HeadlessDepthStencilView>) {
        self.push(GpuEvent::RenderTargetSet {
            buffer: rtv.buffer_index(),
        });
    }

    fn clear_render_target(&mut self, rtv: &HeadlessRenderTargetView, _color: [f32; 4]) {
        self.push(GpuEvent::ClearColor {
            buffer: rtv.buffer_index(),
        });
    }

    fn clear_depth_stencil(&mut self, _dsv: &HeadlessDepthStencilView, _depth: f32) {
        self.push(GpuEvent::ClearDepth);
    }

    fn set_viewport(&mut self, _viewport: Viewport) {}

    fn set_scissor(&mut self, rect: ScissorRect) {
        if rect.left < 0 || rect.top < 0 || rect.is_empty() {
            self.fail(format!("invalid scissor rectangle {rect:?}"));
        }
        self.push(GpuEvent::Scissor(rect));
    }

    fn set_root_descriptor_table(&mut self, slot: u32, handle: GpuDescriptorHandle) {
        self.require_pipeline("SetGraphicsRootDescriptorTable");
        if !self.heaps_bound {
            self.fail("descriptor table set before descriptor heaps were bound in this pass");
        }
        let view = {
            let state = self.shared.state.lock();
            state.view_at(handle.ptr).map(|view| match view {
                View::Srv(texture) => (view, state.textures.get(&texture).map(|t| t.written)),
                View::Cbv(_) => (view, None),
            })
        };
        match view {
            Some((View::Cbv(address), _)) => self.reference_address(address, "descriptor table"),
            Some((View::Srv(texture), Some(true))) => self.references.push(Tracked::Texture(texture)),
            Some((View::Srv(texture), Some(false))) => {
                self.fail(format!("texture {texture} sampled before any data was copied into it"))
            }
            Some((View::Srv(texture), None)) => {
                self.fail(format!("descriptor table {:#x} points at released texture {texture}", handle.ptr))
            }
            None => self.fail(format!("descriptor table {:#x} holds no view", handle.ptr)),
        }
        self.push(GpuEvent::RootTable {
            slot,
            handle: handle.ptr,
        });
    }

    fn set_root_constant_buffer(&mut self, slot: u32, address: GpuAddress) {
        self.require_pipeline("SetGraphicsRootConstantBufferView");
        self.reference_address(address, "root constant buffer");
        self.push(GpuEvent::RootConstantBuffer { slot, address });
    }

    fn set_root_constants(&mut self, slot: u32, values: &[u32]) {
        self.require_pipeline("SetGraphicsRoot32BitConstants");
        self.push(GpuEvent::RootConstants {
            slot,
            count: values.len(),
        });
    }

    fn draw_mesh(&mut self, mesh: &HeadlessMesh) {
        if self.require_pipeline("DrawIndexedInstanced") != Some(PipelineKind::Geometry) {
            self.fail("mesh drawn without the geometry pipeline");
        }
        self.draws += 1;
        self.push(GpuEvent::Draw {
            mesh: mesh.id(),
            index_count: mesh.index_count(),
        });
    }

    fn draw_overlay(&mut self, vertices: GpuBufferRange, indices: GpuBufferRange, index_count: u32) {
        if self.require_pipeline("DrawIndexedInstanced") != Some(PipelineKind::Overlay) {
            self.fail("overlay drawn without the overlay pipeline");
        }
        if u64::from(index_count) * u64::from(indices.stride) > indices.size {
            self.fail("overlay index count exceeds the bound index buffer");
        }
        self.reference_address(vertices.address, "overlay vertex buffer");
        self.reference_address(indices.address, "overlay index buffer");
        self.draws += 1;
        self.push(GpuEvent::OverlayDraw { index_count });
    }

    fn copy_to_texture(&mut self, texture: &mut HeadlessTexture, source: &HeadlessUploadBuffer, copy: TextureCopy) {
        if let Some(pass) = self.pass {
            self.fail(format!("texture copy recorded inside {pass:?} pass"));
        }
        let (width, height) = texture.extent();
        if copy.source_offset % TEXTURE_PLACEMENT_ALIGNMENT != 0 {
            self.fail(format!("texture copy source offset {} is not placement aligned", copy.source_offset));
        }
        if u64::from(copy.row_pitch) % TEXTURE_PITCH_ALIGNMENT != 0
            || u64::from(copy.row_pitch) < u64::from(copy.width) * TEXEL_SIZE
        {
            self.fail(format!("texture copy row pitch {} is invalid for width {}", copy.row_pitch, copy.width));
        }
        if copy.width == 0 || copy.height == 0 || copy.x + copy.width > width || copy.y + copy.height > height {
            self.fail(format!(
                "texture copy {}x{} at ({}, {}) does not fit texture {} ({width}x{height})",
                copy.width,
                copy.height,
                copy.x,
                copy.y,
                texture.id()
            ));
        }
        if copy.source_offset + copy.source_size() > source.size() {
            self.fail(format!(
                "texture copy reads past the end of upload buffer {}",
                source.id()
            ));
        }

        self.references.push(Tracked::Buffer(source.id()));
        self.references.push(Tracked::Texture(texture.id()));
        if let Some(info) = self.shared.state.lock().textures.get_mut(&texture.id()) {
            info.written = true;
        }
        self.push(GpuEvent::TextureCopy {
            texture: texture.id(),
            x: copy.x,
            y: copy.y,
            width: copy.width,
            height: copy.height,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{CompletionMode, HeadlessInstance};
    use crate::gfx::{CommandQueue, Device, FeatureLevel, Instance};
    use crate::renderer::sync::FenceValue;

    #[test]
    fn test_allocator_reset_while_in_flight_is_rejected() {
        let device = HeadlessInstance::with_mode(CompletionMode::Manual)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap();
        let queue = device.create_queue().unwrap();
        let mut allocator = device.create_command_allocator("frame 0").unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();

        list.reset(&mut allocator).unwrap();
        list.close().unwrap();
        queue.execute(&list).unwrap();
        // 尚未 signal 也视为执行中
        assert!(list.reset(&mut allocator).is_err());

        queue.signal(FenceValue::new(1)).unwrap();
        assert!(list.reset(&mut allocator).is_err());

        device.timeline().complete_up_to(1);
        assert!(list.reset(&mut allocator).is_ok());
    }

    #[test]
    fn test_draw_outside_pass_fails_on_close() {
        let device = HeadlessInstance::with_mode(CompletionMode::Immediate)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap();
        let mut allocator = device.create_command_allocator("a").unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let mesh = device
            .create_mesh(&[crate::renderer::vertex::MeshVertex::default(); 3], &[0, 1, 2])
            .unwrap();

        list.reset(&mut allocator).unwrap();
        list.draw_mesh(&mesh);
        assert!(list.close().is_err());
    }

    #[test]
    fn test_texture_table_requires_uploaded_texture() {
        use crate::gfx::{DescriptorHeapType, NativeHeapDesc, TextureCopy};

        let device = HeadlessInstance::with_mode(CompletionMode::Immediate)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap();
        let mut allocator = device.create_command_allocator("a").unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let heap = device
            .create_descriptor_heap(&NativeHeapDesc {
                heap_type: DescriptorHeapType::CbvSrvUav,
                capacity: 2,
                name: "srv".into(),
            })
            .unwrap();
        let staging = device.create_upload_buffer(4096, "staging").unwrap();
        let mut texture = device.create_texture(4, 4, "atlas").unwrap();
        device.create_shader_resource_view(&texture, heap.cpu_start());
        let table = heap.gpu_start().unwrap();

        let bind = |list: &mut HeadlessCommandList| {
            list.begin_pass(RenderPass::Ui);
            list.bind_pipeline(PipelineKind::Overlay);
            list.set_descriptor_heaps(&[&heap]);
            list.set_root_descriptor_table(1, table);
            list.end_pass(RenderPass::Ui);
        };

        list.reset(&mut allocator).unwrap();
        bind(&mut list);
        assert!(list.close().is_err());

        list.reset(&mut allocator).unwrap();
        let copy = TextureCopy {
            source_offset: 512,
            row_pitch: 256,
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        list.copy_to_texture(&mut texture, &staging, copy);
        bind(&mut list);
        assert!(list.close().is_ok());

        // 未对齐的源偏移与越界区域
        list.reset(&mut allocator).unwrap();
        list.copy_to_texture(&mut texture, &staging, TextureCopy { source_offset: 100, ..copy });
        assert!(list.close().is_err());
        list.reset(&mut allocator).unwrap();
        list.copy_to_texture(&mut texture, &staging, TextureCopy { x: 2, ..copy });
        assert!(list.close().is_err());
    }

    #[test]
    fn test_empty_scissor_is_rejected() {
        let device = HeadlessInstance::with_mode(CompletionMode::Immediate)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap();
        let mut allocator = device.create_command_allocator("a").unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        list.reset(&mut allocator).unwrap();
        list.set_scissor(ScissorRect { left: 10, top: 10, right: 10, bottom: 20 });
        assert!(list.close().is_err());
    }

    #[test]
    fn test_pipeline_state_does_not_leak_between_passes() {
        let device = HeadlessInstance::with_mode(CompletionMode::Immediate)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap();
        let mut allocator = device.create_command_allocator("a").unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let mesh = device
            .create_mesh(&[crate::renderer::vertex::MeshVertex::default(); 3], &[0, 1, 2])
            .unwrap();

        list.reset(&mut allocator).unwrap();
        list.begin_pass(RenderPass::Geometry);
        list.bind_pipeline(PipelineKind::Geometry);
        list.end_pass(RenderPass::Geometry);
        list.begin_pass(RenderPass::Ui);
        list.draw_mesh(&mesh);
        list.end_pass(RenderPass::Ui);
        assert!(list.close().is_err());
    }
}
