//! 描述符堆、上传缓冲区、网格、交换链与视图

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::queue::{BufferRange, HeapRange, Shared, TextureInfo, Tracked};
use super::{GpuEvent, HeadlessBackend, ViewKind, DESCRIPTOR_INCREMENT};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    CpuDescriptorHandle, DescriptorHeapType, GpuAddress, GpuDescriptorHandle, NativeDescriptorHeap,
    NativeHeapDesc, ResourceState, SurfaceDesc, Swapchain, UploadMemory,
};

/// 描述符堆
pub struct HeadlessDescriptorHeap {
    id: u64,
    shared: Arc<Shared>,
    heap_type: DescriptorHeapType,
    capacity: u32,
    cpu_start: usize,
    gpu_start: Option<u64>,
}

impl HeadlessDescriptorHeap {
    pub(crate) fn new(shared: Arc<Shared>, desc: &NativeHeapDesc) -> Result<Self> {
        if desc.capacity == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "descriptor heap '{}' created with zero capacity",
                desc.name
            ))
            .into());
        }

        let id = shared.next_id();
        let shader_visible = desc.heap_type.is_shader_visible();
        let (cpu_start, gpu_start) = {
            let mut state = shared.state.lock();
            let (cpu, gpu) = state.allocate_handles(desc.capacity, shader_visible);
            if let Some(gpu) = gpu {
                state.shader_heaps.insert(
                    id,
                    HeapRange {
                        cpu_start: cpu,
                        gpu_start: gpu,
                        capacity: desc.capacity,
                    },
                );
            }
            (cpu, gpu)
        };

        shared.events.push(GpuEvent::HeapCreated {
            heap_type: desc.heap_type,
            capacity: desc.capacity,
        });

        Ok(Self {
            id,
            shared,
            heap_type: desc.heap_type,
            capacity: desc.capacity,
            cpu_start,
            gpu_start,
        })
    }
}

impl NativeDescriptorHeap for HeadlessDescriptorHeap {
    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn increment_size(&self) -> u32 {
        DESCRIPTOR_INCREMENT
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle { ptr: self.cpu_start }
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start.map(|ptr| GpuDescriptorHandle { ptr })
    }
}

impl Drop for HeadlessDescriptorHeap {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.shader_heaps.remove(&self.id);
        let end = self.cpu_start + self.capacity as usize * DESCRIPTOR_INCREMENT as usize;
        state.views.retain(|&cpu, _| cpu < self.cpu_start || cpu >= end);
    }
}

/// 上传缓冲区
pub struct HeadlessUploadBuffer {
    id: u64,
    name: String,
    shared: Arc<Shared>,
    address: GpuAddress,
    data: Vec<u8>,
}

impl HeadlessUploadBuffer {
    pub(crate) fn new(shared: Arc<Shared>, size: u64, name: &str) -> Result<Self> {
        if size == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "upload buffer '{name}' created with zero size"
            ))
            .into());
        }

        let id = shared.next_id();
        let address = {
            let mut state = shared.state.lock();
            let address = state.allocate_address(size);
            state.buffers.insert(
                id,
                BufferRange {
                    id,
                    base: address,
                    size,
                },
            );
            address
        };

        Ok(Self {
            id,
            name: name.to_string(),
            shared,
            address,
            data: vec![0; size as usize],
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// CPU 侧映射内存的当前内容
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl UploadMemory for HeadlessUploadBuffer {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len() as u64;
        if end > self.size() {
            return Err(GraphicsError::Validation(format!(
                "write of {} bytes at {offset} overflows upload buffer '{}' ({} bytes)",
                bytes.len(),
                self.name,
                self.size()
            ))
            .into());
        }

        {
            let state = self.shared.state.lock();
            if let Some(fence) = state.in_use(Tracked::Buffer(self.id)) {
                return Err(GraphicsError::Validation(format!(
                    "upload buffer '{}' written while the GPU still reads it (fence {fence}, completed {})",
                    self.name, state.completed
                ))
                .into());
            }
        }

        self.data[offset as usize..end as usize].copy_from_slice(bytes);
        self.shared.events.push(GpuEvent::UploadWrite {
            buffer: self.id,
            offset,
            len: bytes.len(),
        });
        Ok(())
    }
}

impl Drop for HeadlessUploadBuffer {
    fn drop(&mut self) {
        self.shared.state.lock().buffers.remove(&self.id);
    }
}

/// 网格
#[derive(Debug)]
pub struct HeadlessMesh {
    id: u64,
    vertex_count: usize,
    index_count: usize,
}

impl HeadlessMesh {
    pub(crate) fn new(id: u64, vertex_count: usize, index_count: usize) -> Self {
        Self {
            id,
            vertex_count,
            index_count,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count as u32
    }
}

/// RGBA8 纹理
///
/// 释放时如果 GPU 仍在读取它，记录错误并在事件日志里标出。
pub struct HeadlessTexture {
    id: u64,
    shared: Arc<Shared>,
    width: u32,
    height: u32,
}

impl HeadlessTexture {
    pub(crate) fn new(shared: Arc<Shared>, width: u32, height: u32, name: &str) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture '{name}' created with empty extent {width}x{height}"
            ))
            .into());
        }

        let id = shared.next_id();
        shared.state.lock().textures.insert(
            id,
            TextureInfo {
                width,
                height,
                written: false,
            },
        );
        shared.events.push(GpuEvent::TextureCreated { texture: id, width, height });
        Ok(Self {
            id,
            shared,
            width,
            height,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for HeadlessTexture {
    fn drop(&mut self) {
        let in_flight = {
            let mut state = self.shared.state.lock();
            state.textures.remove(&self.id);
            state.in_use(Tracked::Texture(self.id))
        };
        if let Some(fence) = in_flight {
            tracing::error!(texture = self.id, fence, "Texture released while the GPU still samples it");
        }
        self.shared.events.push(GpuEvent::TextureReleased {
            texture: self.id,
            in_flight: in_flight.is_some(),
        });
    }
}

/// 交换链
pub struct HeadlessSwapchain {
    shared: Arc<Shared>,
    extent: (u32, u32),
    current: u32,
    fullscreen: bool,
    states: Arc<Mutex<Vec<ResourceState>>>,
    live_views: Arc<AtomicUsize>,
}

impl HeadlessSwapchain {
    pub(crate) fn new(shared: Arc<Shared>, surface: &SurfaceDesc) -> Result<Self> {
        if surface.buffer_count < 2 {
            return Err(GraphicsError::SwapchainError(format!(
                "flip-model swapchains need at least 2 buffers, got {}",
                surface.buffer_count
            ))
            .into());
        }

        Ok(Self {
            shared,
            extent: (surface.width, surface.height),
            current: 0,
            fullscreen: false,
            states: Arc::new(Mutex::new(vec![
                ResourceState::Present;
                surface.buffer_count as usize
            ])),
            live_views: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// 仍然引用后备缓冲区的视图数量
    pub fn live_views(&self) -> usize {
        self.live_views.load(Ordering::Acquire)
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub(crate) fn create_view(&self, index: u32, dest: CpuDescriptorHandle) -> Result<HeadlessRenderTargetView> {
        if index >= self.buffer_count() {
            return Err(GraphicsError::ResourceCreation(format!(
                "back buffer {index} does not exist"
            ))
            .into());
        }

        self.live_views.fetch_add(1, Ordering::AcqRel);
        self.shared.events.push(GpuEvent::ViewCreated {
            kind: ViewKind::Rtv,
            width: self.extent.0,
            height: self.extent.1,
        });
        Ok(HeadlessRenderTargetView {
            shared: self.shared.clone(),
            buffer_index: index,
            handle: dest,
            extent: self.extent,
            live_views: self.live_views.clone(),
        })
    }

    pub(crate) fn transition(
        &self,
        index: u32,
        before: ResourceState,
        after: ResourceState,
    ) -> std::result::Result<(), String> {
        let mut states = self.states.lock();
        let state = states
            .get_mut(index as usize)
            .ok_or_else(|| format!("transition of missing back buffer {index}"))?;
        if *state != before {
            return Err(format!(
                "back buffer {index} transitioned from {before:?} but is in {state:?}"
            ));
        }
        *state = after;
        Ok(())
    }
}

impl Swapchain<HeadlessBackend> for HeadlessSwapchain {
    fn buffer_count(&self) -> u32 {
        self.states.lock().len() as u32
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<()> {
        let live = self.live_views();
        if live > 0 {
            return Err(GraphicsError::Validation(format!(
                "ResizeBuffers called while {live} views still reference back buffers"
            ))
            .into());
        }
        {
            let state = self.shared.state.lock();
            if state.signaled > state.completed {
                return Err(GraphicsError::Validation(format!(
                    "ResizeBuffers called while the GPU is busy (signaled {}, completed {})",
                    state.signaled, state.completed
                ))
                .into());
            }
        }

        self.extent = (width, height);
        self.current = 0;
        self.states
            .lock()
            .iter_mut()
            .for_each(|s| *s = ResourceState::Present);
        self.shared.events.push(GpuEvent::ResizeBuffers { width, height });
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> Result<()> {
        let state = self.states.lock()[self.current as usize];
        if state != ResourceState::Present {
            return Err(GraphicsError::Validation(format!(
                "back buffer {} presented while in {state:?}",
                self.current
            ))
            .into());
        }

        self.shared.events.push(GpuEvent::Present {
            buffer: self.current,
            interval: sync_interval,
        });
        self.current = (self.current + 1) % self.buffer_count();
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.fullscreen = fullscreen;
        self.shared.events.push(GpuEvent::FullscreenChanged(fullscreen));
        Ok(())
    }
}

/// 渲染目标视图
pub struct HeadlessRenderTargetView {
    shared: Arc<Shared>,
    buffer_index: u32,
    handle: CpuDescriptorHandle,
    extent: (u32, u32),
    live_views: Arc<AtomicUsize>,
}

impl HeadlessRenderTargetView {
    pub fn buffer_index(&self) -> u32 {
        self.buffer_index
    }

    pub fn handle(&self) -> CpuDescriptorHandle {
        self.handle
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }
}

impl Drop for HeadlessRenderTargetView {
    fn drop(&mut self) {
        self.live_views.fetch_sub(1, Ordering::AcqRel);
        self.shared
            .events
            .push(GpuEvent::ViewReleased { kind: ViewKind::Rtv });
    }
}

/// 深度模板视图及其深度缓冲
pub struct HeadlessDepthStencilView {
    shared: Arc<Shared>,
    handle: CpuDescriptorHandle,
    extent: (u32, u32),
}

impl HeadlessDepthStencilView {
    pub(crate) fn new(shared: Arc<Shared>, width: u32, height: u32, handle: CpuDescriptorHandle) -> Self {
        shared.events.push(GpuEvent::ViewCreated {
            kind: ViewKind::Dsv,
            width,
            height,
        });
        Self {
            shared,
            handle,
            extent: (width, height),
        }
    }

    pub fn handle(&self) -> CpuDescriptorHandle {
        self.handle
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }
}

impl Drop for HeadlessDepthStencilView {
    fn drop(&mut self) {
        self.shared
            .events
            .push(GpuEvent::ViewReleased { kind: ViewKind::Dsv });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{CompletionMode, HeadlessInstance};
    use crate::gfx::{Device, FeatureLevel, Instance};

    fn device() -> crate::gfx::headless::HeadlessDevice {
        HeadlessInstance::with_mode(CompletionMode::Manual)
            .create_device(0, FeatureLevel::Level12_0)
            .unwrap()
    }

    #[test]
    fn test_upload_write_bounds() {
        let device = device();
        let mut buffer = device.create_upload_buffer(256, "cb").unwrap();
        assert!(buffer.write(0, &[1; 256]).is_ok());
        assert!(buffer.write(250, &[1; 8]).is_err());
        assert_eq!(buffer.contents()[0], 1);
    }

    #[test]
    fn test_texture_release_reports_gpu_use() {
        use crate::gfx::{CommandList, CommandQueue, TextureCopy};
        use crate::renderer::sync::FenceValue;

        let device = device();
        let events = device.events();
        let queue = device.create_queue().unwrap();
        let mut allocator = device.create_command_allocator("a").unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let staging = device.create_upload_buffer(1024, "staging").unwrap();

        let mut busy = device.create_texture(2, 2, "busy").unwrap();
        let idle = device.create_texture(2, 2, "idle").unwrap();
        assert!(device.create_texture(0, 4, "empty").is_err());

        list.reset(&mut allocator).unwrap();
        let copy = TextureCopy {
            source_offset: 0,
            row_pitch: TextureCopy::pitch_for(2),
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        list.copy_to_texture(&mut busy, &staging, copy);
        list.close().unwrap();
        queue.execute(&list).unwrap();
        queue.signal(FenceValue::new(1)).unwrap();

        let (busy_id, idle_id) = (busy.id(), idle.id());
        drop(idle);
        drop(busy);
        assert!(events.snapshot().contains(&GpuEvent::TextureReleased { texture: idle_id, in_flight: false }));
        assert!(events.snapshot().contains(&GpuEvent::TextureReleased { texture: busy_id, in_flight: true }));
    }

    #[test]
    fn test_resize_with_live_view_is_rejected() {
        let device = device();
        let queue = device.create_queue().unwrap();
        let surface = SurfaceDesc {
            width: 64,
            height: 64,
            buffer_count: 2,
            window: None,
        };
        let mut swapchain = device.create_swapchain(&queue, &surface).unwrap();
        let view = device
            .create_render_target_view(&swapchain, 0, CpuDescriptorHandle { ptr: 0 })
            .unwrap();
        assert!(swapchain.resize_buffers(128, 128).is_err());
        drop(view);
        assert!(swapchain.resize_buffers(128, 128).is_ok());
        assert_eq!(swapchain.extent(), (128, 128));
    }

    #[test]
    fn test_present_requires_present_state() {
        let device = device();
        let queue = device.create_queue().unwrap();
        let surface = SurfaceDesc {
            width: 64,
            height: 64,
            buffer_count: 2,
            window: None,
        };
        let mut swapchain = device.create_swapchain(&queue, &surface).unwrap();
        swapchain
            .transition(0, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        assert!(swapchain.present(1).is_err());
        swapchain
            .transition(0, ResourceState::RenderTarget, ResourceState::Present)
            .unwrap();
        assert!(swapchain.present(1).is_ok());
        assert_eq!(swapchain.current_back_buffer_index(), 1);
    }
}
