//! Headless 参考后端
//!
//! 不依赖任何图形 API 的设备实现。GPU 被模拟为一条 fence 时间线：
//! 提交的工作在 `signal` 之后处于“执行中”，直到时间线推进到对应值。
//! 推进方式由 `CompletionMode` 决定。
//!
//! 与 D3D12 调试层一样，本后端会拒绝以下操作并返回 `GraphicsError::Validation`：
//! - 重置仍被 GPU 使用的命令分配器
//! - 写入仍被 GPU 读取的上传缓冲区
//! - 仍有视图引用后备缓冲区、或 GPU 仍忙时调整交换链大小
//! - 后备缓冲区不在 `Present` 状态时呈现
//!
//! 所有操作都会追加到共享的 `EventLog`，测试通过它检查命令顺序。
//! 日志是有界的环形缓冲，超出容量时丢弃最旧的事件。

mod command;
mod queue;
mod resource;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    AdapterInfo, Backend, CpuDescriptorHandle, Device, FeatureLevel, GpuAddress, Instance,
    InstanceDesc, NativeHeapDesc, PipelineKind, ResourceState, ScissorRect, SurfaceDesc,
};
use crate::renderer::pass::RenderPass;
use crate::renderer::vertex::MeshVertex;

pub use command::{HeadlessCommandAllocator, HeadlessCommandList};
pub use queue::{HeadlessQueue, HeadlessTimeline};
pub use resource::{
    HeadlessDepthStencilView, HeadlessDescriptorHeap, HeadlessMesh, HeadlessRenderTargetView,
    HeadlessSwapchain, HeadlessTexture, HeadlessUploadBuffer,
};

use queue::{Shared, View};

/// 相邻描述符之间的字节距离
pub const DESCRIPTOR_INCREMENT: u32 = 32;

/// 测试用实例保留的事件数
pub const DEFAULT_EVENT_CAPACITY: usize = 1 << 16;
/// `Instance::create`（无窗口运行）保留的事件数
pub const RUNTIME_EVENT_CAPACITY: usize = 1024;

/// 模拟 GPU 的完成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// `signal` 后立即完成
    Immediate,
    /// CPU 等待某个值时，GPU 恰好完成到该值
    #[default]
    OnWait,
    /// 只有 `HeadlessTimeline::complete_up_to` 能推进时间线
    Manual,
}

/// 视图种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Rtv,
    Dsv,
}

/// 设备事件
#[derive(Debug, Clone, PartialEq)]
pub enum GpuEvent {
    HeapCreated { heap_type: crate::gfx::DescriptorHeapType, capacity: u32 },
    CommandListReset { list: u64, allocator: u64 },
    CommandListClosed { list: u64 },
    PassBegin(RenderPass),
    PassEnd(RenderPass),
    PipelineBound(PipelineKind),
    HeapsBound { count: usize },
    Transition { buffer: u32, before: ResourceState, after: ResourceState },
    RenderTargetSet { buffer: u32 },
    ClearColor { buffer: u32 },
    ClearDepth,
    RootTable { slot: u32, handle: u64 },
    Scissor(ScissorRect),
    RootConstantBuffer { slot: u32, address: GpuAddress },
    RootConstants { slot: u32, count: usize },
    Draw { mesh: u64, index_count: u32 },
    OverlayDraw { index_count: u32 },
    Executed { list: u64, draws: u32 },
    Signaled(u64),
    Completed(u64),
    CpuWait(u64),
    UploadWrite { buffer: u64, offset: u64, len: usize },
    Present { buffer: u32, interval: u32 },
    ResizeBuffers { width: u32, height: u32 },
    FullscreenChanged(bool),
    ViewCreated { kind: ViewKind, width: u32, height: u32 },
    ViewReleased { kind: ViewKind },
    TextureCreated { texture: u64, width: u32, height: u32 },
    TextureCopy { texture: u64, x: u32, y: u32, width: u32, height: u32 },
    TextureReleased { texture: u64, in_flight: bool },
}

#[derive(Debug)]
struct EventRing {
    events: VecDeque<GpuEvent>,
    capacity: usize,
    dropped: u64,
}

/// 共享事件日志（有界；容量为 0 时不记录）
#[derive(Debug, Clone)]
pub struct EventLog(Arc<Mutex<EventRing>>);

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(EventRing {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        })))
    }

    pub(crate) fn push(&self, event: GpuEvent) {
        let mut ring = self.0.lock();
        if ring.capacity == 0 {
            ring.dropped += 1;
            return;
        }
        if ring.events.len() == ring.capacity {
            ring.events.pop_front();
            ring.dropped += 1;
        }
        ring.events.push_back(event);
    }

    /// 当前保留的事件的拷贝
    pub fn snapshot(&self) -> Vec<GpuEvent> {
        self.0.lock().events.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.0.lock().events.clear();
    }

    pub fn len(&self) -> usize {
        self.0.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.0.lock().capacity
    }

    /// 因容量限制被丢弃的事件数
    pub fn dropped(&self) -> u64 {
        self.0.lock().dropped
    }

    pub fn count(&self, predicate: impl Fn(&GpuEvent) -> bool) -> usize {
        self.0.lock().events.iter().filter(|e| predicate(e)).count()
    }
}

/// Headless 后端类型族
#[derive(Debug)]
pub enum HeadlessBackend {}

impl Backend for HeadlessBackend {
    const NAME: &'static str = "Headless";

    type Instance = HeadlessInstance;
    type Device = HeadlessDevice;
    type Queue = HeadlessQueue;
    type CommandAllocator = HeadlessCommandAllocator;
    type CommandList = HeadlessCommandList;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type UploadBuffer = HeadlessUploadBuffer;
    type Mesh = HeadlessMesh;
    type Texture = HeadlessTexture;
    type Swapchain = HeadlessSwapchain;
    type RenderTargetView = HeadlessRenderTargetView;
    type DepthStencilView = HeadlessDepthStencilView;
}

/// 默认的唯一适配器
pub fn reference_adapter() -> AdapterInfo {
    AdapterInfo {
        name: "Headless Reference Adapter".to_string(),
        vendor_id: 0x1414,
        device_id: 0x0001,
        dedicated_video_memory: 1 << 30,
        is_software: false,
        max_feature_level: FeatureLevel::Level12_0,
    }
}

/// Headless 实例
#[derive(Debug, Clone)]
pub struct HeadlessInstance {
    adapters: Vec<AdapterInfo>,
    mode: CompletionMode,
    event_capacity: usize,
}

impl HeadlessInstance {
    pub fn with_mode(mode: CompletionMode) -> Self {
        Self::with_adapters(vec![reference_adapter()], mode)
    }

    pub fn with_adapters(adapters: Vec<AdapterInfo>, mode: CompletionMode) -> Self {
        Self {
            adapters,
            mode,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// 之后创建的设备的事件日志容量；0 表示不记录
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Instance<HeadlessBackend> for HeadlessInstance {
    fn create(desc: &InstanceDesc) -> Result<Self> {
        if desc.debug_layer {
            tracing::debug!("Headless backend always validates, debug layer flag ignored");
        }
        Ok(Self::with_mode(CompletionMode::default()).with_event_capacity(RUNTIME_EVENT_CAPACITY))
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        Ok(self.adapters.clone())
    }

    fn create_device(&self, adapter: usize, level: FeatureLevel) -> Result<HeadlessDevice> {
        let info = self.adapters.get(adapter).ok_or_else(|| {
            GraphicsError::DeviceCreation(format!("adapter index {adapter} out of range"))
        })?;

        if !info.supports(level) {
            return Err(GraphicsError::DeviceCreation(format!(
                "'{}' does not support feature level {}",
                info.name, level
            ))
            .into());
        }

        tracing::info!(adapter = %info.name, feature_level = %level, "Headless device created");
        Ok(HeadlessDevice {
            shared: Arc::new(Shared::new(self.mode, EventLog::with_capacity(self.event_capacity))),
            adapter: info.clone(),
        })
    }
}

/// Headless 设备
pub struct HeadlessDevice {
    shared: Arc<Shared>,
    adapter: AdapterInfo,
}

impl HeadlessDevice {
    /// 时间线句柄，可在其他线程推进 GPU 进度
    pub fn timeline(&self) -> HeadlessTimeline {
        HeadlessTimeline::new(self.shared.clone())
    }

    pub fn events(&self) -> EventLog {
        self.shared.events.clone()
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }
}

impl Device<HeadlessBackend> for HeadlessDevice {
    fn create_queue(&self) -> Result<HeadlessQueue> {
        Ok(HeadlessQueue::new(self.shared.clone()))
    }

    fn create_command_allocator(&self, name: &str) -> Result<HeadlessCommandAllocator> {
        Ok(HeadlessCommandAllocator::new(self.shared.next_id(), name))
    }

    fn create_command_list(&self, _allocator: &HeadlessCommandAllocator) -> Result<HeadlessCommandList> {
        Ok(HeadlessCommandList::new(self.shared.clone()))
    }

    fn create_descriptor_heap(&self, desc: &NativeHeapDesc) -> Result<HeadlessDescriptorHeap> {
        HeadlessDescriptorHeap::new(self.shared.clone(), desc)
    }

    fn create_upload_buffer(&self, size: u64, name: &str) -> Result<HeadlessUploadBuffer> {
        HeadlessUploadBuffer::new(self.shared.clone(), size, name)
    }

    fn create_constant_buffer_view(&self, dest: CpuDescriptorHandle, address: GpuAddress, size: u32) {
        if size % 256 != 0 {
            tracing::error!(size, "Constant buffer view size must be a multiple of 256");
        }
        self.shared.state.lock().views.insert(dest.ptr, View::Cbv(address));
    }

    fn create_texture(&self, width: u32, height: u32, name: &str) -> Result<HeadlessTexture> {
        HeadlessTexture::new(self.shared.clone(), width, height, name)
    }

    fn create_shader_resource_view(&self, texture: &HeadlessTexture, dest: CpuDescriptorHandle) {
        self.shared
            .state
            .lock()
            .views
            .insert(dest.ptr, View::Srv(texture.id()));
    }

    fn create_mesh(&self, vertices: &[MeshVertex], indices: &[u16]) -> Result<HeadlessMesh> {
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(GraphicsError::ResourceCreation(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            ))
            .into());
        }
        Ok(HeadlessMesh::new(self.shared.next_id(), vertices.len(), indices.len()))
    }

    fn create_swapchain(&self, _queue: &HeadlessQueue, surface: &SurfaceDesc) -> Result<HeadlessSwapchain> {
        HeadlessSwapchain::new(self.shared.clone(), surface)
    }

    fn create_render_target_view(
        &self,
        swapchain: &HeadlessSwapchain,
        index: u32,
        dest: CpuDescriptorHandle,
    ) -> Result<HeadlessRenderTargetView> {
        swapchain.create_view(index, dest)
    }

    fn create_depth_stencil_view(
        &self,
        width: u32,
        height: u32,
        dest: CpuDescriptorHandle,
    ) -> Result<HeadlessDepthStencilView> {
        Ok(HeadlessDepthStencilView::new(self.shared.clone(), width, height, dest))
    }
}
