//! 图形后端模块
//!
//! 本模块定义渲染器与底层图形 API 之间的接口，并提供两个实现：
//! - `dx12`：通过 `windows` crate 访问 DirectX 12（仅 Windows）
//! - `headless`：模拟 GPU 时间线的参考设备，记录事件日志，供测试与无窗口运行使用
//!
//! 接口按 gfx-hal 的方式组织：`Backend` 只声明关联类型，
//! 每种对象（实例、设备、队列、命令列表、交换链……）各有一个 trait，
//! 以 `B: Backend` 为参数互相引用。渲染器、帧同步和描述符堆管理
//! 都只依赖这些 trait，不直接接触任何图形 API。

use raw_window_handle::RawWindowHandle;

use crate::core::error::Result;
use crate::renderer::pass::RenderPass;
use crate::renderer::sync::FenceValue;
use crate::renderer::vertex::MeshVertex;

pub mod adapter;
pub mod headless;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use adapter::{AdapterInfo, FeatureLevel};

/// GPU 虚拟地址
pub type GpuAddress = u64;

/// 一段 GPU 可见缓冲区（顶点 / 索引数据）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBufferRange {
    pub address: GpuAddress,
    pub size: u64,
    /// 单个元素的字节数；索引缓冲为 2（R16_UINT）或 4（R32_UINT）
    pub stride: u32,
}

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// 渲染目标视图
    Rtv,
    /// 深度模板视图
    Dsv,
    /// 常量缓冲 / 着色资源 / 无序访问视图
    CbvSrvUav,
    /// 采样器
    Sampler,
}

impl DescriptorHeapType {
    /// RTV / DSV 堆永远不是着色器可见的
    pub fn is_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapType::Rtv => "RTV",
            DescriptorHeapType::Dsv => "DSV",
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "Sampler",
        }
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
        }
    }
}

/// 创建原生描述符堆的参数
#[derive(Debug, Clone)]
pub struct NativeHeapDesc {
    pub heap_type: DescriptorHeapType,
    pub capacity: u32,
    pub name: String,
}

/// 内置管线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// 场景几何：b0 逐对象（描述符表）、b1 逐帧、b2 光照（根 CBV）
    Geometry,
    /// UI / 编辑器叠加层：b0 根常量（屏幕尺寸）、t0 纹理（描述符表）、s0 静态线性采样器
    Overlay,
}

/// 纹理拷贝源中每行字节数的对齐（D3D12_TEXTURE_DATA_PITCH_ALIGNMENT）
pub const TEXTURE_PITCH_ALIGNMENT: u64 = 256;
/// 纹理拷贝源起始偏移的对齐（D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT）
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;
/// RGBA8 每像素字节数
pub const TEXEL_SIZE: u64 = 4;

/// 从上传缓冲区拷贝一块 RGBA8 像素到纹理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCopy {
    /// 源数据在上传缓冲区中的偏移，按 `TEXTURE_PLACEMENT_ALIGNMENT` 对齐
    pub source_offset: u64,
    /// 源数据每行字节数，按 `TEXTURE_PITCH_ALIGNMENT` 对齐
    pub row_pitch: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureCopy {
    /// 紧凑行宽向上对齐后的行距
    pub fn pitch_for(width: u32) -> u32 {
        let tight = u64::from(width) * TEXEL_SIZE;
        (tight.div_ceil(TEXTURE_PITCH_ALIGNMENT) * TEXTURE_PITCH_ALIGNMENT) as u32
    }

    /// 源数据占用的字节数（最后一行不需要补齐）
    pub fn source_size(&self) -> u64 {
        if self.height == 0 {
            return 0;
        }
        u64::from(self.row_pitch) * u64::from(self.height - 1) + u64::from(self.width) * TEXEL_SIZE
    }
}

/// 后备缓冲区资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }

    /// 裁剪到 `[0, width) x [0, height)`
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (width, height) = (width as i32, height as i32);
        Self {
            left: self.left.clamp(0, width),
            top: self.top.clamp(0, height),
            right: self.right.clamp(0, width),
            bottom: self.bottom.clamp(0, height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// 实例创建参数
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceDesc {
    pub debug_layer: bool,
}

/// 交换链的目标表面
#[derive(Debug, Clone, Copy)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    /// 无窗口运行时为 `None`
    pub window: Option<RawWindowHandle>,
}

/// 后端的类型族
pub trait Backend: Sized + 'static {
    /// 日志中使用的后端名称
    const NAME: &'static str;

    type Instance: Instance<Self>;
    type Device: Device<Self>;
    type Queue: CommandQueue<Self>;
    type CommandAllocator: Send;
    type CommandList: CommandList<Self>;
    type DescriptorHeap: NativeDescriptorHeap;
    type UploadBuffer: UploadMemory;
    type Mesh: Send;
    /// 着色器采样的 RGBA8 纹理（默认堆）
    type Texture: Send;
    type Swapchain: Swapchain<Self>;
    type RenderTargetView: Send;
    type DepthStencilView: Send;
}

/// 图形 API 入口：枚举适配器并创建设备
pub trait Instance<B: Backend>: Sized {
    fn create(desc: &InstanceDesc) -> Result<Self>;

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>>;

    /// 在 `enumerate_adapters` 返回的第 `adapter` 个适配器上创建设备
    fn create_device(&self, adapter: usize, level: FeatureLevel) -> Result<B::Device>;
}

/// 逻辑设备：所有 GPU 对象的工厂
pub trait Device<B: Backend>: Send {
    /// 创建直接（图形）命令队列及其 fence
    fn create_queue(&self) -> Result<B::Queue>;

    fn create_command_allocator(&self, name: &str) -> Result<B::CommandAllocator>;

    /// 创建的命令列表处于关闭状态，录制前需要 `reset`
    fn create_command_list(&self, allocator: &B::CommandAllocator) -> Result<B::CommandList>;

    fn create_descriptor_heap(&self, desc: &NativeHeapDesc) -> Result<B::DescriptorHeap>;

    /// 创建持久映射的上传堆缓冲区
    fn create_upload_buffer(&self, size: u64, name: &str) -> Result<B::UploadBuffer>;

    /// 在 `dest` 处写入一个 CBV，指向 `[address, address + size)`
    fn create_constant_buffer_view(&self, dest: CpuDescriptorHandle, address: GpuAddress, size: u32);

    fn create_mesh(&self, vertices: &[MeshVertex], indices: &[u16]) -> Result<B::Mesh>;

    /// 创建 RGBA8 纹理，初始处于拷贝目标状态；第一次 `copy_to_texture` 之后才能采样
    fn create_texture(&self, width: u32, height: u32, name: &str) -> Result<B::Texture>;

    /// 在 `dest` 处写入一个指向 `texture` 的 SRV
    fn create_shader_resource_view(&self, texture: &B::Texture, dest: CpuDescriptorHandle);

    fn create_swapchain(&self, queue: &B::Queue, surface: &SurfaceDesc) -> Result<B::Swapchain>;

    fn create_render_target_view(
        &self,
        swapchain: &B::Swapchain,
        index: u32,
        dest: CpuDescriptorHandle,
    ) -> Result<B::RenderTargetView>;

    /// 创建深度缓冲（D32_FLOAT）及其视图
    fn create_depth_stencil_view(
        &self,
        width: u32,
        height: u32,
        dest: CpuDescriptorHandle,
    ) -> Result<B::DepthStencilView>;
}

/// 命令队列与其 fence
pub trait CommandQueue<B: Backend>: Send {
    fn execute(&self, list: &B::CommandList) -> Result<()>;

    /// 在队列末尾让 fence 达到 `value`
    fn signal(&self, value: FenceValue) -> Result<()>;

    /// GPU 已经到达的 fence 值
    fn completed_value(&self) -> FenceValue;

    /// 阻塞直到 fence 达到 `value`
    fn wait_for(&self, value: FenceValue) -> Result<()>;
}

/// 图形命令列表
///
/// 录制方法本身不返回错误；后端记录的第一个录制错误由 `close` 报告。
pub trait CommandList<B: Backend>: Send {
    /// 重置命令分配器与列表；分配器上一次提交的工作必须已完成
    fn reset(&mut self, allocator: &mut B::CommandAllocator) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn begin_pass(&mut self, pass: RenderPass);

    fn end_pass(&mut self, pass: RenderPass);

    fn bind_pipeline(&mut self, pipeline: PipelineKind);

    fn set_descriptor_heaps(&mut self, heaps: &[&B::DescriptorHeap]);

    fn transition(
        &mut self,
        swapchain: &B::Swapchain,
        index: u32,
        before: ResourceState,
        after: ResourceState,
    );

    fn set_render_target(&mut self, rtv: &B::RenderTargetView, dsv: Option<&B::DepthStencilView>);

    fn clear_render_target(&mut self, rtv: &B::RenderTargetView, color: [f32; 4]);

    fn clear_depth_stencil(&mut self, dsv: &B::DepthStencilView, depth: f32);

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_scissor(&mut self, rect: ScissorRect);

    fn set_root_descriptor_table(&mut self, slot: u32, handle: GpuDescriptorHandle);

    fn set_root_constant_buffer(&mut self, slot: u32, address: GpuAddress);

    fn set_root_constants(&mut self, slot: u32, values: &[u32]);

    fn draw_mesh(&mut self, mesh: &B::Mesh);

    fn draw_overlay(&mut self, vertices: GpuBufferRange, indices: GpuBufferRange, index_count: u32);

    /// 把上传缓冲区中的像素拷贝进纹理，之后纹理处于可采样状态。必须在渲染通道之外录制。
    fn copy_to_texture(&mut self, texture: &mut B::Texture, source: &B::UploadBuffer, copy: TextureCopy);
}

/// 交换链
pub trait Swapchain<B: Backend>: Send {
    fn buffer_count(&self) -> u32;

    fn extent(&self) -> (u32, u32);

    fn current_back_buffer_index(&self) -> u32;

    /// 调整后备缓冲区大小；所有引用后备缓冲区的视图必须先释放
    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<()>;

    /// 以给定的同步间隔呈现（1 = 垂直同步，0 = 立即）
    fn present(&mut self, sync_interval: u32) -> Result<()>;

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()>;
}

/// 原生描述符堆
pub trait NativeDescriptorHeap: Send {
    fn heap_type(&self) -> DescriptorHeapType;

    fn capacity(&self) -> u32;

    /// 相邻描述符之间的字节距离
    fn increment_size(&self) -> u32;

    fn cpu_start(&self) -> CpuDescriptorHandle;

    /// 非着色器可见堆返回 `None`
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
}

/// 持久映射的上传内存
///
/// 创建时映射一次，析构时解除映射。
pub trait UploadMemory: Send {
    fn size(&self) -> u64;

    fn gpu_address(&self) -> GpuAddress;

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_copy_pitch() {
        assert_eq!(TextureCopy::pitch_for(1), 256);
        assert_eq!(TextureCopy::pitch_for(64), 256);
        assert_eq!(TextureCopy::pitch_for(65), 512);
        let copy = TextureCopy {
            source_offset: 0,
            row_pitch: 512,
            x: 0,
            y: 0,
            width: 100,
            height: 3,
        };
        assert_eq!(copy.source_size(), 512 * 2 + 400);
    }

    #[test]
    fn test_scissor_clamp() {
        let rect = ScissorRect { left: -10, top: 5, right: 900, bottom: 700 };
        assert_eq!(
            rect.clamp_to(800, 600),
            ScissorRect { left: 0, top: 5, right: 800, bottom: 600 }
        );
        let outside = ScissorRect { left: 900, top: 0, right: 950, bottom: 10 };
        assert!(outside.clamp_to(800, 600).is_empty());
        assert!(!ScissorRect::full(1, 1).is_empty());
    }
}
