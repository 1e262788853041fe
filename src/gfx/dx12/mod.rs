//! DirectX 12 后端
//!
//! 通过 `windows` crate 实现 `gfx` 的 trait 族。所有 COM 调用都集中在本模块，
//! 渲染器只看到 `Backend` 的关联类型。
//!
//! # 组成
//!
//! - `instance`：DXGI 工厂、调试层、适配器枚举与设备创建
//! - `device`：资源与视图的工厂
//! - `queue`：直接命令队列与 fence
//! - `command`：命令分配器与图形命令列表
//! - `swapchain`：翻转模型交换链、RTV / DSV
//! - `resource`：描述符堆、上传缓冲区、网格、纹理
//! - `pipeline`：两个内置管线（几何、叠加层）的根签名与 PSO

mod command;
mod device;
mod instance;
mod pipeline;
mod queue;
mod resource;
mod swapchain;

use crate::core::error::{EngineError, GraphicsError};
use crate::gfx::Backend;

pub use command::{Dx12CommandAllocator, Dx12CommandList};
pub use device::Dx12Device;
pub use instance::Dx12Instance;
pub use queue::Dx12Queue;
pub use resource::{Dx12DescriptorHeap, Dx12Mesh, Dx12Texture, Dx12UploadBuffer};
pub use swapchain::{Dx12DepthStencilView, Dx12RenderTargetView, Dx12Swapchain};

/// DirectX 12 类型族
pub enum Dx12Backend {}

impl Backend for Dx12Backend {
    const NAME: &'static str = "DX12";

    type Instance = Dx12Instance;
    type Device = Dx12Device;
    type Queue = Dx12Queue;
    type CommandAllocator = Dx12CommandAllocator;
    type CommandList = Dx12CommandList;
    type DescriptorHeap = Dx12DescriptorHeap;
    type UploadBuffer = Dx12UploadBuffer;
    type Mesh = Dx12Mesh;
    type Texture = Dx12Texture;
    type Swapchain = Dx12Swapchain;
    type RenderTargetView = Dx12RenderTargetView;
    type DepthStencilView = Dx12DepthStencilView;
}

/// 把 HRESULT 错误包装成带上下文的图形错误
pub(crate) fn device_error(context: &str) -> impl FnOnce(windows::core::Error) -> EngineError + '_ {
    move |e| GraphicsError::DeviceCreation(format!("{context}: {e}")).into()
}

pub(crate) fn resource_error(context: &str) -> impl FnOnce(windows::core::Error) -> EngineError + '_ {
    move |e| GraphicsError::ResourceCreation(format!("{context}: {e}")).into()
}

pub(crate) fn command_error(context: &str) -> impl FnOnce(windows::core::Error) -> EngineError + '_ {
    move |e| GraphicsError::CommandExecution(format!("{context}: {e}")).into()
}

pub(crate) fn swapchain_error(context: &str) -> impl FnOnce(windows::core::Error) -> EngineError + '_ {
    move |e| GraphicsError::SwapchainError(format!("{context}: {e}")).into()
}

/// 给 D3D12 对象设置调试名称（PIX / 调试层输出中可见）
pub(crate) fn set_name<T: windows::core::Interface>(object: &T, name: &str) {
    use windows::Win32::Graphics::Direct3D12::ID3D12Object;

    let Ok(object) = object.cast::<ID3D12Object>() else {
        return;
    };
    let wide = windows::core::HSTRING::from(name);
    // SAFETY: HSTRING 在调用期间保持有效
    if let Err(e) = unsafe { object.SetName(&wide) } {
        tracing::trace!(name, error = %e, "SetName failed");
    }
}
