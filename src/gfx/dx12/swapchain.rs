//! 翻转模型交换链与 RTV / DSV

use tracing::debug;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_UNKNOWN;
use windows::Win32::Graphics::Dxgi::*;

use super::{swapchain_error, Dx12Backend};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{SurfaceDesc, Swapchain};

pub struct Dx12Swapchain {
    swapchain: IDXGISwapChain3,
    buffer_count: u32,
    extent: (u32, u32),
}

unsafe impl Send for Dx12Swapchain {}

impl Dx12Swapchain {
    pub(crate) fn new(swapchain: IDXGISwapChain1, surface: &SurfaceDesc) -> Result<Self> {
        if surface.buffer_count < 2 {
            return Err(GraphicsError::SwapchainError(format!(
                "flip-model swapchains need at least 2 buffers, got {}",
                surface.buffer_count
            ))
            .into());
        }
        let swapchain: IDXGISwapChain3 = swapchain.cast().map_err(swapchain_error("cast IDXGISwapChain3"))?;
        Ok(Self {
            swapchain,
            buffer_count: surface.buffer_count,
            extent: (surface.width, surface.height),
        })
    }

    /// 第 `index` 个后备缓冲区
    pub(crate) fn buffer(&self, index: u32) -> Result<ID3D12Resource> {
        // SAFETY: 交换链有效；越界索引由 DXGI 返回错误
        unsafe { self.swapchain.GetBuffer(index) }.map_err(swapchain_error("GetBuffer"))
    }
}

impl Swapchain<Dx12Backend> for Dx12Swapchain {
    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn current_back_buffer_index(&self) -> u32 {
        // SAFETY: 交换链有效
        unsafe { self.swapchain.GetCurrentBackBufferIndex() }
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<()> {
        // SAFETY: 调用方已释放全部后备缓冲区引用并等待 GPU 空闲
        unsafe {
            self.swapchain.ResizeBuffers(
                self.buffer_count,
                width,
                height,
                DXGI_FORMAT_UNKNOWN,
                DXGI_SWAP_CHAIN_FLAG_ALLOW_MODE_SWITCH,
            )
        }
        .map_err(swapchain_error("ResizeBuffers"))?;
        self.extent = (width, height);
        debug!(width, height, "Swapchain buffers resized");
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> Result<()> {
        // SAFETY: 当前后备缓冲区已转回 PRESENT 状态
        unsafe { self.swapchain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(swapchain_error("Present"))
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        // SAFETY: 交换链有效；None 表示使用窗口当前所在的输出
        unsafe { self.swapchain.SetFullscreenState(fullscreen, None) }
            .map_err(swapchain_error("SetFullscreenState"))
    }
}

/// 后备缓冲区的渲染目标视图；持有缓冲区引用，释放后才能 ResizeBuffers
pub struct Dx12RenderTargetView {
    _buffer: ID3D12Resource,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
}

unsafe impl Send for Dx12RenderTargetView {}

impl Dx12RenderTargetView {
    pub(crate) fn new(buffer: ID3D12Resource, handle: D3D12_CPU_DESCRIPTOR_HANDLE) -> Self {
        Self { _buffer: buffer, handle }
    }

    pub(crate) fn handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        self.handle
    }
}

/// 深度缓冲及其视图
pub struct Dx12DepthStencilView {
    _resource: ID3D12Resource,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
}

unsafe impl Send for Dx12DepthStencilView {}

impl Dx12DepthStencilView {
    pub(crate) fn new(resource: ID3D12Resource, handle: D3D12_CPU_DESCRIPTOR_HANDLE) -> Self {
        Self {
            _resource: resource,
            handle,
        }
    }

    pub(crate) fn handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        self.handle
    }
}
