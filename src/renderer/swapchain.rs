//! 交换链与渲染目标
//!
//! `SwapchainTargets` 持有交换链、RTV / DSV 描述符堆、每个后备缓冲区的 RTV
//! 以及深度缓冲。调整大小的顺序固定为：
//! 释放 RTV → 释放 DSV → `resize_buffers` → 重建 RTV → 重建 DSV。
//! 调用方必须先通过帧同步器取得 `GpuIdle`。

use crate::core::error::Result;
use crate::gfx::{Backend, Device, SurfaceDesc, Swapchain};
use crate::renderer::descriptor::{DescriptorHandle, DescriptorHeap, DescriptorHeapType};
use crate::renderer::sync::GpuIdle;

/// 窗口最小化时的尺寸记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentState {
    Visible,
    Minimized,
}

pub struct SwapchainTargets<B: Backend> {
    swapchain: B::Swapchain,
    rtv_heap: DescriptorHeap<B>,
    dsv_heap: DescriptorHeap<B>,
    rtv_base: DescriptorHandle,
    dsv_handle: DescriptorHandle,
    rtvs: Vec<B::RenderTargetView>,
    dsv: Option<B::DepthStencilView>,
    extent: (u32, u32),
    state: ExtentState,
    fullscreen: bool,
}

impl<B: Backend> SwapchainTargets<B> {
    /// 按窗口客户区大小创建交换链及其视图
    pub fn new(device: &B::Device, queue: &B::Queue, surface: &SurfaceDesc) -> Result<Self> {
        let swapchain = device.create_swapchain(queue, surface)?;
        let buffer_count = swapchain.buffer_count();

        // RTV 描述符只分配一次，调整大小时原地重写
        let mut rtv_heap = DescriptorHeap::create(device, "swapchain rtv", DescriptorHeapType::Rtv, buffer_count)?;
        let rtv_base = rtv_heap.allocate(buffer_count)?;
        let mut dsv_heap = DescriptorHeap::create(device, "swapchain dsv", DescriptorHeapType::Dsv, 1)?;
        let dsv_handle = dsv_heap.allocate(1)?;

        let mut targets = Self {
            swapchain,
            rtv_heap,
            dsv_heap,
            rtv_base,
            dsv_handle,
            rtvs: Vec::with_capacity(buffer_count as usize),
            dsv: None,
            extent: (surface.width, surface.height),
            state: ExtentState::Visible,
            fullscreen: false,
        };
        targets.create_views(device)?;

        tracing::info!(
            width = surface.width,
            height = surface.height,
            buffers = buffer_count,
            "Swapchain created"
        );
        Ok(targets)
    }

    fn create_views(&mut self, device: &B::Device) -> Result<()> {
        let increment = self.rtv_heap.increment_size();
        for index in 0..self.swapchain.buffer_count() {
            let handle = self.rtv_base.offset(index, increment);
            let view = device.create_render_target_view(&self.swapchain, index, handle.cpu)?;
            self.rtvs.push(view);
        }

        let (width, height) = self.swapchain.extent();
        self.dsv = Some(device.create_depth_stencil_view(width, height, self.dsv_handle.cpu)?);
        Ok(())
    }

    /// 调整大小；尺寸为 0（最小化）时只记录状态，不触碰缓冲区
    pub fn resize(&mut self, device: &B::Device, _idle: &GpuIdle, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            self.state = ExtentState::Minimized;
            tracing::debug!("Window minimized, swapchain resize skipped");
            return Ok(());
        }

        self.state = ExtentState::Visible;
        if (width, height) == self.swapchain.extent() && self.rtvs.len() as u32 == self.swapchain.buffer_count() {
            self.extent = (width, height);
            return Ok(());
        }

        self.rtvs.clear();
        self.dsv = None;

        self.swapchain.resize_buffers(width, height)?;
        self.extent = (width, height);
        self.create_views(device)?;

        tracing::info!(width, height, "Swapchain resized");
        Ok(())
    }

    /// 切换全屏，随后按新尺寸调整大小
    pub fn set_fullscreen(
        &mut self,
        device: &B::Device,
        idle: &GpuIdle,
        fullscreen: bool,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.swapchain.set_fullscreen(fullscreen)?;
        self.fullscreen = fullscreen;
        self.resize(device, idle, width, height)
    }

    pub fn is_minimized(&self) -> bool {
        self.state == ExtentState::Minimized
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn buffer_count(&self) -> u32 {
        self.swapchain.buffer_count()
    }

    pub fn current_back_buffer_index(&self) -> u32 {
        self.swapchain.current_back_buffer_index()
    }

    pub fn rtv(&self, index: u32) -> Option<&B::RenderTargetView> {
        self.rtvs.get(index as usize)
    }

    pub fn dsv(&self) -> Option<&B::DepthStencilView> {
        self.dsv.as_ref()
    }

    pub fn swapchain(&self) -> &B::Swapchain {
        &self.swapchain
    }

    pub fn present(&mut self, sync_interval: u32) -> Result<()> {
        self.swapchain.present(sync_interval)
    }

    pub fn rtv_heap(&self) -> &DescriptorHeap<B> {
        &self.rtv_heap
    }

    pub fn dsv_heap(&self) -> &DescriptorHeap<B> {
        &self.dsv_heap
    }
}
