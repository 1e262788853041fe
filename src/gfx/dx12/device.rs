//! D3D12 设备：资源与视图的工厂

use std::sync::Arc;

use raw_window_handle::RawWindowHandle;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::CreateEventW;

use super::command::{Dx12CommandAllocator, Dx12CommandList};
use super::pipeline::{PipelineLibrary, BACK_BUFFER_FORMAT, DEPTH_FORMAT};
use super::queue::Dx12Queue;
use super::resource::{committed_resource, Dx12DescriptorHeap, Dx12Mesh, Dx12Texture, Dx12UploadBuffer, TEXTURE_FORMAT};
use super::swapchain::{Dx12DepthStencilView, Dx12RenderTargetView, Dx12Swapchain};
use super::{device_error, resource_error, set_name, swapchain_error, Dx12Backend};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{CpuDescriptorHandle, Device, GpuAddress, NativeHeapDesc, SurfaceDesc};
use crate::renderer::vertex::MeshVertex;

pub struct Dx12Device {
    device: ID3D12Device,
    factory: IDXGIFactory4,
    pipelines: Arc<PipelineLibrary>,
}

// D3D12 设备与 DXGI 工厂是自由线程对象
unsafe impl Send for Dx12Device {}

impl Dx12Device {
    pub(crate) fn new(device: ID3D12Device, factory: IDXGIFactory4, pipelines: Arc<PipelineLibrary>) -> Self {
        Self {
            device,
            factory,
            pipelines,
        }
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }
}

fn cpu_handle(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

impl Device<Dx12Backend> for Dx12Device {
    fn create_queue(&self) -> Result<Dx12Queue> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        // SAFETY: 设备有效，desc 在调用期间有效
        let queue: ID3D12CommandQueue =
            unsafe { self.device.CreateCommandQueue(&desc) }.map_err(device_error("CreateCommandQueue"))?;
        let fence: ID3D12Fence =
            unsafe { self.device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }.map_err(device_error("CreateFence"))?;
        let event = unsafe { CreateEventW(None, false, false, None) }.map_err(device_error("CreateEventW"))?;

        set_name(&queue, "direct queue");
        set_name(&fence, "frame fence");
        Ok(Dx12Queue::new(queue, fence, event))
    }

    fn create_command_allocator(&self, name: &str) -> Result<Dx12CommandAllocator> {
        // SAFETY: 设备有效
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(resource_error("CreateCommandAllocator"))?;
        set_name(&allocator, name);
        Ok(Dx12CommandAllocator::new(allocator))
    }

    fn create_command_list(&self, allocator: &Dx12CommandAllocator) -> Result<Dx12CommandList> {
        // SAFETY: 分配器属于同一设备
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, allocator.raw(), None::<&ID3D12PipelineState>)
        }
        .map_err(resource_error("CreateCommandList"))?;
        // 新建的命令列表处于录制状态，关闭后与 trait 约定一致
        unsafe { list.Close() }.map_err(resource_error("Close"))?;
        set_name(&list, "frame command list");
        Ok(Dx12CommandList::new(list, self.pipelines.clone()))
    }

    fn create_descriptor_heap(&self, desc: &NativeHeapDesc) -> Result<Dx12DescriptorHeap> {
        Dx12DescriptorHeap::new(&self.device, desc)
    }

    fn create_upload_buffer(&self, size: u64, name: &str) -> Result<Dx12UploadBuffer> {
        Dx12UploadBuffer::new(&self.device, size, name)
    }

    fn create_constant_buffer_view(&self, dest: CpuDescriptorHandle, address: GpuAddress, size: u32) {
        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: address,
            SizeInBytes: size,
        };
        // SAFETY: dest 来自本设备创建的 CBV/SRV/UAV 堆
        unsafe { self.device.CreateConstantBufferView(Some(&desc), cpu_handle(dest)) };
    }

    fn create_mesh(&self, vertices: &[MeshVertex], indices: &[u16]) -> Result<Dx12Mesh> {
        Dx12Mesh::new(&self.device, vertices, indices)
    }

    fn create_texture(&self, width: u32, height: u32, name: &str) -> Result<Dx12Texture> {
        Dx12Texture::new(&self.device, width, height, name)
    }

    fn create_shader_resource_view(&self, texture: &Dx12Texture, dest: CpuDescriptorHandle) {
        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: TEXTURE_FORMAT,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };
        // SAFETY: dest 来自本设备创建的 CBV/SRV/UAV 堆，纹理由调用方保持存活
        unsafe {
            self.device
                .CreateShaderResourceView(texture.raw(), Some(&desc), cpu_handle(dest))
        };
    }

    fn create_swapchain(&self, queue: &Dx12Queue, surface: &SurfaceDesc) -> Result<Dx12Swapchain> {
        let hwnd = match surface.window {
            Some(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut core::ffi::c_void),
            Some(_) => {
                return Err(GraphicsError::SwapchainError("expected a Win32 window handle".into()).into());
            }
            None => {
                return Err(GraphicsError::SwapchainError("DX12 swapchain needs a window".into()).into());
            }
        };

        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: surface.width,
            Height: surface.height,
            Format: BACK_BUFFER_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: surface.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            Flags: DXGI_SWAP_CHAIN_FLAG_ALLOW_MODE_SWITCH.0 as u32,
            ..Default::default()
        };

        // SAFETY: hwnd 由 winit 持有的窗口提供，生命周期长于交换链
        let swapchain: IDXGISwapChain1 = unsafe {
            self.factory
                .CreateSwapChainForHwnd(queue.raw(), hwnd, &desc, None, None)
        }
        .map_err(swapchain_error("CreateSwapChainForHwnd"))?;

        // Alt+Enter 由应用自己处理
        unsafe { self.factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) }
            .map_err(swapchain_error("MakeWindowAssociation"))?;

        Dx12Swapchain::new(swapchain, surface)
    }

    fn create_render_target_view(
        &self,
        swapchain: &Dx12Swapchain,
        index: u32,
        dest: CpuDescriptorHandle,
    ) -> Result<Dx12RenderTargetView> {
        let buffer = swapchain.buffer(index)?;
        // SAFETY: dest 来自本设备创建的 RTV 堆
        unsafe { self.device.CreateRenderTargetView(&buffer, None, cpu_handle(dest)) };
        set_name(&buffer, &format!("back buffer {index}"));
        Ok(Dx12RenderTargetView::new(buffer, cpu_handle(dest)))
    }

    fn create_depth_stencil_view(
        &self,
        width: u32,
        height: u32,
        dest: CpuDescriptorHandle,
    ) -> Result<Dx12DepthStencilView> {
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: u64::from(width.max(1)),
            Height: height.max(1),
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DEPTH_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
            ..Default::default()
        };
        let clear = D3D12_CLEAR_VALUE {
            Format: DEPTH_FORMAT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
            },
        };

        let resource = committed_resource(
            &self.device,
            D3D12_HEAP_TYPE_DEFAULT,
            &desc,
            D3D12_RESOURCE_STATE_DEPTH_WRITE,
            Some(&clear),
        )?;
        set_name(&resource, "depth buffer");
        // SAFETY: dest 来自本设备创建的 DSV 堆
        unsafe { self.device.CreateDepthStencilView(&resource, None, cpu_handle(dest)) };
        Ok(Dx12DepthStencilView::new(resource, cpu_handle(dest)))
    }
}

