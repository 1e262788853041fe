//! 命令分配器与图形命令列表
//!
//! 录制方法不返回错误；第一个录制错误保存下来，由 `close` 报告。

use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::trace;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R16_UINT, DXGI_FORMAT_R32_UINT};

use super::pipeline::PipelineLibrary;
use super::resource::{Dx12DescriptorHeap, Dx12Mesh, Dx12Texture, Dx12UploadBuffer, TEXTURE_FORMAT};
use super::swapchain::{Dx12DepthStencilView, Dx12RenderTargetView, Dx12Swapchain};
use super::{command_error, Dx12Backend};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    CommandList, GpuAddress, GpuBufferRange, GpuDescriptorHandle, PipelineKind, ResourceState, ScissorRect,
    TextureCopy, Viewport,
};
use crate::renderer::pass::RenderPass;

pub struct Dx12CommandAllocator {
    allocator: ID3D12CommandAllocator,
}

unsafe impl Send for Dx12CommandAllocator {}

impl Dx12CommandAllocator {
    pub(crate) fn new(allocator: ID3D12CommandAllocator) -> Self {
        Self { allocator }
    }

    pub(crate) fn raw(&self) -> &ID3D12CommandAllocator {
        &self.allocator
    }
}

pub struct Dx12CommandList {
    list: ID3D12GraphicsCommandList,
    pipelines: Arc<PipelineLibrary>,
    pass: Option<RenderPass>,
    error: Option<String>,
}

unsafe impl Send for Dx12CommandList {}

impl Dx12CommandList {
    pub(crate) fn new(list: ID3D12GraphicsCommandList, pipelines: Arc<PipelineLibrary>) -> Self {
        Self {
            list,
            pipelines,
            pass: None,
            error: None,
        }
    }

    pub(crate) fn raw(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
    }
}

fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // SAFETY: 按位借用资源指针，屏障提交后不再使用
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

impl CommandList<Dx12Backend> for Dx12CommandList {
    fn reset(&mut self, allocator: &mut Dx12CommandAllocator) -> Result<()> {
        // SAFETY: 调用方保证该分配器上一次提交的工作已经完成
        unsafe {
            allocator.allocator.Reset().map_err(command_error("ID3D12CommandAllocator::Reset"))?;
            self.list
                .Reset(&allocator.allocator, None::<&ID3D12PipelineState>)
                .map_err(command_error("ID3D12GraphicsCommandList::Reset"))?;
        }
        self.pass = None;
        self.error = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // SAFETY: 列表处于录制状态
        let closed = unsafe { self.list.Close() }.map_err(command_error("ID3D12GraphicsCommandList::Close"));
        if let Some(message) = self.error.take() {
            return Err(GraphicsError::CommandExecution(message).into());
        }
        closed
    }

    fn begin_pass(&mut self, pass: RenderPass) {
        if let Some(open) = self.pass {
            self.fail(format!("{pass:?} pass begun while {open:?} is still open"));
        }
        self.pass = Some(pass);
        trace!(pass = pass.name(), "Pass begin");
    }

    fn end_pass(&mut self, pass: RenderPass) {
        if self.pass != Some(pass) {
            self.fail(format!("{pass:?} pass ended but {:?} is open", self.pass));
        }
        self.pass = None;
    }

    fn bind_pipeline(&mut self, pipeline: PipelineKind) {
        // SAFETY: 根签名和 PSO 由同一设备创建，存活期长于命令列表
        unsafe {
            self.list
                .SetGraphicsRootSignature(self.pipelines.root_signature(pipeline));
            self.list.SetPipelineState(self.pipelines.state(pipeline));
            self.list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&Dx12DescriptorHeap]) {
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps.iter().map(|h| Some(h.raw().clone())).collect();
        // SAFETY: 堆在 GPU 使用期间由帧资源保持存活
        unsafe { self.list.SetDescriptorHeaps(&heaps) };
    }

    fn transition(&mut self, swapchain: &Dx12Swapchain, index: u32, before: ResourceState, after: ResourceState) {
        let buffer = match swapchain.buffer(index) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };
        let barrier = transition_barrier(&buffer, resource_state(before), resource_state(after));
        // SAFETY: buffer 在调用期间存活
        unsafe { self.list.ResourceBarrier(&[barrier]) };
    }

    fn set_render_target(&mut self, rtv: &Dx12RenderTargetView, dsv: Option<&Dx12DepthStencilView>) {
        let rtv_handle = rtv.handle();
        let dsv_handle = dsv.map(|d| d.handle());
        // SAFETY: 句柄指向有效的视图
        unsafe {
            self.list.OMSetRenderTargets(
                1,
                Some(&rtv_handle),
                false,
                dsv_handle.as_ref().map(|h| h as *const _),
            )
        };
    }

    fn clear_render_target(&mut self, rtv: &Dx12RenderTargetView, color: [f32; 4]) {
        unsafe { self.list.ClearRenderTargetView(rtv.handle(), &color, None) };
    }

    fn clear_depth_stencil(&mut self, dsv: &Dx12DepthStencilView, depth: f32) {
        unsafe {
            self.list
                .ClearDepthStencilView(dsv.handle(), D3D12_CLEAR_FLAG_DEPTH, depth, 0, &[])
        };
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let viewport = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { self.list.RSSetViewports(&[viewport]) };
    }

    fn set_scissor(&mut self, rect: ScissorRect) {
        let rect = RECT {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        };
        unsafe { self.list.RSSetScissorRects(&[rect]) };
    }

    fn set_root_descriptor_table(&mut self, slot: u32, handle: GpuDescriptorHandle) {
        unsafe {
            self.list
                .SetGraphicsRootDescriptorTable(slot, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.ptr })
        };
    }

    fn set_root_constant_buffer(&mut self, slot: u32, address: GpuAddress) {
        unsafe { self.list.SetGraphicsRootConstantBufferView(slot, address) };
    }

    fn set_root_constants(&mut self, slot: u32, values: &[u32]) {
        unsafe {
            self.list
                .SetGraphicsRoot32BitConstants(slot, values.len() as u32, values.as_ptr() as *const _, 0)
        };
    }

    fn draw_mesh(&mut self, mesh: &Dx12Mesh) {
        unsafe {
            self.list.IASetVertexBuffers(0, Some(&[mesh.vertex_view()]));
            self.list.IASetIndexBuffer(Some(&mesh.index_view()));
            self.list.DrawIndexedInstanced(mesh.index_count(), 1, 0, 0, 0);
        }
    }

    fn draw_overlay(&mut self, vertices: GpuBufferRange, indices: GpuBufferRange, index_count: u32) {
        let format = match indices.stride {
            2 => DXGI_FORMAT_R16_UINT,
            4 => DXGI_FORMAT_R32_UINT,
            other => {
                self.fail(format!("unsupported overlay index stride {other}"));
                return;
            }
        };
        let vertex_view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: vertices.address,
            SizeInBytes: vertices.size as u32,
            StrideInBytes: vertices.stride,
        };
        let index_view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: indices.address,
            SizeInBytes: indices.size as u32,
            Format: format,
        };
        // SAFETY: 两段范围都位于当前帧槽的叠加层上传缓冲区内
        unsafe {
            self.list.IASetVertexBuffers(0, Some(&[vertex_view]));
            self.list.IASetIndexBuffer(Some(&index_view));
            self.list.DrawIndexedInstanced(index_count, 1, 0, 0, 0);
        }
    }

    fn copy_to_texture(&mut self, texture: &mut Dx12Texture, source: &Dx12UploadBuffer, copy: TextureCopy) {
        if let Some(pass) = self.pass {
            self.fail(format!("texture copy recorded inside {pass:?} pass"));
            return;
        }

        // SAFETY: 按位借用接口指针，拷贝位置只在本次调用期间使用
        let destination = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(texture.raw()) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
        };
        let placed = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(source.raw()) },
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: copy.source_offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: TEXTURE_FORMAT,
                        Width: copy.width,
                        Height: copy.height,
                        Depth: 1,
                        RowPitch: copy.row_pitch,
                    },
                },
            },
        };

        let before = texture.begin_copy();
        // SAFETY: 纹理与上传缓冲区在命令列表执行完之前由渲染器保持存活
        unsafe {
            if let Some(before) = before {
                self.list
                    .ResourceBarrier(&[transition_barrier(texture.raw(), before, D3D12_RESOURCE_STATE_COPY_DEST)]);
            }
            self.list
                .CopyTextureRegion(&destination, copy.x, copy.y, 0, &placed, None);
            self.list.ResourceBarrier(&[transition_barrier(
                texture.raw(),
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            )]);
        }
        trace!(x = copy.x, y = copy.y, width = copy.width, height = copy.height, "Texture copy");
    }
}
