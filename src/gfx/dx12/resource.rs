//! 描述符堆、上传缓冲区、网格与纹理

use std::ffi::c_void;

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::{resource_error, set_name};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{
    CpuDescriptorHandle, DescriptorHeapType, GpuAddress, GpuDescriptorHandle, NativeDescriptorHeap, NativeHeapDesc,
    UploadMemory,
};
use crate::renderer::vertex::MeshVertex;

fn d3d_heap_type(heap_type: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match heap_type {
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

pub(crate) fn buffer_desc(size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        ..Default::default()
    }
}

pub(crate) fn committed_resource(
    device: &ID3D12Device,
    heap_type: D3D12_HEAP_TYPE,
    desc: &D3D12_RESOURCE_DESC,
    state: D3D12_RESOURCE_STATES,
    clear: Option<&D3D12_CLEAR_VALUE>,
) -> Result<ID3D12Resource> {
    let heap = D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        ..Default::default()
    };
    let mut resource: Option<ID3D12Resource> = None;
    // SAFETY: 所有描述结构在调用期间有效
    unsafe {
        device.CreateCommittedResource(
            &heap,
            D3D12_HEAP_FLAG_NONE,
            desc,
            state,
            clear.map(|c| c as *const _),
            &mut resource,
        )
    }
    .map_err(resource_error("CreateCommittedResource"))?;
    resource.ok_or_else(|| GraphicsError::ResourceCreation("CreateCommittedResource returned no resource".into()).into())
}

/// 把 `bytes` 一次性拷贝进上传堆资源
fn fill(resource: &ID3D12Resource, bytes: &[u8]) -> Result<()> {
    let mut mapped: *mut c_void = std::ptr::null_mut();
    // SAFETY: 上传堆资源可映射；空读取范围表示 CPU 不读
    unsafe {
        resource
            .Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut mapped))
            .map_err(resource_error("Map"))?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped as *mut u8, bytes.len());
        resource.Unmap(0, None);
    }
    Ok(())
}

pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    heap_type: DescriptorHeapType,
    capacity: u32,
    increment_size: u32,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
}

unsafe impl Send for Dx12DescriptorHeap {}

impl Dx12DescriptorHeap {
    pub(crate) fn new(device: &ID3D12Device, desc: &NativeHeapDesc) -> Result<Self> {
        let shader_visible = desc.heap_type.is_shader_visible();
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: d3d_heap_type(desc.heap_type),
            NumDescriptors: desc.capacity,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };

        // SAFETY: 设备有效
        let heap: ID3D12DescriptorHeap = unsafe { device.CreateDescriptorHeap(&heap_desc) }.map_err(|e| {
            GraphicsError::ResourceCreation(format!(
                "Failed to create {} descriptor heap '{}': {e}",
                desc.heap_type.name(),
                desc.name
            ))
        })?;
        set_name(&heap, &desc.name);

        // SAFETY: 堆刚刚创建成功
        let (increment_size, cpu_start, gpu_start) = unsafe {
            let increment = device.GetDescriptorHandleIncrementSize(heap_desc.Type);
            let cpu = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu = shader_visible.then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);
            (increment, cpu, gpu)
        };

        Ok(Self {
            heap,
            heap_type: desc.heap_type,
            capacity: desc.capacity,
            increment_size,
            cpu_start: CpuDescriptorHandle { ptr: cpu_start },
            gpu_start: gpu_start.map(|ptr| GpuDescriptorHandle { ptr }),
        })
    }

    pub(crate) fn raw(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }
}

impl NativeDescriptorHeap for Dx12DescriptorHeap {
    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn increment_size(&self) -> u32 {
        self.increment_size
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start
    }
}

/// 持久映射的上传堆缓冲区
pub struct Dx12UploadBuffer {
    resource: ID3D12Resource,
    name: String,
    size: u64,
    mapped: *mut u8,
}

// 映射指针只通过 &mut self 写入
unsafe impl Send for Dx12UploadBuffer {}

impl Dx12UploadBuffer {
    pub(crate) fn new(device: &ID3D12Device, size: u64, name: &str) -> Result<Self> {
        if size == 0 {
            return Err(GraphicsError::ResourceCreation(format!("upload buffer '{name}' created with zero size")).into());
        }

        let resource = committed_resource(
            device,
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc(size),
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
        )?;
        set_name(&resource, name);

        let mut mapped: *mut c_void = std::ptr::null_mut();
        // SAFETY: 上传堆资源在整个生命周期内保持映射
        unsafe { resource.Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut mapped)) }
            .map_err(resource_error("Map"))?;

        Ok(Self {
            resource,
            name: name.to_string(),
            size,
            mapped: mapped as *mut u8,
        })
    }
}

impl Dx12UploadBuffer {
    pub(crate) fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl UploadMemory for Dx12UploadBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn gpu_address(&self) -> GpuAddress {
        // SAFETY: 缓冲区资源有效
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len() as u64;
        if end > self.size {
            return Err(GraphicsError::Validation(format!(
                "write of {} bytes at {offset} overflows upload buffer '{}' ({} bytes)",
                bytes.len(),
                self.name,
                self.size
            ))
            .into());
        }
        // SAFETY: 范围已检查；帧同步保证 GPU 不再读取这段内存
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset as usize), bytes.len());
        }
        Ok(())
    }
}

impl Drop for Dx12UploadBuffer {
    fn drop(&mut self) {
        // SAFETY: 与 new 中的 Map 配对
        unsafe { self.resource.Unmap(0, None) };
    }
}

/// 静态网格：顶点与 16 位索引放在上传堆中
pub struct Dx12Mesh {
    _vertices: ID3D12Resource,
    _indices: ID3D12Resource,
    vertex_view: D3D12_VERTEX_BUFFER_VIEW,
    index_view: D3D12_INDEX_BUFFER_VIEW,
    index_count: u32,
}

unsafe impl Send for Dx12Mesh {}

impl Dx12Mesh {
    pub(crate) fn new(device: &ID3D12Device, vertices: &[MeshVertex], indices: &[u16]) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(GraphicsError::ResourceCreation("mesh needs vertices and indices".into()).into());
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);

        let vertex_buffer = committed_resource(
            device,
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc(vertex_bytes.len() as u64),
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
        )?;
        fill(&vertex_buffer, vertex_bytes)?;
        set_name(&vertex_buffer, "mesh vertices");

        let index_buffer = committed_resource(
            device,
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc(index_bytes.len() as u64),
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
        )?;
        fill(&index_buffer, index_bytes)?;
        set_name(&index_buffer, "mesh indices");

        // SAFETY: 两个资源都是缓冲区
        let (vertex_address, index_address) =
            unsafe { (vertex_buffer.GetGPUVirtualAddress(), index_buffer.GetGPUVirtualAddress()) };

        Ok(Self {
            vertex_view: D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: vertex_address,
                SizeInBytes: vertex_bytes.len() as u32,
                StrideInBytes: std::mem::size_of::<MeshVertex>() as u32,
            },
            index_view: D3D12_INDEX_BUFFER_VIEW {
                BufferLocation: index_address,
                SizeInBytes: index_bytes.len() as u32,
                Format: DXGI_FORMAT_R16_UINT,
            },
            index_count: indices.len() as u32,
            _vertices: vertex_buffer,
            _indices: index_buffer,
        })
    }

    pub(crate) fn vertex_view(&self) -> D3D12_VERTEX_BUFFER_VIEW {
        self.vertex_view
    }

    pub(crate) fn index_view(&self) -> D3D12_INDEX_BUFFER_VIEW {
        self.index_view
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// 叠加层纹理格式；与后备缓冲区一致，egui 的预乘颜色原样输出
pub(crate) const TEXTURE_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// 默认堆中的 RGBA8 纹理
///
/// 创建后处于 COPY_DEST；每次拷贝结束时转换到 PIXEL_SHADER_RESOURCE。
pub struct Dx12Texture {
    resource: ID3D12Resource,
    width: u32,
    height: u32,
    shader_readable: bool,
}

unsafe impl Send for Dx12Texture {}

impl Dx12Texture {
    pub(crate) fn new(device: &ID3D12Device, width: u32, height: u32, name: &str) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture '{name}' created with empty extent {width}x{height}"
            ))
            .into());
        }

        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: u64::from(width),
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: TEXTURE_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_NONE,
            ..Default::default()
        };
        let resource = committed_resource(
            device,
            D3D12_HEAP_TYPE_DEFAULT,
            &desc,
            D3D12_RESOURCE_STATE_COPY_DEST,
            None,
        )?;
        set_name(&resource, name);

        Ok(Self {
            resource,
            width,
            height,
            shader_readable: false,
        })
    }

    pub(crate) fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 拷贝前的状态；调用方负责录制对应的屏障
    pub(crate) fn begin_copy(&mut self) -> Option<D3D12_RESOURCE_STATES> {
        let before = self.shader_readable.then_some(D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE);
        self.shader_readable = true;
        before
    }
}
