//! 常量缓冲区上传路径
//!
//! CPU 侧常量结构按 HLSL cbuffer 的打包规则手工布局：向量不跨越 16 字节边界，
//! 填充字段显式写出。每个结构通过 `ConstantLayout::SHADER_SIZE` 声明
//! 着色器中对应 cbuffer 的大小，`ConstantBuffer::new` 在初始化时比较两者。
//!
//! 上传内存在创建时映射一次、析构时解除映射；每个元素的步长按 API 的
//! 对齐要求（D3D12 为 256 字节，D3D11 为 16 字节）向上取整。

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::{Backend, Device, GpuAddress, UploadMemory};

/// 常量缓冲区对齐规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbAlignment {
    /// D3D11：cbuffer 大小必须是 16 的倍数
    D3D11,
    /// D3D12：CBV 的地址和大小必须是 256 的倍数
    D3D12,
}

impl CbAlignment {
    pub const fn bytes(self) -> u64 {
        match self {
            CbAlignment::D3D11 => 16,
            CbAlignment::D3D12 => 256,
        }
    }
}

/// 向上取整到 `alignment` 的倍数（`alignment` 为 2 的幂）
pub const fn align_up(size: u64, alignment: u64) -> u64 {
    (size + alignment - 1) & !(alignment - 1)
}

/// 与 HLSL cbuffer 一一对应的常量结构
pub trait ConstantLayout: Pod {
    /// cbuffer 名称，用于错误信息
    const NAME: &'static str;
    /// 着色器中 cbuffer 的字节大小
    const SHADER_SIZE: usize;
}

/// 一组类型化的常量槽
///
/// 每个槽占 `stride` 字节，`stride` 是对齐值的整数倍。
pub struct ConstantBuffer<B: Backend, T: ConstantLayout> {
    memory: B::UploadBuffer,
    count: u32,
    stride: u64,
    _marker: PhantomData<T>,
}

impl<B: Backend, T: ConstantLayout> ConstantBuffer<B, T> {
    pub fn new(device: &B::Device, count: u32, alignment: CbAlignment, name: &str) -> Result<Self> {
        if size_of::<T>() != T::SHADER_SIZE {
            return Err(GraphicsError::ConstantLayoutMismatch {
                name: T::NAME,
                cpu_size: size_of::<T>(),
                shader_size: T::SHADER_SIZE,
            }
            .into());
        }

        let stride = Self::stride_for(alignment);
        let memory = device.create_upload_buffer(stride * u64::from(count.max(1)), name)?;

        Ok(Self {
            memory,
            count: count.max(1),
            stride,
            _marker: PhantomData,
        })
    }

    /// 给定对齐规则下每个槽的步长
    pub fn stride_for(alignment: CbAlignment) -> u64 {
        align_up(size_of::<T>() as u64, alignment.bytes())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// 把 `value` 拷贝进第 `index` 个槽
    pub fn write(&mut self, index: u32, value: &T) -> Result<()> {
        if index >= self.count {
            return Err(GraphicsError::ResourceCreation(format!(
                "constant slot {index} out of range for '{}' ({} slots)",
                T::NAME,
                self.count
            ))
            .into());
        }
        self.memory
            .write(u64::from(index) * self.stride, bytemuck::bytes_of(value))
    }

    /// 第 `index` 个槽的 GPU 地址
    pub fn gpu_address(&self, index: u32) -> GpuAddress {
        self.memory.gpu_address() + u64::from(index) * self.stride
    }

    pub fn memory(&self) -> &B::UploadBuffer {
        &self.memory
    }
}

/// 逐对象常量（b0）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerObjectConstants {
    pub world: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl ConstantLayout for PerObjectConstants {
    const NAME: &'static str = "PerObject";
    const SHADER_SIZE: usize = 192;
}

/// 逐帧常量（b1）
///
/// `screen_size` 放在 16 字节边界上，避免 float2 跨寄存器。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerFrameConstants {
    pub camera_position: [f32; 3],
    pub exposure: f32,
    pub near_z: f32,
    pub far_z: f32,
    pub delta_ms: f32,
    pub time: f32,
    pub num_point_lights: i32,
    pub num_directional_lights: i32,
    pub num_spot_lights: i32,
    pub _pad0: f32,
    pub screen_size: [f32; 2],
    pub _pad1: [f32; 2],
}

impl ConstantLayout for PerFrameConstants {
    const NAME: &'static str = "PerFrame";
    const SHADER_SIZE: usize = 64;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PointLightConstants {
    pub position: [f32; 3],
    pub strength: f32,
    pub diffuse: [f32; 3],
    pub _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightConstants {
    pub direction: [f32; 3],
    pub _pad: f32,
    pub diffuse: [f32; 3],
    pub strength: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SpotLightConstants {
    pub position: [f32; 3],
    pub inner_cutoff: f32,
    pub direction: [f32; 3],
    pub outer_cutoff: f32,
    pub diffuse: [f32; 3],
    pub strength: f32,
}

/// 点光源槽位数量
pub const MAX_POINT_LIGHTS: usize = 4;

/// 光照常量（b2）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightConstants {
    pub point_lights: [PointLightConstants; MAX_POINT_LIGHTS],
    pub directional: DirectionalLightConstants,
    pub spot: SpotLightConstants,
}

impl ConstantLayout for LightConstants {
    const NAME: &'static str = "Lights";
    const SHADER_SIZE: usize = 208;
}

/// 后处理常量：暗角、胶片颗粒、色差
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PostFxConstants {
    pub vignette_inner_radius: f32,
    pub vignette_outer_radius: f32,
    pub vignette_opacity: f32,
    pub vignette_enabled: i32,
    pub grain_strength: f32,
    pub grain_enabled: i32,
    pub aberration_enabled: i32,
    pub aberration_intensity: f32,
}

impl ConstantLayout for PostFxConstants {
    const NAME: &'static str = "PostFx";
    const SHADER_SIZE: usize = 32;
}

impl Default for PostFxConstants {
    fn default() -> Self {
        Self {
            vignette_inner_radius: 0.1,
            vignette_outer_radius: 1.0,
            vignette_opacity: 1.0,
            vignette_enabled: 0,
            grain_strength: 16.0,
            grain_enabled: 0,
            aberration_enabled: 0,
            aberration_intensity: 1.0,
        }
    }
}

const _: () = assert!(size_of::<PerObjectConstants>() % 16 == 0);
const _: () = assert!(size_of::<PerFrameConstants>() % 16 == 0);
const _: () = assert!(size_of::<LightConstants>() % 16 == 0);
const _: () = assert!(size_of::<PostFxConstants>() % 16 == 0);
