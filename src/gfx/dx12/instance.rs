//! DXGI 工厂与适配器枚举

use std::sync::Arc;

use tracing::{debug, info, warn};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use super::device::Dx12Device;
use super::pipeline::PipelineLibrary;
use super::{device_error, Dx12Backend};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{AdapterInfo, FeatureLevel, Instance, InstanceDesc};

/// 从高到低探测的特性等级
const PROBE_LEVELS: [FeatureLevel; 4] = [
    FeatureLevel::Level12_1,
    FeatureLevel::Level12_0,
    FeatureLevel::Level11_1,
    FeatureLevel::Level11_0,
];

pub(crate) fn d3d_feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level11_1 => D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
    }
}

pub struct Dx12Instance {
    factory: IDXGIFactory4,
    debug_layer: bool,
}

// DXGI 工厂是自由线程对象
unsafe impl Send for Dx12Instance {}

impl Dx12Instance {
    fn adapter(&self, index: usize) -> Result<IDXGIAdapter1> {
        // SAFETY: 工厂在 self 生命周期内有效
        unsafe { self.factory.EnumAdapters1(index as u32) }.map_err(device_error("EnumAdapters1"))
    }

    fn describe(adapter: &IDXGIAdapter1) -> Result<AdapterInfo> {
        // SAFETY: adapter 是有效的 COM 接口
        let desc = unsafe { adapter.GetDesc1() }.map_err(device_error("GetDesc1"))?;
        let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());

        let max_feature_level = PROBE_LEVELS
            .into_iter()
            .find(|&level| {
                // 传空指针只检查支持情况，不真正创建设备
                unsafe {
                    D3D12CreateDevice::<_, ID3D12Device>(adapter, d3d_feature_level(level), std::ptr::null_mut())
                }
                .is_ok()
            })
            .unwrap_or(FeatureLevel::Level11_0);

        Ok(AdapterInfo {
            name: String::from_utf16_lossy(&desc.Description[..len]),
            vendor_id: desc.VendorId,
            device_id: desc.DeviceId,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
            is_software: (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0,
            max_feature_level,
        })
    }
}

impl Instance<Dx12Backend> for Dx12Instance {
    fn create(desc: &InstanceDesc) -> Result<Self> {
        let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);

        if desc.debug_layer {
            let mut debug: Option<ID3D12Debug> = None;
            // SAFETY: 调试层必须在创建设备之前启用
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                        factory_flags = DXGI_CREATE_FACTORY_DEBUG;
                        debug!("DX12 debug layer enabled");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to enable DX12 debug layer"),
            }
        }

        // SAFETY: 无前置条件
        let factory: IDXGIFactory4 =
            unsafe { CreateDXGIFactory2(factory_flags) }.map_err(device_error("CreateDXGIFactory2"))?;

        Ok(Self {
            factory,
            debug_layer: desc.debug_layer,
        })
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        let mut adapters = Vec::new();
        for index in 0.. {
            // SAFETY: 工厂有效；越界时返回 DXGI_ERROR_NOT_FOUND
            match unsafe { self.factory.EnumAdapters1(index) } {
                Ok(adapter) => adapters.push(Self::describe(&adapter)?),
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => return Err(device_error("EnumAdapters1")(e)),
            }
        }
        Ok(adapters)
    }

    fn create_device(&self, adapter: usize, level: FeatureLevel) -> Result<Dx12Device> {
        let dxgi_adapter = self.adapter(adapter)?;
        let info = Self::describe(&dxgi_adapter)?;

        let mut device: Option<ID3D12Device> = None;
        // SAFETY: 输出参数指向有效的 Option
        unsafe { D3D12CreateDevice(&dxgi_adapter, d3d_feature_level(level), &mut device) }
            .map_err(device_error("D3D12CreateDevice"))?;
        let device = device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".into()))?;

        let pipelines = PipelineLibrary::new(&device)?;
        info!(
            adapter = %info.name,
            feature_level = %level,
            debug_layer = self.debug_layer,
            "D3D12 device created"
        );

        Ok(Dx12Device::new(device, self.factory.clone(), Arc::new(pipelines)))
    }
}
