//! 内置管线：根签名、着色器编译与 PSO
//!
//! 几何管线的根参数：
//!
//! | 槽位 | 类型 | 寄存器 |
//! |------|------|--------|
//! | 0 | 描述符表（1 个 CBV） | b0 逐对象 |
//! | 1 | 根 CBV | b1 逐帧 |
//! | 2 | 根 CBV | b2 光照 |
//! | 3 | 根 CBV | b3 后处理 |
//!
//! 叠加层管线：槽位 0 是根常量（b0，屏幕尺寸两个 float），槽位 1 是纹理描述符表（t0），
//! 外加一个静态线性采样器（s0）。

use tracing::debug;
use windows::core::{s, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::{resource_error, set_name};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::PipelineKind;

const GEOMETRY_HLSL: &str = include_str!("shaders/geometry.hlsl");
const OVERLAY_HLSL: &str = include_str!("shaders/overlay.hlsl");

pub(crate) const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;
pub(crate) const DEPTH_FORMAT: DXGI_FORMAT = DXGI_FORMAT_D32_FLOAT;

struct Pipeline {
    root_signature: ID3D12RootSignature,
    state: ID3D12PipelineState,
}

/// 设备创建时一次性构建的全部管线
pub struct PipelineLibrary {
    geometry: Pipeline,
    overlay: Pipeline,
}

impl PipelineLibrary {
    pub fn new(device: &ID3D12Device) -> Result<Self> {
        let geometry = geometry_pipeline(device)?;
        let overlay = overlay_pipeline(device)?;
        debug!("Built-in pipelines created");
        Ok(Self { geometry, overlay })
    }

    pub fn root_signature(&self, kind: PipelineKind) -> &ID3D12RootSignature {
        &self.pipeline(kind).root_signature
    }

    pub fn state(&self, kind: PipelineKind) -> &ID3D12PipelineState {
        &self.pipeline(kind).state
    }

    fn pipeline(&self, kind: PipelineKind) -> &Pipeline {
        match kind {
            PipelineKind::Geometry => &self.geometry,
            PipelineKind::Overlay => &self.overlay,
        }
    }
}

fn compile(source: &str, entry: PCSTR, target: PCSTR) -> Result<ID3DBlob> {
    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        D3DCOMPILE_OPTIMIZATION_LEVEL3
    };

    let mut code = None;
    let mut errors = None;
    // SAFETY: 源码切片在调用期间有效，入口与目标是静态 C 字符串
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as _,
            source.len(),
            None,
            None,
            None,
            entry,
            target,
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let message = errors
            .map(|blob| unsafe {
                let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
                String::from_utf8_lossy(bytes).into_owned()
            })
            .unwrap_or_else(|| e.to_string());
        return Err(GraphicsError::ShaderCompilation(message).into());
    }
    code.ok_or_else(|| GraphicsError::ShaderCompilation("D3DCompile produced no bytecode".into()).into())
}

fn bytecode(blob: &ID3DBlob) -> D3D12_SHADER_BYTECODE {
    // SAFETY: blob 的生命周期覆盖 PSO 创建
    unsafe {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: blob.GetBufferPointer(),
            BytecodeLength: blob.GetBufferSize(),
        }
    }
}

fn root_signature(
    device: &ID3D12Device,
    parameters: &[D3D12_ROOT_PARAMETER],
    samplers: &[D3D12_STATIC_SAMPLER_DESC],
    flags: D3D12_ROOT_SIGNATURE_FLAGS,
    name: &str,
) -> Result<ID3D12RootSignature> {
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: if samplers.is_empty() {
            std::ptr::null()
        } else {
            samplers.as_ptr()
        },
        Flags: flags,
    };

    let mut blob = None;
    let mut errors = None;
    // SAFETY: desc 引用的参数数组在调用期间有效
    unsafe { D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut errors)) }
        .map_err(resource_error("D3D12SerializeRootSignature"))?;
    let blob = blob.ok_or_else(|| GraphicsError::ResourceCreation("empty root signature blob".into()))?;

    // SAFETY: blob 内容是刚序列化的根签名
    let signature: ID3D12RootSignature = unsafe {
        device.CreateRootSignature(
            0,
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()),
        )
    }
    .map_err(resource_error("CreateRootSignature"))?;
    set_name(&signature, name);
    Ok(signature)
}

fn root_cbv(register: u32) -> D3D12_ROOT_PARAMETER {
    D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Descriptor: D3D12_ROOT_DESCRIPTOR {
                ShaderRegister: register,
                RegisterSpace: 0,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    }
}

fn input_element(semantic: PCSTR, format: DXGI_FORMAT, offset: u32) -> D3D12_INPUT_ELEMENT_DESC {
    D3D12_INPUT_ELEMENT_DESC {
        SemanticName: semantic,
        SemanticIndex: 0,
        Format: format,
        InputSlot: 0,
        AlignedByteOffset: offset,
        InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
        InstanceDataStepRate: 0,
    }
}

fn blend_state(alpha_blend: bool) -> D3D12_BLEND_DESC {
    let target = if alpha_blend {
        // egui 输出预乘 alpha
        D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: true.into(),
            LogicOpEnable: false.into(),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_INV_DEST_ALPHA,
            DestBlendAlpha: D3D12_BLEND_ONE,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        }
    } else {
        D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            ..Default::default()
        }
    };

    let mut desc = D3D12_BLEND_DESC {
        AlphaToCoverageEnable: false.into(),
        IndependentBlendEnable: false.into(),
        RenderTarget: Default::default(),
    };
    desc.RenderTarget[0] = target;
    desc
}

struct PipelineDesc<'a> {
    root_signature: &'a ID3D12RootSignature,
    vs: &'a ID3DBlob,
    ps: &'a ID3DBlob,
    input: &'a [D3D12_INPUT_ELEMENT_DESC],
    depth: bool,
    alpha_blend: bool,
    cull: D3D12_CULL_MODE,
    name: &'a str,
}

fn pipeline_state(device: &ID3D12Device, desc: PipelineDesc<'_>) -> Result<ID3D12PipelineState> {
    let mut pso = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        // SAFETY: 按位拷贝接口指针，不增加引用计数；字段是 ManuallyDrop，不会多释放一次
        pRootSignature: unsafe { std::mem::transmute_copy(desc.root_signature) },
        VS: bytecode(desc.vs),
        PS: bytecode(desc.ps),
        BlendState: blend_state(desc.alpha_blend),
        SampleMask: u32::MAX,
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: desc.cull,
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: desc.depth.into(),
            DepthWriteMask: if desc.depth {
                D3D12_DEPTH_WRITE_MASK_ALL
            } else {
                D3D12_DEPTH_WRITE_MASK_ZERO
            },
            DepthFunc: D3D12_COMPARISON_FUNC_LESS,
            StencilEnable: false.into(),
            ..Default::default()
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: desc.input.as_ptr(),
            NumElements: desc.input.len() as u32,
        },
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: 1,
        DSVFormat: DEPTH_FORMAT,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        ..Default::default()
    };
    pso.RTVFormats[0] = BACK_BUFFER_FORMAT;

    // SAFETY: pso 引用的所有数据在调用期间有效
    let state: ID3D12PipelineState = unsafe { device.CreateGraphicsPipelineState(&pso) }
        .map_err(resource_error("CreateGraphicsPipelineState"))?;
    set_name(&state, desc.name);
    Ok(state)
}

fn geometry_pipeline(device: &ID3D12Device) -> Result<Pipeline> {
    let object_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &object_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        root_cbv(1),
        root_cbv(2),
        root_cbv(3),
    ];
    let root_signature = root_signature(
        device,
        &parameters,
        &[],
        D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        "geometry root signature",
    )?;

    let vs = compile(GEOMETRY_HLSL, s!("VSMain"), s!("vs_5_0"))?;
    let ps = compile(GEOMETRY_HLSL, s!("PSMain"), s!("ps_5_0"))?;
    let input = [
        input_element(s!("POSITION"), DXGI_FORMAT_R32G32B32_FLOAT, 0),
        input_element(s!("NORMAL"), DXGI_FORMAT_R32G32B32_FLOAT, 12),
        input_element(s!("COLOR"), DXGI_FORMAT_R32G32B32A32_FLOAT, 24),
    ];

    let state = pipeline_state(
        device,
        PipelineDesc {
            root_signature: &root_signature,
            vs: &vs,
            ps: &ps,
            input: &input,
            depth: true,
            alpha_blend: false,
            cull: D3D12_CULL_MODE_BACK,
            name: "geometry pso",
        },
    )?;
    Ok(Pipeline { root_signature, state })
}

fn overlay_pipeline(device: &ID3D12Device) -> Result<Pipeline> {
    let texture_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: 2,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_VERTEX,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &texture_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
    ];
    let sampler = D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        MipLODBias: 0.0,
        MaxAnisotropy: 0,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
        MinLOD: 0.0,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: 0,
        RegisterSpace: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
    };
    let root_signature = root_signature(
        device,
        &parameters,
        &[sampler],
        D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        "overlay root signature",
    )?;

    let vs = compile(OVERLAY_HLSL, s!("VSMain"), s!("vs_5_0"))?;
    let ps = compile(OVERLAY_HLSL, s!("PSMain"), s!("ps_5_0"))?;
    let input = [
        input_element(s!("POSITION"), DXGI_FORMAT_R32G32_FLOAT, 0),
        input_element(s!("TEXCOORD"), DXGI_FORMAT_R32G32_FLOAT, 8),
        input_element(s!("COLOR"), DXGI_FORMAT_R8G8B8A8_UNORM, 16),
    ];

    let state = pipeline_state(
        device,
        PipelineDesc {
            root_signature: &root_signature,
            vs: &vs,
            ps: &ps,
            input: &input,
            depth: false,
            alpha_blend: true,
            cull: D3D12_CULL_MODE_NONE,
            name: "overlay pso",
        },
    )?;
    Ok(Pipeline { root_signature, state })
}
