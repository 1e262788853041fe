//! 顶点数据定义
//!
//! 使用 `#[repr(C)]` 保证布局与 HLSL 输入布局一致，
//! 并实现 `Pod` / `Zeroable` 以便直接拷贝进上传内存。

use bytemuck::{Pod, Zeroable};

/// 场景网格顶点
///
/// 布局：`position`（12 字节）+ `normal`（12 字节）+ `color`（16 字节），共 40 字节。
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

/// 叠加层顶点（屏幕像素坐标）
///
/// 颜色为 RGBA8，与 egui 的顶点格式一致。
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: u32,
}

/// 内置单位立方体（边长 1，中心在原点），每个面独立法线
pub fn unit_cube() -> (Vec<MeshVertex>, Vec<u16>) {
    // (法线, 切向 u, 切向 v)
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, 1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (n, u, v) in faces {
        let base = vertices.len() as u16;
        for (su, sv) in [(-0.5, -0.5), (-0.5, 0.5), (0.5, 0.5), (0.5, -0.5)] {
            let position = [
                n[0] * 0.5 + u[0] * su + v[0] * sv,
                n[1] * 0.5 + u[1] * su + v[1] * sv,
                n[2] * 0.5 + u[2] * su + v[2] * sv,
            ];
            let color = [n[0].abs() * 0.5 + 0.5, n[1].abs() * 0.5 + 0.5, n[2].abs() * 0.5 + 0.5, 1.0];
            vertices.push(MeshVertex {
                position,
                normal: n,
                color,
            });
        }
        // 左手坐标系下顺时针为正面
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}
