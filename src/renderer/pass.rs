//! 渲染通道
//!
//! 每帧按固定顺序录制：Clear → Geometry → Ui → Editor → Present。
//! 每个通道自己绑定管线、根参数和描述符堆，通道之间不继承任何绑定状态。

use crate::gfx::ScissorRect;
use crate::renderer::texture::OverlayTextureId;
use crate::renderer::vertex::OverlayVertex;

/// 渲染通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPass {
    /// 清除颜色与深度
    Clear,
    /// 场景几何，按场景遍历顺序逐对象绘制
    Geometry,
    /// 游戏 UI 叠加层
    Ui,
    /// 编辑器叠加层
    Editor,
    /// 后备缓冲区转换回 Present
    Present,
}

/// 每帧的通道顺序
pub const PASS_ORDER: [RenderPass; 5] = [
    RenderPass::Clear,
    RenderPass::Geometry,
    RenderPass::Ui,
    RenderPass::Editor,
    RenderPass::Present,
];

impl RenderPass {
    pub fn name(&self) -> &'static str {
        match self {
            RenderPass::Clear => "Clear",
            RenderPass::Geometry => "Geometry",
            RenderPass::Ui => "UI",
            RenderPass::Editor => "Editor",
            RenderPass::Present => "Present",
        }
    }

    /// 是否为叠加层通道（接收 `OverlayPainter` 的输出）
    pub fn is_overlay(&self) -> bool {
        matches!(self, RenderPass::Ui | RenderPass::Editor)
    }
}

/// 一批叠加层三角形，坐标为屏幕像素
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayMesh {
    pub vertices: Vec<OverlayVertex>,
    pub indices: Vec<u32>,
    /// 采样的纹理；纯色网格使用白色纹理
    pub texture: OverlayTextureId,
    /// 屏幕像素裁剪矩形，`None` 表示整个后备缓冲区
    pub clip: Option<ScissorRect>,
}

impl OverlayMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// 追加一个轴对齐矩形
    pub fn push_rect(&mut self, min: [f32; 2], max: [f32; 2], color: u32) {
        let base = self.vertices.len() as u32;
        let corners = [[min[0], min[1]], [max[0], min[1]], [max[0], max[1]], [min[0], max[1]]];
        self.vertices.extend(corners.iter().map(|&pos| OverlayVertex {
            pos,
            uv: [0.0, 0.0],
            color,
        }));
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// 叠加层绘制者
///
/// 渲染器在对应通道内调用 `paint`，把返回的网格拷贝进当前帧槽的叠加层上传环。
pub trait OverlayPainter: Send {
    /// 该绘制者所属的通道（`Ui` 或 `Editor`）
    fn pass(&self) -> RenderPass;

    fn paint(&mut self, screen: (u32, u32)) -> Vec<OverlayMesh>;
}
