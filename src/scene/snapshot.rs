//! 场景快照
//!
//! 更新完成后构建的只读副本，交给渲染器（可能在另一个线程）。
//! 可绘制对象保持场景遍历顺序。

use crate::core::math::Matrix4;
use crate::renderer::constant_buffer::{LightConstants, PostFxConstants};
use crate::renderer::pass::{OverlayMesh, RenderPass};
use crate::renderer::texture::{OverlayTextureId, OverlayTextureUpdate};
use crate::scene::camera::Camera;
use crate::scene::entity::EntityId;
use crate::scene::light::LightCounts;

#[derive(Debug, Clone, PartialEq)]
pub struct Drawable {
    pub entity: EntityId,
    pub world: Matrix4,
}

#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub scene_name: String,
    pub drawables: Vec<Drawable>,
    pub camera: Camera,
    pub lights: LightConstants,
    pub light_counts: LightCounts,
    pub post_fx: PostFxConstants,
    /// 场景启动以来的秒数
    pub time: f32,
    pub delta_seconds: f32,
    /// 游戏线程生成的叠加层（编辑器界面）
    pub overlays: Vec<(RenderPass, OverlayMesh)>,
    /// 叠加层纹理的创建与更新，按到达顺序应用
    pub texture_updates: Vec<OverlayTextureUpdate>,
    /// 本帧之后不再使用的叠加层纹理
    pub texture_frees: Vec<OverlayTextureId>,
}
