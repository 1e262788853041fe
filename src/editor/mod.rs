//! 编辑器叠加层
//!
//! 基于 egui 的即时模式编辑器，运行在游戏线程：读取并修改实时场景，
//! 把 egui 的输出三角化为 `OverlayMesh`，随场景快照交给渲染器的 Editor 通道。
//! 字体图集等纹理的变化也随快照发送。渲染器一侧只看到三角形和像素，不接触场景。

mod graph;
pub mod panels;

use std::time::Instant;

use egui::epaint::{ImageData, ImageDelta, Primitive};

use crate::gfx::ScissorRect;
use crate::renderer::pass::OverlayMesh;
use crate::renderer::stats::FrameStats;
use crate::renderer::texture::{OverlayTextureId, OverlayTextureUpdate};
use crate::renderer::vertex::OverlayVertex;
use crate::scene::{EntityId, Scene};

use panels::hierarchy::HierarchyActions;

pub use graph::FrameTimeGraph;

/// 一帧编辑器输出
#[derive(Debug, Default)]
pub struct EditorFrame {
    pub meshes: Vec<OverlayMesh>,
    pub texture_updates: Vec<OverlayTextureUpdate>,
    pub texture_frees: Vec<OverlayTextureId>,
}

impl EditorFrame {
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.texture_updates.is_empty() && self.texture_frees.is_empty()
    }
}

/// 编辑器叠加层
pub struct EditorOverlay {
    context: egui::Context,
    events: Vec<egui::Event>,
    pointer: egui::Pos2,
    start: Instant,
    visible: bool,
    selected: Option<EntityId>,
    stats: FrameStats,
    save_requested: bool,
    /// 是否已经跑过首次布局
    warmed_up: bool,
}

impl Default for EditorOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorOverlay {
    pub fn new() -> Self {
        Self {
            context: egui::Context::default(),
            events: Vec::new(),
            pointer: egui::Pos2::ZERO,
            start: Instant::now(),
            visible: true,
            selected: None,
            stats: FrameStats::default(),
            save_requested: false,
            warmed_up: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn toggle(&mut self) {
        self.visible = !self.visible;
        tracing::debug!(visible = self.visible, "Editor overlay toggled");
    }

    pub fn selected(&self) -> Option<EntityId> {
        self.selected
    }

    pub fn select(&mut self, entity: Option<EntityId>) {
        self.selected = entity;
    }

    /// 渲染器发布的最新统计
    pub fn update_stats(&mut self, stats: FrameStats) {
        self.stats = stats;
    }

    /// 取走“保存场景”请求
    pub fn take_save_request(&mut self) -> bool {
        std::mem::take(&mut self.save_requested)
    }

    pub fn pointer_moved(&mut self, x: f32, y: f32) {
        self.pointer = egui::pos2(x, y);
        self.events.push(egui::Event::PointerMoved(self.pointer));
    }

    pub fn pointer_button(&mut self, primary: bool, pressed: bool) {
        let button = if primary {
            egui::PointerButton::Primary
        } else {
            egui::PointerButton::Secondary
        };
        self.events.push(egui::Event::PointerButton {
            pos: self.pointer,
            button,
            pressed,
            modifiers: egui::Modifiers::default(),
        });
    }

    pub fn scroll(&mut self, dx: f32, dy: f32) {
        self.events.push(egui::Event::Scroll(egui::vec2(dx, dy)));
    }

    pub fn text(&mut self, text: &str) {
        self.events.push(egui::Event::Text(text.to_string()));
    }

    /// 上一帧结束时指针是否落在编辑器窗口上
    pub fn wants_pointer(&self) -> bool {
        self.visible && (self.context.wants_pointer_input() || self.context.is_pointer_over_area())
    }

    /// 在编辑器未占用指针时，用相机射线拾取实体
    pub fn click_select(&mut self, scene: &Scene, extent: (u32, u32)) -> Option<EntityId> {
        if self.wants_pointer() {
            return self.selected;
        }
        let (origin, direction) =
            scene
                .camera
                .screen_ray(self.pointer.x, self.pointer.y, extent.0, extent.1);
        self.selected = scene.pick(&origin, &direction);
        if let Some(id) = self.selected {
            tracing::debug!(entity = %id, "Entity picked");
        }
        self.selected
    }

    fn raw_input(&self, screen: (u32, u32), events: Vec<egui::Event>) -> egui::RawInput {
        egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(screen.0 as f32, screen.1 as f32),
            )),
            time: Some(self.start.elapsed().as_secs_f64()),
            events,
            ..Default::default()
        }
    }

    /// 构建一帧编辑器界面并三角化
    pub fn build(&mut self, scene: &mut Scene, screen: (u32, u32)) -> EditorFrame {
        let events = std::mem::take(&mut self.events);
        if !self.visible || screen.0 == 0 || screen.1 == 0 {
            return EditorFrame::default();
        }

        // 选中的实体可能已被删除
        if let Some(id) = self.selected {
            if scene.entity(id).is_none() {
                self.selected = None;
            }
        }

        let ctx = self.context.clone();
        let mut textures = egui::epaint::textures::TexturesDelta::default();

        // egui 第一次显示窗口时只测量尺寸，不产生可见形状；
        // 先用空输入跑一遍，只保留其中的纹理变化
        if !self.warmed_up {
            let warm_up = ctx.run(self.raw_input(screen, Vec::new()), |ctx| {
                show_panels(ctx, scene, &mut self.selected, &self.stats, screen);
            });
            textures.append(warm_up.textures_delta);
            self.warmed_up = true;
            tracing::debug!(width = screen.0, height = screen.1, "Editor layout warmed up");
        }

        let mut actions = HierarchyActions::default();
        let output = ctx.run(self.raw_input(screen, events), |ctx| {
            actions = show_panels(ctx, scene, &mut self.selected, &self.stats, screen);
        });
        textures.append(output.textures_delta);

        if actions.spawn {
            let count = scene.len();
            let id = scene.spawn(format!("Entity {count}")).id();
            self.selected = Some(id);
        }
        if let Some(id) = actions.despawn {
            scene.despawn(id);
            self.selected = None;
        }
        self.save_requested |= actions.save;

        let primitives = ctx.tessellate(output.shapes, output.pixels_per_point);
        EditorFrame {
            meshes: to_overlay_meshes(primitives, output.pixels_per_point),
            texture_updates: textures
                .set
                .into_iter()
                .filter_map(|(id, delta)| to_texture_update(id, delta))
                .collect(),
            texture_frees: textures.free.into_iter().filter_map(managed_texture).collect(),
        }
    }
}

fn show_panels(
    ctx: &egui::Context,
    scene: &mut Scene,
    selected: &mut Option<EntityId>,
    stats: &FrameStats,
    screen: (u32, u32),
) -> HierarchyActions {
    let mut actions = HierarchyActions::default();

    egui::Window::new("Hierarchy")
        .default_pos([10.0, 10.0])
        .default_width(220.0)
        .show(ctx, |ui| {
            actions = panels::hierarchy::render(ui, scene, selected);
        });

    egui::Window::new("Inspector")
        .default_pos([screen.0 as f32 - 300.0, 10.0])
        .default_width(280.0)
        .show(ctx, |ui| match selected.and_then(|id| scene.entity_mut(id)) {
            Some(entity) => panels::inspector::render(ui, entity),
            None => {
                ui.label("No entity selected");
            }
        });

    egui::Window::new("Renderer")
        .default_pos([10.0, 360.0])
        .default_width(260.0)
        .show(ctx, |ui| {
            panels::renderer::render(ui, stats);
            panels::renderer::post_processing(ui, &mut scene.post_fx);
        });

    actions
}

fn managed_texture(id: egui::TextureId) -> Option<OverlayTextureId> {
    match id {
        egui::TextureId::Managed(id) => Some(OverlayTextureId::Managed(id)),
        egui::TextureId::User(id) => {
            tracing::warn!(texture = id, "User textures are not supported by the editor overlay");
            None
        }
    }
}

/// egui 纹理变化转换为 RGBA8 预乘像素
fn to_texture_update(id: egui::TextureId, delta: ImageDelta) -> Option<OverlayTextureUpdate> {
    let id = managed_texture(id)?;
    let [width, height] = delta.image.size();
    let pixels: Vec<u8> = match &delta.image {
        ImageData::Color(image) => image.pixels.iter().flat_map(|c| c.to_array()).collect(),
        ImageData::Font(font) => font.srgba_pixels(None).flat_map(|c| c.to_array()).collect(),
    };
    Some(OverlayTextureUpdate {
        id,
        origin: delta.pos.map(|[x, y]| [x as u32, y as u32]),
        width: width as u32,
        height: height as u32,
        pixels,
    })
}

/// 点坐标的裁剪矩形转换为像素，向外取整
fn clip_to_pixels(rect: egui::Rect, pixels_per_point: f32) -> ScissorRect {
    ScissorRect {
        left: (rect.min.x * pixels_per_point).floor() as i32,
        top: (rect.min.y * pixels_per_point).floor() as i32,
        right: (rect.max.x * pixels_per_point).ceil() as i32,
        bottom: (rect.max.y * pixels_per_point).ceil() as i32,
    }
}

/// egui 三角形转换为叠加层网格（像素坐标，RGBA8 顶点色）
fn to_overlay_meshes(primitives: Vec<egui::ClippedPrimitive>, pixels_per_point: f32) -> Vec<OverlayMesh> {
    primitives
        .into_iter()
        .filter_map(|clipped| {
            let clip = clip_to_pixels(clipped.clip_rect, pixels_per_point);
            match clipped.primitive {
                Primitive::Mesh(mesh) if !mesh.indices.is_empty() => Some(OverlayMesh {
                    vertices: mesh
                        .vertices
                        .iter()
                        .map(|v| OverlayVertex {
                            pos: [v.pos.x * pixels_per_point, v.pos.y * pixels_per_point],
                            uv: [v.uv.x, v.uv.y],
                            color: u32::from_le_bytes(v.color.to_array()),
                        })
                        .collect(),
                    indices: mesh.indices,
                    texture: managed_texture(mesh.texture_id).unwrap_or_default(),
                    clip: Some(clip),
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Vector3;

    #[test]
    fn test_build_produces_meshes() {
        let mut scene = Scene::demo();
        let mut editor = EditorOverlay::new();
        // 第一次构建就有可见的窗口
        let frame = editor.build(&mut scene, (1280, 720));
        assert!(!frame.meshes.is_empty());
        for mesh in &frame.meshes {
            let max = mesh.vertices.len() as u32;
            assert!(mesh.indices.iter().all(|&i| i < max));
        }
    }

    #[test]
    fn test_first_build_uploads_the_font_atlas() {
        let mut scene = Scene::demo();
        let mut editor = EditorOverlay::new();
        let frame = editor.build(&mut scene, (1280, 720));

        let atlas = frame
            .texture_updates
            .iter()
            .find(|u| u.id == OverlayTextureId::Managed(0) && u.origin.is_none())
            .expect("font atlas uploaded");
        assert_eq!(atlas.pixels.len(), (atlas.width * atlas.height * 4) as usize);

        // 文字网格采样图集，并带着窗口的裁剪矩形
        assert!(frame
            .meshes
            .iter()
            .any(|m| m.texture == OverlayTextureId::Managed(0)));
        assert!(frame.meshes.iter().all(|m| m.clip.is_some()));
        assert!(frame
            .meshes
            .iter()
            .filter_map(|m| m.clip)
            .any(|clip| !clip.clamp_to(1280, 720).is_empty()));
    }

    #[test]
    fn test_clip_rect_rounds_outward_to_pixels() {
        let rect = egui::Rect::from_min_max(egui::pos2(10.2, 5.5), egui::pos2(20.4, 30.0));
        assert_eq!(
            clip_to_pixels(rect, 2.0),
            ScissorRect {
                left: 20,
                top: 11,
                right: 41,
                bottom: 60,
            }
        );
    }

    #[test]
    fn test_hidden_editor_produces_nothing() {
        let mut scene = Scene::demo();
        let mut editor = EditorOverlay::new();
        editor.toggle();
        assert!(editor.build(&mut scene, (1280, 720)).is_empty());
        editor.toggle();
        assert!(editor.build(&mut scene, (0, 0)).is_empty());
    }

    #[test]
    fn test_click_selects_entity_under_cursor() {
        let mut scene = Scene::demo();
        scene.camera.position = Vector3::new(0.0, 0.0, -6.0);
        scene.camera.pitch = 0.0;
        scene.update(0.0);

        let mut editor = EditorOverlay::new();
        editor.toggle();
        editor.pointer_moved(640.0, 360.0);
        let picked = editor.click_select(&scene, (1280, 720)).unwrap();
        assert_eq!(scene.entity(picked).unwrap().name, "Cube 2");

        editor.pointer_moved(5.0, 5.0);
        assert_eq!(editor.click_select(&scene, (1280, 720)), None);
    }

    #[test]
    fn test_removed_selection_is_cleared() {
        let mut scene = Scene::demo();
        let mut editor = EditorOverlay::new();
        let id = scene.entities()[0].id();
        editor.select(Some(id));
        scene.despawn(id);
        editor.build(&mut scene, (800, 600));
        assert_eq!(editor.selected(), None);
    }
}
