//! 层级面板
//!
//! 按场景顺序列出实体，点击选中。

use egui;

use crate::scene::{EntityId, Scene};

/// 面板上的操作请求，由 `EditorOverlay` 处理
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyActions {
    pub save: bool,
    pub spawn: bool,
    pub despawn: Option<EntityId>,
}

pub fn render(ui: &mut egui::Ui, scene: &Scene, selected: &mut Option<EntityId>) -> HierarchyActions {
    let mut actions = HierarchyActions::default();

    ui.label(format!("{} ({} entities)", scene.name(), scene.len()));
    ui.horizontal(|ui| {
        actions.spawn = ui.button("Add").clicked();
        if ui.add_enabled(selected.is_some(), egui::Button::new("Remove")).clicked() {
            actions.despawn = *selected;
        }
        actions.save = ui.button("Save").clicked();
    });
    ui.separator();

    egui::ScrollArea::vertical().max_height(300.0).show(ui, |ui| {
        for entity in scene.entities() {
            let is_selected = *selected == Some(entity.id());
            if ui.selectable_label(is_selected, entity.name.as_str()).clicked() {
                *selected = if is_selected { None } else { Some(entity.id()) };
            }
        }
    });

    actions
}
