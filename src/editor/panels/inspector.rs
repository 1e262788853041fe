//! 检查器面板
//!
//! 编辑选中实体的名称、Transform 和各组件。

use egui;

use crate::core::math::Vector3;
use crate::scene::component::InspectAction;
use crate::scene::Entity;

fn vector_row(ui: &mut egui::Ui, label: &str, value: &mut Vector3, speed: f64) {
    ui.label(label);
    ui.horizontal(|ui| {
        for (axis, component) in ["X:", "Y:", "Z:"].into_iter().zip(value.iter_mut()) {
            ui.label(axis);
            ui.add(egui::DragValue::new(component).speed(speed));
        }
    });
}

pub fn render(ui: &mut egui::Ui, entity: &mut Entity) {
    ui.horizontal(|ui| {
        ui.label("Name");
        ui.text_edit_singleline(&mut entity.name);
    });
    ui.label(format!("Id: {}    Tag: {}", entity.id(), entity.tag));
    ui.separator();

    ui.collapsing("Transform", |ui| {
        vector_row(ui, "Position", &mut entity.transform.position, 0.1);
        vector_row(ui, "Rotation (deg)", &mut entity.transform.rotation, 1.0);
        vector_row(ui, "Scale", &mut entity.transform.scale, 0.1);

        if ui.button("Reset").clicked() {
            entity.transform = Default::default();
        }
    });

    let mut removed = Vec::new();
    for component in entity.components_mut() {
        if component.inspect(ui) == InspectAction::Remove {
            removed.push(component.kind());
        }
    }
    for kind in removed {
        entity.remove_component(kind);
        tracing::debug!(entity = entity.id().value(), component = kind.key(), "Removed component");
    }
}
