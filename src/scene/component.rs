//! 实体组件
//!
//! 组件是封闭集合，用带标签的枚举表示：网格渲染器、Lua 脚本（仅保存路径）、
//! 编辑器选择。`ComponentKind` 用于按种类查询和序列化时的键名。

use crate::core::math::Vector3;
use crate::scene::transform::Transform;

/// 场景文件中表示“没有模型 / 没有脚本”的值
pub const NONE_SENTINEL: &str = "NONE";
/// 场景文件中表示“不可选择”的值
pub const OFF_SENTINEL: &str = "OFF";

/// 网格渲染器的材质描述（纹理以路径保存）
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub material_type: String,
    pub albedo: String,
    pub normal: String,
    pub metallic: String,
    pub roughness: String,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            material_type: "PBR".to_string(),
            albedo: NONE_SENTINEL.to_string(),
            normal: NONE_SENTINEL.to_string(),
            metallic: NONE_SENTINEL.to_string(),
            roughness: NONE_SENTINEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshRenderer {
    /// 模型路径；渲染时总是使用内置立方体
    pub model: String,
    pub material: Material,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LuaScript {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorSelection {
    pub mode: String,
    /// 拾取球半径（世界单位）
    pub radius: f32,
    /// 拾取球中心，随 Transform 更新
    pub center: Vector3,
}

impl EditorSelection {
    pub const DEFAULT_RADIUS: f32 = 1.0;

    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            radius: Self::DEFAULT_RADIUS,
            center: Vector3::zeros(),
        }
    }

    /// 射线与拾取球求交，返回沿射线的距离
    pub fn intersect(&self, origin: &Vector3, direction: &Vector3) -> Option<f32> {
        let dir = direction.normalize();
        let to_center = self.center - origin;
        let along = to_center.dot(&dir);
        let dist_sq = to_center.norm_squared() - along * along;
        let r_sq = self.radius * self.radius;
        if dist_sq > r_sq {
            return None;
        }
        let half_chord = (r_sq - dist_sq).sqrt();
        let t = if along - half_chord >= 0.0 {
            along - half_chord
        } else {
            along + half_chord
        };
        (t >= 0.0).then_some(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    MeshRenderer,
    LuaScript,
    EditorSelection,
}

impl ComponentKind {
    /// 场景文件中的键名
    pub fn key(&self) -> &'static str {
        match self {
            ComponentKind::MeshRenderer => "MeshRenderer",
            ComponentKind::LuaScript => "LuaScript",
            ComponentKind::EditorSelection => "EditorSelection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    MeshRenderer(MeshRenderer),
    LuaScript(LuaScript),
    EditorSelection(EditorSelection),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::MeshRenderer(_) => ComponentKind::MeshRenderer,
            Component::LuaScript(_) => ComponentKind::LuaScript,
            Component::EditorSelection(_) => ComponentKind::EditorSelection,
        }
    }

    /// 关键字段等于场景文件里的“无”值，保存后重新加载时该组件不存在
    pub fn is_unset(&self) -> bool {
        match self {
            Component::MeshRenderer(mesh) => mesh.model == NONE_SENTINEL,
            Component::LuaScript(script) => script.path == NONE_SENTINEL,
            Component::EditorSelection(selection) => selection.mode == OFF_SENTINEL,
        }
    }

    /// 每帧更新
    pub fn update(&mut self, transform: &Transform, _delta_seconds: f32) {
        match self {
            Component::EditorSelection(selection) => selection.center = transform.position,
            Component::MeshRenderer(_) | Component::LuaScript(_) => {}
        }
    }

    /// 在编辑器检查器中显示并编辑
    ///
    /// 点击 "Remove" 或提交一个“无”值（文本框失去焦点）时返回 `Remove`；
    /// 输入过程中的中间值不会移除组件。
    pub fn inspect(&mut self, ui: &mut egui::Ui) -> InspectAction {
        let mut remove = false;
        let mut committed = false;
        match self {
            Component::MeshRenderer(mesh) => {
                egui::CollapsingHeader::new("Mesh Renderer")
                    .default_open(true)
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            ui.label("Model");
                            committed |= ui.text_edit_singleline(&mut mesh.model).lost_focus();
                        });
                        ui.horizontal(|ui| {
                            ui.label("Material");
                            ui.text_edit_singleline(&mut mesh.material.material_type);
                        });
                        ui.label(format!("Albedo: {}", mesh.material.albedo));
                        remove = ui.small_button("Remove").clicked();
                    });
            }
            Component::LuaScript(script) => {
                egui::CollapsingHeader::new("Lua Script")
                    .default_open(true)
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            ui.label("File");
                            committed |= ui.text_edit_singleline(&mut script.path).lost_focus();
                        });
                        remove = ui.small_button("Remove").clicked();
                    });
            }
            Component::EditorSelection(selection) => {
                egui::CollapsingHeader::new("Editor Selection")
                    .default_open(false)
                    .show(ui, |ui| {
                        ui.label(format!("Mode: {}", selection.mode));
                        ui.add(
                            egui::DragValue::new(&mut selection.radius)
                                .speed(0.05)
                                .clamp_range(0.01..=100.0)
                                .prefix("radius "),
                        );
                        remove = ui.small_button("Remove").clicked();
                    });
            }
        }

        if remove || (committed && self.is_unset()) {
            InspectAction::Remove
        } else {
            InspectAction::Keep
        }
    }
}

/// 检查器对组件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectAction {
    Keep,
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_follows_transform() {
        let mut component = Component::EditorSelection(EditorSelection::new("DEFAULT"));
        let transform = Transform::from_position(Vector3::new(1.0, 2.0, 3.0));
        component.update(&transform, 0.016);
        match component {
            Component::EditorSelection(s) => assert_eq!(s.center, Vector3::new(1.0, 2.0, 3.0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_sentinel_values_mark_component_unset() {
        let mut mesh = MeshRenderer { model: "cube.obj".into(), material: Material::default() };
        assert!(!Component::MeshRenderer(mesh.clone()).is_unset());
        mesh.model = NONE_SENTINEL.into();
        assert!(Component::MeshRenderer(mesh).is_unset());
        assert!(Component::LuaScript(LuaScript { path: "NONE".into() }).is_unset());
        assert!(Component::EditorSelection(EditorSelection::new("OFF")).is_unset());
        assert!(!Component::EditorSelection(EditorSelection::new("DEFAULT")).is_unset());
    }

    fn inspect_once(component: &mut Component) -> InspectAction {
        let ctx = egui::Context::default();
        let mut action = InspectAction::Keep;
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            egui::CentralPanel::default().show(ctx, |ui| action = component.inspect(ui));
        });
        action
    }

    #[test]
    fn test_uncommitted_sentinel_keeps_component() {
        // 正在输入 "NONE..." 开头的路径时组件保留
        let mut script = Component::LuaScript(LuaScript { path: "NONE".into() });
        assert_eq!(inspect_once(&mut script), InspectAction::Keep);
        let mut mesh = Component::MeshRenderer(MeshRenderer { model: "NO".into(), material: Material::default() });
        assert_eq!(inspect_once(&mut mesh), InspectAction::Keep);
    }

    #[test]
    fn test_ray_sphere_intersection() {
        let mut selection = EditorSelection::new("DEFAULT");
        selection.center = Vector3::new(0.0, 0.0, 10.0);
        let hit = selection.intersect(&Vector3::zeros(), &Vector3::z()).unwrap();
        assert!((hit - 9.0).abs() < 1e-5);
        assert!(selection.intersect(&Vector3::zeros(), &Vector3::x()).is_none());
        assert!(selection.intersect(&Vector3::zeros(), &-Vector3::z()).is_none());
    }
}
