//! 场景
//!
//! 场景是实体的有序列表，外加相机和光源。每帧先 `update`，再 `snapshot`
//! 生成交给渲染器的只读副本。场景文件的读写见 `serializer`。

pub mod camera;
pub mod component;
pub mod entity;
pub mod light;
pub mod serializer;
pub mod snapshot;
pub mod transform;

use crate::core::math::Vector3;
use crate::renderer::constant_buffer::PostFxConstants;

pub use camera::Camera;
pub use component::{Component, ComponentKind, EditorSelection, LuaScript, Material, MeshRenderer};
pub use entity::{Entity, EntityId};
pub use light::LightSet;
pub use snapshot::{Drawable, SceneSnapshot};
pub use transform::Transform;

#[derive(Debug, Clone)]
pub struct Scene {
    name: String,
    entities: Vec<Entity>,
    next_id: u64,
    pub camera: Camera,
    pub lights: LightSet,
    /// 后处理参数，不写入场景文件
    pub post_fx: PostFxConstants,
    time: f32,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
            next_id: 1,
            camera: Camera::default(),
            lights: LightSet::default(),
            post_fx: PostFxConstants::default(),
            time: 0.0,
        }
    }

    /// 内置演示场景：一排立方体
    pub fn demo() -> Self {
        let mut scene = Scene::new("Demo");
        for i in 0..5 {
            let x = (i as f32 - 2.0) * 2.0;
            let entity = scene.spawn(format!("Cube {i}"));
            entity.transform = Transform::from_position(Vector3::new(x, 0.0, 4.0))
                .with_rotation(Vector3::new(0.0, i as f32 * 15.0, 0.0));
            entity
                .add_component(Component::MeshRenderer(MeshRenderer {
                    model: "builtin:cube".to_string(),
                    material: Material::default(),
                }))
                .add_component(Component::EditorSelection(EditorSelection::new("DEFAULT")));
        }
        scene
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// 创建一个新实体并追加到场景末尾
    pub fn spawn(&mut self, name: impl Into<String>) -> &mut Entity {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.push(Entity::new(id, name));
        let last = self.entities.len() - 1;
        &mut self.entities[last]
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let index = self.entities.iter().position(|e| e.id() == id)?;
        Some(self.entities.remove(index))
    }

    /// 移除所有实体中被编辑成“无”值的组件，返回移除的数量
    pub fn prune_unset_components(&mut self) -> usize {
        self.entities
            .iter_mut()
            .map(|entity| entity.prune_unset_components().len())
            .sum()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id() == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn update(&mut self, delta_seconds: f32) {
        self.time += delta_seconds;
        for entity in &mut self.entities {
            entity.update(delta_seconds);
        }
    }

    /// 沿射线拾取最近的可选择实体
    pub fn pick(&self, origin: &Vector3, direction: &Vector3) -> Option<EntityId> {
        self.entities
            .iter()
            .filter_map(|entity| match entity.component(ComponentKind::EditorSelection) {
                Some(Component::EditorSelection(selection)) => {
                    selection.intersect(origin, direction).map(|t| (t, entity.id()))
                }
                _ => None,
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }

    /// 按遍历顺序收集带网格渲染器的实体
    pub fn snapshot(&self, delta_seconds: f32) -> SceneSnapshot {
        let drawables = self
            .entities
            .iter()
            .filter(|e| e.has(ComponentKind::MeshRenderer))
            .map(|e| Drawable {
                entity: e.id(),
                world: e.transform.world_matrix(),
            })
            .collect();

        SceneSnapshot {
            scene_name: self.name.clone(),
            drawables,
            camera: self.camera,
            lights: self.lights.to_constants(),
            light_counts: self.lights.counts(),
            post_fx: self.post_fx,
            time: self.time,
            delta_seconds,
            overlays: Vec::new(),
            texture_updates: Vec::new(),
            texture_frees: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_order_is_kept() {
        let mut scene = Scene::new("test");
        let a = scene.spawn("a").id();
        let b = scene.spawn("b").id();
        assert_ne!(a, b);
        scene.despawn(a);
        let c = scene.spawn("c").id();
        assert_ne!(c, a);
        let names: Vec<_> = scene.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_snapshot_keeps_traversal_order() {
        let mut scene = Scene::demo();
        scene.spawn("empty");
        let snapshot = scene.snapshot(0.016);
        assert_eq!(snapshot.drawables.len(), 5);
        let ids: Vec<_> = snapshot.drawables.iter().map(|d| d.entity).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_pick_nearest() {
        let mut scene = Scene::demo();
        scene.update(0.0);
        let origin = Vector3::new(0.0, 0.0, -10.0);
        let picked = scene.pick(&origin, &Vector3::z()).unwrap();
        assert_eq!(scene.entity(picked).unwrap().name, "Cube 2");
        assert!(scene.pick(&origin, &-Vector3::z()).is_none());
    }
}
