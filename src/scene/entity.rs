//! 实体

use std::fmt;

use crate::scene::component::{Component, ComponentKind};
use crate::scene::transform::Transform;

/// 实体标识，在一个场景内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub(crate) u64);

impl EntityId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    pub name: String,
    pub tag: String,
    pub transform: Transform,
    components: Vec<Component>,
}

impl Entity {
    pub const DEFAULT_TAG: &'static str = "Untagged";

    pub(crate) fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tag: Self::DEFAULT_TAG.to_string(),
            transform: Transform::default(),
            components: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// 添加组件；同种类的组件会被替换
    pub fn add_component(&mut self, component: Component) -> &mut Self {
        let kind = component.kind();
        match self.components.iter_mut().find(|c| c.kind() == kind) {
            Some(existing) => *existing = component,
            None => self.components.push(component),
        }
        self
    }

    pub fn remove_component(&mut self, kind: ComponentKind) -> Option<Component> {
        let index = self.components.iter().position(|c| c.kind() == kind)?;
        Some(self.components.remove(index))
    }

    /// 移除被编辑成“无”值的组件，返回被移除的种类
    pub fn prune_unset_components(&mut self) -> Vec<ComponentKind> {
        let removed: Vec<ComponentKind> = self
            .components
            .iter()
            .filter(|c| c.is_unset())
            .map(Component::kind)
            .collect();
        if !removed.is_empty() {
            self.components.retain(|c| !c.is_unset());
            tracing::debug!(entity = self.id.value(), removed = ?removed, "Removed unset components");
        }
        removed
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    pub fn has(&self, kind: ComponentKind) -> bool {
        self.component(kind).is_some()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [Component] {
        &mut self.components
    }

    pub fn update(&mut self, delta_seconds: f32) {
        let transform = self.transform;
        for component in &mut self.components {
            component.update(&transform, delta_seconds);
        }
    }
}
