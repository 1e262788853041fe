//! 编辑器面板

pub mod hierarchy;
pub mod inspector;
pub mod renderer;
