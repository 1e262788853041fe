//! 输入系统
//!
//! 记录键盘 / 鼠标状态并每帧转换为相机移动：
//! WASD 平移，按住右键拖动旋转视角。

use std::collections::HashSet;

use tracing::{debug, warn};
use winit::event::{ElementState, MouseButton};
use winit::keyboard::KeyCode;
use winit::window::Window;

use crate::scene::Camera;

/// 输入系统参数
#[derive(Debug, Clone)]
pub struct InputConfig {
    /// 相机移动速度（单位 / 秒）
    pub move_speed: f32,
    /// 鼠标灵敏度（度 / 像素）
    pub mouse_sensitivity: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            move_speed: 10.0,
            mouse_sensitivity: 0.25,
        }
    }
}

pub struct InputSystem {
    pressed_keys: HashSet<KeyCode>,
    mouse_buttons: HashSet<MouseButton>,
    cursor: Option<(f64, f64)>,
    mouse_delta: (f32, f32),
    config: InputConfig,
    cursor_locked: bool,
}

impl Default for InputSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSystem {
    pub fn new() -> Self {
        Self::with_config(InputConfig::default())
    }

    pub fn with_config(config: InputConfig) -> Self {
        Self {
            pressed_keys: HashSet::new(),
            mouse_buttons: HashSet::new(),
            cursor: None,
            mouse_delta: (0.0, 0.0),
            config,
            cursor_locked: false,
        }
    }

    pub fn on_keyboard_input(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.pressed_keys.insert(key);
            }
            ElementState::Released => {
                self.pressed_keys.remove(&key);
            }
        }
    }

    pub fn on_mouse_button(&mut self, button: MouseButton, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.mouse_buttons.insert(button);
            }
            ElementState::Released => {
                self.mouse_buttons.remove(&button);
            }
        }
    }

    /// 光标移动，增量在帧内累计
    pub fn on_mouse_move(&mut self, position: (f64, f64)) {
        if let Some(last) = self.cursor {
            self.mouse_delta.0 += (position.0 - last.0) as f32;
            self.mouse_delta.1 += (position.1 - last.1) as f32;
        }
        self.cursor = Some(position);
    }

    pub fn cursor(&self) -> Option<(f64, f64)> {
        self.cursor
    }

    /// 每帧调用一次，消费累计的鼠标增量
    pub fn update_camera(&mut self, camera: &mut Camera, delta_seconds: f32) {
        let distance = self.config.move_speed * delta_seconds;
        let axis = |positive: KeyCode, negative: KeyCode| {
            self.pressed_keys.contains(&positive) as i32 - self.pressed_keys.contains(&negative) as i32
        };

        let forward = axis(KeyCode::KeyW, KeyCode::KeyS);
        let right = axis(KeyCode::KeyD, KeyCode::KeyA);
        if forward != 0 {
            camera.walk(forward as f32 * distance);
        }
        if right != 0 {
            camera.strafe(right as f32 * distance);
        }

        let (dx, dy) = std::mem::take(&mut self.mouse_delta);
        if self.mouse_buttons.contains(&MouseButton::Right) && (dx.abs() > 1e-3 || dy.abs() > 1e-3) {
            let sensitivity = self.config.mouse_sensitivity;
            camera.rotate(dy * sensitivity, dx * sensitivity);
        }
    }

    /// 隐藏并锁定光标（右键拖动期间）
    pub fn lock_cursor(&mut self, window: &Window) {
        if self.cursor_locked {
            return;
        }
        window.set_cursor_visible(false);

        // Confined 的支持面更广，失败时再试 Locked
        if let Err(e) = window.set_cursor_grab(winit::window::CursorGrabMode::Confined) {
            if let Err(e2) = window.set_cursor_grab(winit::window::CursorGrabMode::Locked) {
                warn!(confined = %e, locked = %e2, "Failed to grab cursor");
                return;
            }
        }
        debug!("Cursor grabbed");
        self.cursor_locked = true;
    }

    pub fn unlock_cursor(&mut self, window: &Window) {
        window.set_cursor_visible(true);
        if !self.cursor_locked {
            return;
        }
        if let Err(e) = window.set_cursor_grab(winit::window::CursorGrabMode::None) {
            warn!(error = %e, "Failed to release cursor grab");
        }
        self.cursor_locked = false;
    }

    /// 窗口失去焦点时清空状态
    pub fn reset(&mut self) {
        self.pressed_keys.clear();
        self.mouse_buttons.clear();
        self.mouse_delta = (0.0, 0.0);
        self.cursor = None;
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_mouse_button_pressed(&self, button: MouseButton) -> bool {
        self.mouse_buttons.contains(&button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wasd_moves_camera() {
        let mut input = InputSystem::new();
        let mut camera = Camera {
            pitch: 0.0,
            ..Camera::default()
        };
        let start = camera.position;

        input.on_keyboard_input(KeyCode::KeyW, ElementState::Pressed);
        assert!(input.is_key_pressed(KeyCode::KeyW));
        input.update_camera(&mut camera, 0.5);
        assert_relative_eq!(camera.position.z - start.z, 5.0, epsilon = 1e-4);

        input.on_keyboard_input(KeyCode::KeyW, ElementState::Released);
        input.on_keyboard_input(KeyCode::KeyA, ElementState::Pressed);
        input.update_camera(&mut camera, 0.1);
        assert_relative_eq!(camera.position.x - start.x, -1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rotation_requires_right_button() {
        let mut input = InputSystem::new();
        let mut camera = Camera::default();
        let yaw = camera.yaw;

        input.on_mouse_move((100.0, 100.0));
        input.on_mouse_move((140.0, 100.0));
        input.update_camera(&mut camera, 0.016);
        assert_eq!(camera.yaw, yaw);

        input.on_mouse_button(MouseButton::Right, ElementState::Pressed);
        assert!(input.is_mouse_button_pressed(MouseButton::Right));
        input.on_mouse_move((180.0, 100.0));
        input.update_camera(&mut camera, 0.016);
        assert_relative_eq!(camera.yaw, yaw + 10.0, epsilon = 1e-4);
    }
}
