use std::collections::HashSet;
use glam::Vec2;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Input snapshot fed from window events and polled once per loop
/// iteration.
#[derive(Default)]
pub struct InputState {
    pub mouse_curr_pos: Vec2,
    pub mouse_prev_pos: Vec2,
    pub mouse_right_down: bool,

    keys_down: HashSet<KeyCode>,
    keys_just_pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn process_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.mouse_right_down = *state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.mouse_curr_pos = Vec2::new(position.x as f32, position.y as f32);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => {
                            if !event.repeat && self.keys_down.insert(code) {
                                self.keys_just_pressed.insert(code);
                            }
                        }
                        ElementState::Released => {
                            self.keys_down.remove(&code);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub fn key_down(&self, code: KeyCode) -> bool {
        self.keys_down.contains(&code)
    }

    /// True only on the first polled frame after the key went down.
    pub fn key_just_pressed(&self, code: KeyCode) -> bool {
        self.keys_just_pressed.contains(&code)
    }

    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_curr_pos - self.mouse_prev_pos
    }

    /// Reset the edge-triggered state for the next frame.
    pub fn reset_frame(&mut self) {
        self.mouse_prev_pos = self.mouse_curr_pos;
        self.keys_just_pressed.clear();
    }
}
