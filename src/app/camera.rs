use glam::{Mat4, Vec3};
use winit::keyboard::KeyCode;
use crate::app::input_state::InputState;

/// First-person camera feeding the ray generator.
///
/// Right-mouse-drag turns, WASD moves in the ground plane, Space and Shift
/// move vertically, F and C modify speed. Any look or move change raises
/// `moved` for exactly one update, which the frame loop consumes to restart
/// progressive accumulation.
pub struct CameraFps {
    pub position: Vec3,
    pub forward: Vec3,
    pub moved: bool,

    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,

    up: Vec3,
    right: Vec3,
    yaw_deg: f32,
    pitch_deg: f32,
    aspect: f32,
}

impl CameraFps {
    const FOV_Y_DEG: f32 = 70.0;
    const NEAR: f32 = 0.1;
    const FAR: f32 = 1000.0;
    const LOOK_SENSITIVITY: f32 = 0.2;
    const BASE_SPEED: f32 = 2.0;
    const FAST_SPEED: f32 = 10.0;
    const SLOW_SPEED: f32 = 0.5;
    const MAX_PITCH_DEG: f32 = 89.0;

    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            position: Vec3::new(0.0, 1.0, -4.0),
            forward: Vec3::Z,
            moved: false,

            inverse_projection: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,

            up: Vec3::Y,
            right: Vec3::X,
            yaw_deg: 90.0,
            pitch_deg: 0.0,
            aspect: width as f32 / height as f32,
        };
        camera.rebuild_axes();
        camera.rebuild_matrices();
        camera
    }

    pub fn update(&mut self, input: &InputState, delta_time: f32) {
        self.moved = false;

        let mouse_delta = input.mouse_delta();
        if input.mouse_right_down && mouse_delta != glam::Vec2::ZERO {
            self.yaw_deg =
                (self.yaw_deg + mouse_delta.x * Self::LOOK_SENSITIVITY) % 360.0;
            self.pitch_deg = (self.pitch_deg - mouse_delta.y * Self::LOOK_SENSITIVITY)
                .clamp(-Self::MAX_PITCH_DEG, Self::MAX_PITCH_DEG);
            self.rebuild_axes();
            self.moved = true;
        }

        let mut velocity = Vec3::ZERO;
        if input.key_down(KeyCode::KeyW) {
            velocity += self.forward;
        }
        if input.key_down(KeyCode::KeyS) {
            velocity -= self.forward;
        }
        if input.key_down(KeyCode::KeyD) {
            velocity += self.right;
        }
        if input.key_down(KeyCode::KeyA) {
            velocity -= self.right;
        }

        // Planar movement only; vertical motion is its own axis.
        velocity.y = 0.0;
        if velocity != Vec3::ZERO {
            velocity = velocity.normalize();
        }

        if input.key_down(KeyCode::Space) {
            velocity.y += 1.0;
        }
        if input.key_down(KeyCode::ShiftLeft) {
            velocity.y -= 1.0;
        }

        let speed = if input.key_down(KeyCode::KeyF) {
            Self::FAST_SPEED
        } else if input.key_down(KeyCode::KeyC) {
            Self::SLOW_SPEED
        } else {
            Self::BASE_SPEED
        };

        if velocity != Vec3::ZERO {
            self.position += velocity * speed * delta_time;
            self.moved = true;
        }

        if self.moved {
            self.rebuild_matrices();
        }
    }

    fn rebuild_axes(&mut self) {
        let yaw = self.yaw_deg.to_radians();
        let pitch = self.pitch_deg.to_radians();
        self.forward = Vec3::new(
            yaw.cos() * pitch.cos(),
            pitch.sin(),
            yaw.sin() * pitch.cos(),
        )
        .normalize();
        self.right = self.forward.cross(self.up).normalize();
    }

    fn rebuild_matrices(&mut self) {
        let view = Mat4::look_to_rh(self.position, self.forward, self.up);
        let projection = Mat4::perspective_rh(
            Self::FOV_Y_DEG.to_radians(),
            self.aspect,
            Self::NEAR,
            Self::FAR,
        );
        self.inverse_view = view.inverse();
        self.inverse_projection = projection.inverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_with_right_drag(delta: glam::Vec2) -> InputState {
        let mut input = InputState::default();
        input.mouse_right_down = true;
        input.mouse_prev_pos = glam::Vec2::new(100.0, 100.0);
        input.mouse_curr_pos = input.mouse_prev_pos + delta;
        input
    }

    #[test]
    fn static_camera_reports_no_movement() {
        let mut camera = CameraFps::new(1280, 720);
        let input = InputState::default();
        camera.update(&input, 0.016);
        assert!(!camera.moved);
    }

    #[test]
    fn right_drag_sets_moved_and_turns() {
        let mut camera = CameraFps::new(1280, 720);
        let forward_before = camera.forward;
        let input = input_with_right_drag(glam::Vec2::new(40.0, 0.0));
        camera.update(&input, 0.016);
        assert!(camera.moved);
        assert!(camera.forward.distance(forward_before) > 1e-4);
    }

    #[test]
    fn moved_clears_on_the_next_static_update() {
        let mut camera = CameraFps::new(1280, 720);
        let input = input_with_right_drag(glam::Vec2::new(40.0, 0.0));
        camera.update(&input, 0.016);
        assert!(camera.moved);

        let mut input = input;
        input.reset_frame();
        camera.update(&input, 0.016);
        assert!(!camera.moved);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = CameraFps::new(1280, 720);
        // A drag far past vertical must not flip the camera.
        let input = input_with_right_drag(glam::Vec2::new(0.0, -100_000.0));
        camera.update(&input, 0.016);
        assert!(camera.pitch_deg <= CameraFps::MAX_PITCH_DEG);
        // Forward keeps a horizontal component.
        let horizontal = glam::Vec2::new(camera.forward.x, camera.forward.z).length();
        assert!(horizontal > 1e-4);
    }
}
