use glam::{Mat4, Vec3};

const FOV_Y_DEGREES: f32 = 45.0;
const NEAR: f32 = 0.1;
const FAR: f32 = 5000.0;

/// Orbit camera looking at the origin, where the swarm is centred.
pub struct OrbitCamera {
    distance: f32,
    yaw: f32,   // radians around +Y
    pitch: f32, // radians above the XZ plane

    dragging: bool,
    last_cursor: [f32; 2],
}

impl OrbitCamera {
    pub fn new(distance: f32) -> Self {
        Self {
            distance,
            yaw: 0.0,
            pitch: 0.3,
            dragging: false,
            last_cursor: [0.0, 0.0],
        }
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch) * self.distance
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect.max(1e-3), NEAR, FAR);
        projection * view
    }

    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        self.yaw = (self.yaw - delta_x * 0.005).rem_euclid(std::f32::consts::TAU);
        // Stop short of the poles so look_at keeps a valid up vector.
        self.pitch = (self.pitch + delta_y * 0.005).clamp(-1.5, 1.5);
    }

    /// Positive `delta` moves closer.
    pub fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance * (1.0 - delta * 0.1)).clamp(10.0, 2000.0);
    }

    pub fn handle_mouse_press(&mut self, position: [f32; 2]) {
        self.dragging = true;
        self.last_cursor = position;
    }

    pub fn handle_mouse_release(&mut self) {
        self.dragging = false;
    }

    pub fn handle_mouse_move(&mut self, position: [f32; 2]) {
        if self.dragging {
            self.rotate(position[0] - self.last_cursor[0], position[1] - self.last_cursor[1]);
        }
        self.last_cursor = position;
    }
}
