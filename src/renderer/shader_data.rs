use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Per-frame uniform payload read by the path-tracing kernel.
///
/// Field order and padding mirror the std140 uniform block in
/// `shaders/raytrace.comp`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FrameData {
    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,
    pub camera_position: Vec4,
    pub camera_direction: Vec4,
    pub window: Vec2,
    pub rays_per_pixel: u32,
    pub max_bounce_limit: u32,
    pub sky_color_horizon: Vec4,
    pub sky_color_zenith: Vec4,
    pub sun_direction: Vec4,
    pub ground_color: Vec4,
    pub sun_focus: f32,
    pub sun_intensity: f32,
    pub frame_index: u32,
    pub sphere_count: u32,
    pub mesh_count: u32,
    _pad: [u32; 3],
}

impl FrameData {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inverse_projection: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
            camera_position: Vec4::ZERO,
            camera_direction: Vec4::new(0.0, 0.0, 1.0, 0.0),
            window: Vec2::new(width as f32, height as f32),
            rays_per_pixel: 4,
            max_bounce_limit: 6,
            sky_color_horizon: Vec4::new(0.7, 0.3, 0.1, 0.0),
            sky_color_zenith: Vec4::new(0.2, 0.56, 0.95, 0.0),
            sun_direction: Vec4::new(-0.4, -0.4, -0.4, 0.0),
            ground_color: Vec4::new(0.9, 0.9, 0.9, 0.0),
            sun_focus: 1.0,
            sun_intensity: 1.0,
            frame_index: 0,
            sphere_count: 0,
            mesh_count: 0,
            _pad: [0; 3],
        }
    }

    /// Advance the accumulation counter for the next frame.
    ///
    /// The counter increases by exactly 1 per frame while the camera is
    /// static, so the kernel can weight the running average by
    /// `1 / frame_index`. Any movement restarts accumulation at 1, which
    /// tells the kernel to overwrite rather than blend.
    pub fn advance(&mut self, moved: bool) {
        self.frame_index += 1;
        if moved {
            self.frame_index = 1;
        }
    }

    /// Force accumulation to restart on the next [`advance`](Self::advance).
    pub fn invalidate(&mut self) {
        self.frame_index = 0;
    }
}

/// Surface response parameters shared by spheres and meshes.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct Material {
    pub color: Vec3,
    pub emission: f32,
    pub smoothness: f32,
    _pad: [f32; 3],
}

impl Material {
    pub fn new(color: Vec3, emission: f32, smoothness: f32) -> Self {
        Self {
            color,
            emission,
            smoothness,
            _pad: [0.0; 3],
        }
    }
}

/// Analytic sphere, stored in the scene storage buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub material: Material,
}

/// One triangle with per-vertex normals. Positions and normals are vec4
/// for std430 alignment; the w components are unused.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct Triangle {
    pub p1: Vec4,
    pub p2: Vec4,
    pub p3: Vec4,
    pub n1: Vec4,
    pub n2: Vec4,
    pub n3: Vec4,
}

/// A contiguous triangle range with its bounding box, used by the kernel to
/// skip whole models with a single slab test.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct MeshInfo {
    pub start_triangle: i32,
    pub triangle_count: i32,
    _pad: [f32; 2],
    pub bounds_min: Vec4,
    pub bounds_max: Vec4,
    pub material: Material,
}

impl MeshInfo {
    pub fn new(
        start_triangle: i32,
        triangle_count: i32,
        bounds_min: Vec4,
        bounds_max: Vec4,
        material: Material,
    ) -> Self {
        Self {
            start_triangle,
            triangle_count,
            _pad: [0.0; 2],
            bounds_min,
            bounds_max,
            material,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn gpu_struct_sizes_match_shader_layout() {
        assert_eq!(size_of::<FrameData>(), 272);
        assert_eq!(size_of::<Material>(), 32);
        assert_eq!(size_of::<Sphere>(), 48);
        assert_eq!(size_of::<Triangle>(), 96);
        assert_eq!(size_of::<MeshInfo>(), 80);
    }

    #[test]
    fn frame_index_increments_while_static() {
        let mut data = FrameData::new(1280, 720);
        data.advance(true);
        assert_eq!(data.frame_index, 1);
        for expected in 2..=16 {
            data.advance(false);
            assert_eq!(data.frame_index, expected);
        }
    }

    #[test]
    fn frame_index_resets_to_one_on_movement() {
        let mut data = FrameData::new(1280, 720);
        for _ in 0..100 {
            data.advance(false);
        }
        assert!(data.frame_index > 1);
        data.advance(true);
        assert_eq!(data.frame_index, 1);
    }

    #[test]
    fn invalidate_restarts_accumulation() {
        let mut data = FrameData::new(1280, 720);
        for _ in 0..10 {
            data.advance(false);
        }
        data.invalidate();
        assert_eq!(data.frame_index, 0);
        data.advance(false);
        assert_eq!(data.frame_index, 1);
    }
}
