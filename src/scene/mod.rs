mod model;

use std::mem::size_of;
use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use glam::Vec3;
use crate::renderer::core::RenderDevice;
use crate::renderer::resources::Buffer;
use crate::renderer::shader_data::{Material, MeshInfo, Sphere, Triangle};

/// Host-side scene description: flat arrays uploaded once at startup and
/// read-only from the GPU's perspective afterwards.
#[derive(Default)]
pub struct Scene {
    pub spheres: Vec<Sphere>,
    pub triangles: Vec<Triangle>,
    pub meshes: Vec<MeshInfo>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sphere(&mut self, center: Vec3, radius: f32, material: Material) {
        self.spheres.push(Sphere {
            center,
            radius,
            material,
        });
    }

    /// Append an OBJ model as one triangle range with a uniform material.
    ///
    /// The file's own materials are ignored. A missing or malformed file is
    /// an error; the scene is left unchanged in that case.
    pub fn load_model(
        &mut self,
        path: impl AsRef<std::path::Path>,
        material: Material,
        translate: Vec3,
        scale: Vec3,
    ) -> Result<()> {
        model::load_model(self, path.as_ref(), material, translate, scale)
    }
}

/// The scene's GPU residency: one storage buffer per array.
pub struct SceneBuffers {
    pub spheres: Buffer,
    pub triangles: Buffer,
    pub meshes: Buffer,
}

impl SceneBuffers {
    pub fn upload(device: &RenderDevice, scene: &Scene) -> Result<Self> {
        Ok(Self {
            spheres: storage_buffer_for(device, &scene.spheres)?,
            triangles: storage_buffer_for(device, &scene.triangles)?,
            meshes: storage_buffer_for(device, &scene.meshes)?,
        })
    }
}

/// Sized for at least one element so an empty array still binds validly.
fn storage_buffer_for<T: Pod>(device: &RenderDevice, items: &[T]) -> Result<Buffer> {
    let len = items.len().max(1);
    let buffer = Buffer::new(
        device,
        (size_of::<T>() * len) as vk::DeviceSize,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    if !items.is_empty() {
        buffer.write(items)?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spheres_accumulate_with_their_material() {
        let mut scene = Scene::new();
        scene.add_sphere(Vec3::new(1.0, 1.0, 0.0), 0.5, Material::new(Vec3::ONE, 0.0, 0.1));
        scene.add_sphere(Vec3::ZERO, 2.0, Material::new(Vec3::X, 1.0, 0.0));
        assert_eq!(scene.spheres.len(), 2);
        assert_eq!(scene.spheres[0].radius, 0.5);
        assert_eq!(scene.spheres[1].material.emission, 1.0);
    }

    #[test]
    fn missing_model_file_is_an_error() {
        let mut scene = Scene::new();
        let result = scene.load_model(
            "res/meshes/does-not-exist.obj",
            Material::default(),
            Vec3::ZERO,
            Vec3::ONE,
        );
        assert!(result.is_err());
        assert!(scene.triangles.is_empty());
        assert!(scene.meshes.is_empty());
    }
}
