use std::path::Path;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use glam::{Vec3, Vec4};
use crate::renderer::shader_data::{Material, MeshInfo, Triangle};
use crate::scene::Scene;

/// Load a triangulated OBJ file into the scene as one mesh entry.
pub(crate) fn load_model(
    scene: &mut Scene,
    path: &Path,
    material: Material,
    translate: Vec3,
    scale: Vec3,
) -> Result<()> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: false,
            ..Default::default()
        },
    )
    .map_err(|err| eyre!("Could not load model {:?}: {}", path, err))?;

    let triangle_count = append_mesh(scene, &models, material, translate, scale)
        .map_err(|err| eyre!("Malformed model {:?}: {}", path, err))?;

    log::info!("Loaded model {:?} ({} triangles)", path, triangle_count);

    Ok(())
}

/// Append every shape of the file as a single triangle range plus one
/// bounding box. Positions are scaled then translated; normals are taken
/// as authored.
fn append_mesh(
    scene: &mut Scene,
    models: &[tobj::Model],
    material: Material,
    translate: Vec3,
    scale: Vec3,
) -> Result<u32> {
    let start_triangle = scene.triangles.len();
    let mut triangles = Vec::new();
    let mut bounds_min = Vec3::splat(f32::INFINITY);
    let mut bounds_max = Vec3::splat(f32::NEG_INFINITY);

    for model in models {
        let mesh = &model.mesh;
        if mesh.normals.is_empty() || mesh.normal_indices.is_empty() {
            return Err(eyre!("mesh {:?} has no vertex normals", model.name));
        }
        if mesh.indices.len() != mesh.normal_indices.len() {
            return Err(eyre!(
                "mesh {:?} has mismatched position and normal indices",
                model.name
            ));
        }

        for (face, normal_face) in mesh
            .indices
            .chunks_exact(3)
            .zip(mesh.normal_indices.chunks_exact(3))
        {
            let mut positions = [Vec3::ZERO; 3];
            let mut normals = [Vec3::ZERO; 3];
            for corner in 0..3 {
                let pi = face[corner] as usize * 3;
                let ni = normal_face[corner] as usize * 3;
                let position = Vec3::new(
                    mesh.positions[pi],
                    mesh.positions[pi + 1],
                    mesh.positions[pi + 2],
                ) * scale
                    + translate;
                positions[corner] = position;
                normals[corner] = Vec3::new(
                    mesh.normals[ni],
                    mesh.normals[ni + 1],
                    mesh.normals[ni + 2],
                );
                bounds_min = bounds_min.min(position);
                bounds_max = bounds_max.max(position);
            }

            triangles.push(Triangle {
                p1: positions[0].extend(0.0),
                p2: positions[1].extend(0.0),
                p3: positions[2].extend(0.0),
                n1: normals[0].extend(0.0),
                n2: normals[1].extend(0.0),
                n3: normals[2].extend(0.0),
            });
        }
    }

    let triangle_count = triangles.len() as u32;
    scene.triangles.append(&mut triangles);
    scene.meshes.push(MeshInfo::new(
        start_triangle as i32,
        triangle_count as i32,
        Vec4::new(bounds_min.x, bounds_min.y, bounds_min.z, 0.0),
        Vec4::new(bounds_max.x, bounds_max.y, bounds_max.z, 0.0),
        material,
    ));

    Ok(triangle_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD_OBJ: &str = "\
v -1.0 0.0 -1.0
v 1.0 0.0 -1.0
v 1.0 0.0 1.0
v -1.0 0.0 1.0
vn 0.0 1.0 0.0
f 1//1 2//1 3//1
f 1//1 3//1 4//1
";

    const QUAD_OBJ_NO_NORMALS: &str = "\
v -1.0 0.0 -1.0
v 1.0 0.0 -1.0
v 1.0 0.0 1.0
f 1 2 3
";

    fn parse(source: &str) -> Vec<tobj::Model> {
        let mut reader = std::io::BufReader::new(source.as_bytes());
        let (models, _) = tobj::load_obj_buf(
            &mut reader,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: false,
                ..Default::default()
            },
            |_| Ok((Vec::new(), Default::default())),
        )
        .unwrap();
        models
    }

    #[test]
    fn quad_becomes_two_triangles_with_bounds() {
        let mut scene = Scene::new();
        let material = Material::new(Vec3::ONE, 0.0, 0.8);
        let count = append_mesh(
            &mut scene,
            &parse(QUAD_OBJ),
            material,
            Vec3::ZERO,
            Vec3::ONE,
        )
        .unwrap();

        assert_eq!(count, 2);
        assert_eq!(scene.triangles.len(), 2);
        assert_eq!(scene.meshes.len(), 1);

        let mesh = &scene.meshes[0];
        assert_eq!(mesh.start_triangle, 0);
        assert_eq!(mesh.triangle_count, 2);
        assert_eq!(mesh.bounds_min, Vec4::new(-1.0, 0.0, -1.0, 0.0));
        assert_eq!(mesh.bounds_max, Vec4::new(1.0, 0.0, 1.0, 0.0));
        assert_eq!(mesh.material.smoothness, 0.8);

        // Normals come through as authored.
        assert_eq!(scene.triangles[0].n1, Vec4::new(0.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn translate_and_scale_apply_to_positions_only() {
        let mut scene = Scene::new();
        append_mesh(
            &mut scene,
            &parse(QUAD_OBJ),
            Material::default(),
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(2.0, 1.0, 2.0),
        )
        .unwrap();

        let mesh = &scene.meshes[0];
        assert_eq!(mesh.bounds_min, Vec4::new(-2.0, 5.0, -2.0, 0.0));
        assert_eq!(mesh.bounds_max, Vec4::new(2.0, 5.0, 2.0, 0.0));
        assert_eq!(scene.triangles[0].n1, Vec4::new(0.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn second_model_continues_the_triangle_range() {
        let mut scene = Scene::new();
        let models = parse(QUAD_OBJ);
        append_mesh(&mut scene, &models, Material::default(), Vec3::ZERO, Vec3::ONE)
            .unwrap();
        append_mesh(&mut scene, &models, Material::default(), Vec3::X, Vec3::ONE)
            .unwrap();

        assert_eq!(scene.meshes.len(), 2);
        assert_eq!(scene.meshes[0].start_triangle, 0);
        assert_eq!(scene.meshes[1].start_triangle, 2);
        assert_eq!(scene.meshes[1].triangle_count, 2);
        assert_eq!(scene.triangles.len(), 4);
    }

    #[test]
    fn mesh_without_normals_is_rejected() {
        let mut scene = Scene::new();
        let result = append_mesh(
            &mut scene,
            &parse(QUAD_OBJ_NO_NORMALS),
            Material::default(),
            Vec3::ZERO,
            Vec3::ONE,
        );
        assert!(result.is_err());
    }
}
