use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, eyre};
use crate::renderer::core::RenderDevice;

/// A shader module compiled from GLSL source at load time. The stage is
/// taken from the file extension (`.vert`, `.frag`, `.comp`).
pub struct Shader {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    device: Arc<ash::Device>,
}

impl Shader {
    pub fn new(device: Arc<ash::Device>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (stage, spirv) = compile_glsl_file(path)?;
        let module = create_shader_module(&device, &spirv)?;

        log::info!("Compiled shader {:?}", path);

        Ok(Self {
            module,
            stage,
            device,
        })
    }

    /// Recompile from source and swap the module in.
    ///
    /// The old module is destroyed only after the new one exists, so a
    /// failed compile leaves this shader usable.
    pub fn reload(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let (stage, spirv) = compile_glsl_file(path)?;
        let module = create_shader_module(&self.device, &spirv)?;

        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
        self.module = module;
        self.stage = stage;

        log::info!("Reloaded shader {:?}", path);

        Ok(())
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(c"main")
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Compile the three startup shaders concurrently, one worker thread and
/// one compiler instance each, and join before returning. One-time startup
/// parallelism; steady-state reloads compile inline.
pub fn compile_startup_shaders(
    device: &RenderDevice,
    paths: [&Path; 3],
) -> Result<[Shader; 3]> {
    let [a, b, c] = paths;
    let (a, b, c) = std::thread::scope(|scope| {
        let device_a = device.logical.clone();
        let device_b = device.logical.clone();
        let device_c = device.logical.clone();
        let task_a = scope.spawn(move || Shader::new(device_a, a));
        let task_b = scope.spawn(move || Shader::new(device_b, b));
        let task_c = scope.spawn(move || Shader::new(device_c, c));
        (
            task_a.join().expect("shader compile thread panicked"),
            task_b.join().expect("shader compile thread panicked"),
            task_c.join().expect("shader compile thread panicked"),
        )
    });
    Ok([a?, b?, c?])
}

fn compile_glsl_file(path: &Path) -> Result<(vk::ShaderStageFlags, Vec<u32>)> {
    let source = std::fs::read_to_string(path)
        .map_err(|err| eyre!("Could not read shader file {:?}: {}", path, err))?;

    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let (stage, kind) = stage_from_extension(ext)
        .ok_or_eyre(format!("Unrecognized shader extension on {:?}", path))?;

    let compiler = shaderc::Compiler::new()
        .ok_or_eyre("Failed to initialize the shader compiler")?;
    let artifact = compiler
        .compile_into_spirv(
            &source,
            kind,
            &path.to_string_lossy(),
            "main",
            None,
        )
        .map_err(|err| eyre!("Shader compilation failed for {:?}:\n{}", path, err))?;

    Ok((stage, artifact.as_binary().to_vec()))
}

fn create_shader_module(device: &ash::Device, spirv: &[u32]) -> Result<vk::ShaderModule> {
    let module_info = vk::ShaderModuleCreateInfo::default().code(spirv);
    Ok(unsafe { device.create_shader_module(&module_info, None)? })
}

fn stage_from_extension(ext: &str) -> Option<(vk::ShaderStageFlags, shaderc::ShaderKind)> {
    match ext {
        "vert" => Some((vk::ShaderStageFlags::VERTEX, shaderc::ShaderKind::Vertex)),
        "frag" => Some((vk::ShaderStageFlags::FRAGMENT, shaderc::ShaderKind::Fragment)),
        "comp" => Some((vk::ShaderStageFlags::COMPUTE, shaderc::ShaderKind::Compute)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_extension_convention() {
        assert_eq!(
            stage_from_extension("vert").map(|(stage, _)| stage),
            Some(vk::ShaderStageFlags::VERTEX)
        );
        assert_eq!(
            stage_from_extension("frag").map(|(stage, _)| stage),
            Some(vk::ShaderStageFlags::FRAGMENT)
        );
        assert_eq!(
            stage_from_extension("comp").map(|(stage, _)| stage),
            Some(vk::ShaderStageFlags::COMPUTE)
        );
        assert!(stage_from_extension("glsl").is_none());
        assert!(stage_from_extension("").is_none());
    }
}
