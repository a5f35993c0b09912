use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::RenderDevice;

/// Vertex input layout described as `(format, offset)` attributes over one
/// interleaved binding. Attribute location = position in the slice.
#[derive(Default)]
pub struct VertexInput {
    bindings: Vec<vk::VertexInputBindingDescription>,
    attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInput {
    pub fn new(attributes: &[(vk::Format, u32)], stride: u32) -> Self {
        let attributes = attributes
            .iter()
            .enumerate()
            .map(|(location, (format, offset))| {
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: location as u32,
                    format: *format,
                    offset: *offset,
                }
            })
            .collect();
        let bindings = if stride > 0 {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        } else {
            Vec::new()
        };
        Self { bindings, attributes }
    }

    /// No vertex buffer at all; the vertex shader synthesizes positions.
    pub fn empty() -> Self {
        Self::default()
    }
}

pub struct PipelineInfo<'a> {
    pub shader_stages: Vec<vk::PipelineShaderStageCreateInfo<'a>>,
    pub topology: vk::PrimitiveTopology,
    pub render_pass: vk::RenderPass,
    pub vertex_input: VertexInput,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub color_attachment_count: u32,
}

const PUSH_CONSTANT_SIZE: u32 = 128;

/// Graphics pipeline with a hardcoded fixed-function policy: dynamic
/// viewport and scissor (resize needs no rebuild), standard alpha blending,
/// counter-clockwise front face with back-face culling, depth LESS, no
/// multisampling.
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<ash::Device>,
}

impl Pipeline {
    pub fn new(device: &RenderDevice, info: &PipelineInfo) -> Result<Self> {
        let (handle, layout) = build_graphics_pipeline(&device.logical, info)?;
        Ok(Self {
            handle,
            layout,
            device: device.logical.clone(),
        })
    }

    /// Swap in a freshly built pipeline, e.g. after a shader edit.
    ///
    /// The replacement is fully created before the old handles are
    /// destroyed, so a failed reload returns the error and leaves the
    /// current pipeline untouched.
    pub fn reload(&mut self, info: &PipelineInfo) -> Result<()> {
        let (handle, layout) = build_graphics_pipeline(&self.device, info)?;

        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
        self.handle = handle;
        self.layout = layout;

        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
            self.device.destroy_pipeline(self.handle, None);
        }
    }
}

fn build_graphics_pipeline(
    device: &ash::Device,
    info: &PipelineInfo,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&info.vertex_input.bindings)
        .vertex_attribute_descriptions(&info.vertex_input.attributes);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(info.topology)
        .primitive_restart_enable(false);

    // Counts only; the actual viewport and scissor are dynamic.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .min_sample_shading(1.0);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0)
        .stencil_test_enable(false);

    let blend_attachments = (0..info.color_attachment_count)
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
        })
        .collect::<Vec<_>>();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let push_constant_ranges = [vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(PUSH_CONSTANT_SIZE)];

    let set_layouts = [info.descriptor_set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&info.shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(info.render_pass)
        .subpass(0);

    let pipeline = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };
    match pipeline {
        Ok(pipelines) => Ok((pipelines[0], layout)),
        Err((_, err)) => {
            unsafe {
                device.destroy_pipeline_layout(layout, None);
            }
            Err(err.into())
        }
    }
}

/// Compute pipeline: one shader stage, one set layout, no dynamic state,
/// no reload path.
pub struct ComputePipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<ash::Device>,
}

impl ComputePipeline {
    pub fn new(
        device: &RenderDevice,
        shader_stage: vk::PipelineShaderStageCreateInfo<'_>,
        descriptor_set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let set_layouts = [descriptor_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe {
            device.logical.create_pipeline_layout(&layout_info, None)?
        };

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader_stage)
            .layout(layout);
        let pipeline = unsafe {
            device.logical.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        };
        let handle = match pipeline {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe {
                    device.logical.destroy_pipeline_layout(layout, None);
                }
                return Err(err.into());
            }
        };

        Ok(Self {
            handle,
            layout,
            device: device.logical.clone(),
        })
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
            self.device.destroy_pipeline(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_locations_follow_slice_order() {
        let input = VertexInput::new(
            &[
                (vk::Format::R32G32B32_SFLOAT, 0),
                (vk::Format::R32G32_SFLOAT, 12),
            ],
            20,
        );
        assert_eq!(input.attributes.len(), 2);
        assert_eq!(input.attributes[0].location, 0);
        assert_eq!(input.attributes[1].location, 1);
        assert_eq!(input.attributes[1].offset, 12);
        assert_eq!(input.bindings.len(), 1);
        assert_eq!(input.bindings[0].stride, 20);
    }

    #[test]
    fn empty_vertex_input_has_no_binding() {
        let input = VertexInput::empty();
        assert!(input.bindings.is_empty());
        assert!(input.attributes.is_empty());
    }
}
