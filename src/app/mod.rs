mod camera;
mod input_state;

use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use ash::vk;
use color_eyre::Result;
use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::KeyCode;
use winit::window::{Window, WindowId};

use crate::app::camera::CameraFps;
use crate::app::input_state::InputState;
use crate::renderer::descriptors::{
    DescriptorBinding, DescriptorKind, DescriptorSetLayout, DescriptorWrite,
};
use crate::renderer::pipeline::{ComputePipeline, Pipeline, PipelineInfo, VertexInput};
use crate::renderer::resources::{Buffer, Image, Sampler, Shader, compile_startup_shaders};
use crate::renderer::shader_data::{FrameData, Material};
use crate::renderer::{Renderer, dispatch_group_count};
use crate::scene::{Scene, SceneBuffers};

const WINDOW_TITLE: &str = "lumen";
const INITIAL_WIDTH: u32 = 1280;
const INITIAL_HEIGHT: u32 = 720;
const SWAPCHAIN_IMAGES: u32 = 2;

const PRESENT_VERT: &str = "shaders/present.vert";
const PRESENT_FRAG: &str = "shaders/present.frag";
const RAYTRACE_COMP: &str = "shaders/raytrace.comp";
const SCREENSHOT_PATH: &str = "screenshot.png";

// Must match the local_size declared in raytrace.comp.
const COMPUTE_LOCAL_SIZE: u32 = 8;

pub struct App {
    window: Option<Arc<Window>>,
    state: Option<RenderState>,

    input: InputState,
    prev_frame_time: Instant,
    delta_time: f32,
    resize_requested: bool,
    close_requested: bool,
}

impl App {
    pub fn new() -> Result<Self> {
        Ok(Self {
            window: None,
            state: None,

            input: InputState::default(),
            prev_frame_time: Instant::now(),
            delta_time: 0.0,
            resize_requested: false,
            close_requested: false,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(self)?;
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<()> {
        let (Some(window), Some(state)) = (self.window.as_ref(), self.state.as_mut())
        else {
            return Ok(());
        };

        if self.resize_requested || state.renderer.swapchain().out_of_date() {
            let size = window.inner_size();
            if size.width == 0 || size.height == 0 {
                // Minimized; nothing to present.
                return Ok(());
            }
            state.renderer.recreate_swapchain(vk::Extent2D {
                width: size.width,
                height: size.height,
            })?;
            self.resize_requested = false;
        }

        if self.input.key_just_pressed(KeyCode::KeyR) {
            state.reload_present_pipeline();
        }
        if self.input.key_just_pressed(KeyCode::KeyP) {
            state.save_screenshot();
        }
        if self.input.key_just_pressed(KeyCode::KeyQ) {
            state.frame_data.invalidate();
        }

        let Some(cmd) = state.renderer.begin_frame()? else {
            // The swapchain went stale at acquire; recreate on the next
            // iteration.
            return Ok(());
        };

        state.camera.update(&self.input, self.delta_time);
        state.frame_data.inverse_projection = state.camera.inverse_projection;
        state.frame_data.inverse_view = state.camera.inverse_view;
        state.frame_data.camera_position = state.camera.position.extend(0.0);
        state.frame_data.camera_direction = state.camera.forward.extend(0.0);
        state.frame_data.advance(state.camera.moved);
        state.frame_uniform.write(&[state.frame_data])?;

        state.record_frame(cmd);
        state.renderer.end_frame()?;

        Ok(())
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time = curr_frame_time
            .duration_since(self.prev_frame_time)
            .as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(WINDOW_TITLE)
                .with_inner_size(PhysicalSize::new(INITIAL_WIDTH, INITIAL_HEIGHT));
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(err) => {
                    log::error!("Failed to create window: {err}");
                    event_loop.exit();
                    return;
                }
            }
        }

        if self.state.is_none() {
            let window = self.window.as_ref().expect("window created above").clone();
            match RenderState::new(window) {
                Ok(state) => self.state = Some(state),
                Err(err) => {
                    log::error!("Failed to initialize the renderer: {err:#}");
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        self.input.process_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_new_size) => {
                self.resize_requested = true;
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                self.resize_requested = true;
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.draw_frame() {
                    log::error!("Frame failed: {err:#}");
                    self.close_requested = true;
                }
                self.input.reset_frame();
            }
            _ => {}
        }

        if self.input.key_just_pressed(KeyCode::Escape) {
            self.close_requested = true;
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }

        if self.close_requested {
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_ref() {
            if let Err(err) = state.renderer.wait_idle() {
                log::error!("Device wait failed on exit: {err}");
            }
        }
    }
}

/// Everything that lives on the GPU, declared so resources drop before the
/// renderer that owns the device.
struct RenderState {
    frame_uniform: Buffer,
    scene_buffers: SceneBuffers,
    display_image: Image,
    accumulation_image: Image,
    sampler: Sampler,
    present_vert: Shader,
    present_frag: Shader,
    raytrace_comp: Shader,
    present_layout: DescriptorSetLayout,
    compute_layout: DescriptorSetLayout,
    present_pipeline: Pipeline,
    compute_pipeline: ComputePipeline,
    present_set: vk::DescriptorSet,
    compute_set: vk::DescriptorSet,

    camera: CameraFps,
    frame_data: FrameData,

    renderer: Renderer,
}

impl RenderState {
    fn new(window: Arc<Window>) -> Result<Self> {
        let mut renderer =
            Renderer::new(window, SWAPCHAIN_IMAGES, vk::PresentModeKHR::FIFO)?;

        let [present_vert, present_frag, raytrace_comp] = compile_startup_shaders(
            &renderer.core().device,
            [
                Path::new(PRESENT_VERT),
                Path::new(PRESENT_FRAG),
                Path::new(RAYTRACE_COMP),
            ],
        )?;

        let present_layout = DescriptorSetLayout::new(
            &renderer.core().device,
            &[DescriptorBinding {
                count: 1,
                kind: DescriptorKind::CombinedImageSampler,
                stages: vk::ShaderStageFlags::FRAGMENT,
            }],
        )?;
        let present_set = renderer.allocate_descriptor_set(&present_layout)?;
        let present_pipeline = Pipeline::new(
            &renderer.core().device,
            &present_pipeline_info(
                &present_vert,
                &present_frag,
                renderer.swapchain().render_pass(),
                present_layout.handle,
            ),
        )?;

        let sampler = Sampler::new(
            &renderer.core().device,
            vk::Filter::LINEAR,
            vk::Filter::LINEAR,
        )?;

        let extent = renderer.swapchain().extent();
        let display_image = Image::new(
            &renderer.core().device,
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let accumulation_image = Image::new(
            &renderer.core().device,
            extent,
            vk::Format::R32G32B32A32_SFLOAT,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_DST,
        )?;

        // Zero-fill both images; the upload also moves them into the
        // GENERAL layout the kernel requires.
        let pixel_count = (extent.width * extent.height) as usize;
        display_image.set_data(
            &renderer.core().device,
            &vec![0u8; pixel_count * 4],
            vk::ImageLayout::GENERAL,
        )?;
        accumulation_image.set_data(
            &renderer.core().device,
            &vec![0u8; pixel_count * 16],
            vk::ImageLayout::GENERAL,
        )?;

        renderer.update_descriptor_set(
            present_set,
            &[DescriptorWrite::image(
                0,
                DescriptorKind::CombinedImageSampler,
                vk::DescriptorImageInfo::default()
                    .sampler(sampler.handle)
                    .image_view(display_image.view)
                    .image_layout(vk::ImageLayout::GENERAL),
            )],
        );

        let compute_binding = |kind| DescriptorBinding {
            count: 1,
            kind,
            stages: vk::ShaderStageFlags::COMPUTE,
        };
        let compute_layout = DescriptorSetLayout::new(
            &renderer.core().device,
            &[
                compute_binding(DescriptorKind::UniformBuffer),
                compute_binding(DescriptorKind::StorageBuffer),
                compute_binding(DescriptorKind::StorageBuffer),
                compute_binding(DescriptorKind::StorageBuffer),
                compute_binding(DescriptorKind::StorageImage),
                compute_binding(DescriptorKind::StorageImage),
            ],
        )?;
        let compute_set = renderer.allocate_descriptor_set(&compute_layout)?;
        let compute_pipeline = ComputePipeline::new(
            &renderer.core().device,
            raytrace_comp.stage_info(),
            compute_layout.handle,
        )?;

        let mut frame_data = FrameData::new(extent.width, extent.height);

        let mut scene = Scene::new();
        scene.add_sphere(
            Vec3::new(1.0, 1.0, 0.0),
            0.5,
            Material::new(Vec3::ONE, 0.0, 0.1),
        );
        scene.load_model(
            "res/meshes/plane.obj",
            Material::new(Vec3::ONE, 0.0, 0.8),
            Vec3::ZERO,
            Vec3::new(2.0, 1.0, 2.0),
        )?;
        scene.load_model(
            "res/meshes/cube.obj",
            Material::new(Vec3::splat(0.9), 0.0, 0.1),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::ONE,
        )?;
        frame_data.sphere_count = scene.spheres.len() as u32;
        frame_data.mesh_count = scene.meshes.len() as u32;

        let scene_buffers = SceneBuffers::upload(&renderer.core().device, &scene)?;

        let frame_uniform = Buffer::new(
            &renderer.core().device,
            size_of::<FrameData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        frame_uniform.write(&[frame_data])?;

        let storage_image_info = |view| {
            vk::DescriptorImageInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::GENERAL)
        };
        renderer.update_descriptor_set(
            compute_set,
            &[
                DescriptorWrite::buffer(
                    0,
                    DescriptorKind::UniformBuffer,
                    frame_uniform.descriptor_info(),
                ),
                DescriptorWrite::buffer(
                    1,
                    DescriptorKind::StorageBuffer,
                    scene_buffers.spheres.descriptor_info(),
                ),
                DescriptorWrite::buffer(
                    2,
                    DescriptorKind::StorageBuffer,
                    scene_buffers.triangles.descriptor_info(),
                ),
                DescriptorWrite::buffer(
                    3,
                    DescriptorKind::StorageBuffer,
                    scene_buffers.meshes.descriptor_info(),
                ),
                DescriptorWrite::image(
                    4,
                    DescriptorKind::StorageImage,
                    storage_image_info(display_image.view),
                ),
                DescriptorWrite::image(
                    5,
                    DescriptorKind::StorageImage,
                    storage_image_info(accumulation_image.view),
                ),
            ],
        );

        let camera = CameraFps::new(extent.width, extent.height);

        Ok(Self {
            frame_uniform,
            scene_buffers,
            display_image,
            accumulation_image,
            sampler,
            present_vert,
            present_frag,
            raytrace_comp,
            present_layout,
            compute_layout,
            present_pipeline,
            compute_pipeline,
            present_set,
            compute_set,

            camera,
            frame_data,

            renderer,
        })
    }

    /// Record one frame: path-trace into the display image, then draw it to
    /// the swapchain with a fullscreen triangle.
    fn record_frame(&mut self, cmd: vk::CommandBuffer) {
        let device = self.renderer.core().device.logical.clone();
        let extent = self.renderer.swapchain().extent();
        let trace_extent = self.display_image.extent;

        unsafe {
            let viewport = vk::Viewport::default()
                .width(extent.width as f32)
                .height(extent.height as f32)
                .min_depth(0.0)
                .max_depth(1.0);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            let scissor = vk::Rect2D::default().extent(extent);
            device.cmd_set_scissor(cmd, 0, &[scissor]);

            self.renderer.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.compute_pipeline.handle,
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.compute_pipeline.layout,
                0,
                &[self.compute_set],
                &[],
            );
            device.cmd_dispatch(
                cmd,
                dispatch_group_count(trace_extent.width, COMPUTE_LOCAL_SIZE),
                dispatch_group_count(trace_extent.height, COMPUTE_LOCAL_SIZE),
                1,
            );

            // The present pass must not sample the display image until the
            // kernel's writes land.
            let barrier = vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 0.0],
                },
            }];
            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.renderer.swapchain().render_pass())
                .framebuffer(self.renderer.swapchain().current_framebuffer())
                .render_area(vk::Rect2D::default().extent(extent))
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.present_pipeline.layout,
                0,
                &[self.present_set],
                &[],
            );
            self.renderer.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.present_pipeline.handle,
            );
            self.renderer.cmd_draw(cmd, 3);

            device.cmd_end_render_pass(cmd);
        }
    }

    /// Recompile the present fragment shader and swap the pipeline. A
    /// running session survives a broken edit: on failure the old shader
    /// and pipeline stay in place and the error is logged.
    fn reload_present_pipeline(&mut self) {
        let result = (|| -> Result<()> {
            self.renderer.wait_idle()?;
            self.present_frag.reload(PRESENT_FRAG)?;
            self.present_pipeline.reload(&present_pipeline_info(
                &self.present_vert,
                &self.present_frag,
                self.renderer.swapchain().render_pass(),
                self.present_layout.handle,
            ))?;
            Ok(())
        })();

        match result {
            Ok(()) => log::info!("Present pipeline reloaded"),
            Err(err) => log::error!("Shader reload failed: {err:#}"),
        }
    }

    fn save_screenshot(&self) {
        let result = self
            .renderer
            .wait_idle()
            .and_then(|_| self.renderer.save_screenshot(SCREENSHOT_PATH));
        if let Err(err) = result {
            log::error!("Screenshot failed: {err:#}");
        }
    }
}

impl Drop for RenderState {
    fn drop(&mut self) {
        // Resources drop right after this; the GPU must be done with them.
        if let Err(err) = self.renderer.wait_idle() {
            log::error!("Device wait failed during teardown: {err}");
        }
    }
}

fn present_pipeline_info<'a>(
    vert: &Shader,
    frag: &Shader,
    render_pass: vk::RenderPass,
    descriptor_set_layout: vk::DescriptorSetLayout,
) -> PipelineInfo<'a> {
    PipelineInfo {
        shader_stages: vec![vert.stage_info(), frag.stage_info()],
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        render_pass,
        vertex_input: VertexInput::empty(),
        descriptor_set_layout,
        color_attachment_count: 1,
    }
}
