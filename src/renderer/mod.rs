pub mod core;
pub mod descriptors;
pub mod pipeline;
pub mod resources;
pub mod shader_data;

mod screenshot;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use winit::window::Window;

use crate::renderer::core::{RenderCore, Swapchain, clamp_image_count};
use crate::renderer::descriptors::{
    DescriptorAllocator, DescriptorSetLayout, DescriptorWrite, update_descriptor_set,
};

/// Per-frame counters, reset at the top of every frame. Observability only.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderStats {
    pub draw_calls: u32,
    pub vertices: u32,
    pub triangles: u32,
}

/// One ring slot's synchronization objects and its pre-allocated command
/// buffer.
struct FrameSync {
    // Signaled when the presentation engine hands the acquired image over.
    present_semaphore: vk::Semaphore,

    // Signaled when this slot's rendering commands finish on the GPU.
    render_semaphore: vk::Semaphore,

    // Signaled when this slot's submission has fully retired; created
    // signaled so the first frame does not wait.
    render_fence: vk::Fence,

    command_buffer: vk::CommandBuffer,

    device: Arc<ash::Device>,
}

impl FrameSync {
    fn new(device: &Arc<ash::Device>, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let present_semaphore = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        let render_semaphore = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        let render_fence = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?
        };

        Ok(Self {
            present_semaphore,
            render_semaphore,
            render_fence,
            command_buffer,
            device: device.clone(),
        })
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.render_semaphore, None);
            self.device.destroy_semaphore(self.present_semaphore, None);
            self.device.destroy_fence(self.render_fence, None);
        }
    }
}

/// Rotating index over the fixed set of in-flight slots.
#[derive(Debug, Clone, Copy)]
struct FrameRing {
    index: usize,
    len: usize,
}

impl FrameRing {
    fn new(len: usize) -> Self {
        debug_assert!(len >= 1);
        Self { index: 0, len }
    }

    fn index(&self) -> usize {
        self.index
    }

    fn advance(&mut self) {
        self.index = (self.index + 1) % self.len;
    }
}

/// One fewer than the swapchain length, so the presentation engine always
/// has an image left to hand out while the CPU records ahead.
fn in_flight_count(image_count: u32) -> u32 {
    (image_count - 1).max(1)
}

/// Workgroup count covering `size` pixels with `local_size` threads per
/// group, rounding up.
pub fn dispatch_group_count(size: u32, local_size: u32) -> u32 {
    size.div_ceil(local_size)
}

/// Top-level frame orchestrator.
///
/// Owns the device context, the swapchain, and the in-flight ring, and
/// drives the begin/end-frame protocol that bounds how far the CPU can run
/// ahead of the GPU. Slot `i`'s command buffer, semaphores, and fence are
/// never touched by a new frame until the fence wait at the top of
/// [`begin_frame`](Self::begin_frame) confirms the prior submission at `i`
/// retired; that wait is the sole mechanism enforcing the bound.
pub struct Renderer {
    frames: Vec<FrameSync>,
    ring: FrameRing,
    swapchain: Swapchain,
    descriptors: DescriptorAllocator,
    pub stats: RenderStats,
    core: RenderCore,
}

impl Renderer {
    pub fn new(
        window: Arc<Window>,
        requested_image_count: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let core = RenderCore::new(window.clone())?;

        let capabilities = unsafe {
            core.instance
                .surface_loader
                .get_physical_device_surface_capabilities(
                    core.device.physical,
                    core.instance.surface,
                )?
        };
        let image_count = clamp_image_count(requested_image_count, &capabilities);
        let in_flight = in_flight_count(image_count);

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            &core,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            image_count,
            preferred_present_mode,
        )?;

        let descriptors = DescriptorAllocator::new(&core.device)?;

        let command_buffers = {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_pool(core.device.command_pool())
                .command_buffer_count(in_flight);
            unsafe { core.device.logical.allocate_command_buffers(&alloc_info)? }
        };
        let frames = command_buffers
            .into_iter()
            .map(|cmd| FrameSync::new(&core.device.logical, cmd))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Renderer ready: {} swapchain images, {} frames in flight",
            image_count,
            in_flight,
        );

        Ok(Self {
            frames,
            ring: FrameRing::new(in_flight as usize),
            swapchain,
            descriptors,
            stats: RenderStats::default(),
            core,
        })
    }

    pub fn core(&self) -> &RenderCore {
        &self.core
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn in_flight_count(&self) -> u32 {
        self.ring.len as u32
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.core.device.wait_idle()
    }

    pub fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.swapchain.recreate(&self.core, extent)
    }

    /// Start the frame for the current ring slot.
    ///
    /// Blocks until the GPU retires the submission that last used this
    /// slot, then acquires a swapchain image and begins recording into the
    /// slot's command buffer. Returns `None` when the swapchain turned out
    /// of date at acquire time; the caller must recreate it and skip the
    /// frame. No work was recorded in that case and nothing needs
    /// submitting.
    pub fn begin_frame(&mut self) -> Result<Option<vk::CommandBuffer>> {
        let frame = &self.frames[self.ring.index()];

        unsafe {
            self.core.device.logical.wait_for_fences(
                &[frame.render_fence],
                true,
                u64::MAX,
            )?;
        }

        self.swapchain.acquire_next_image(frame.present_semaphore)?;
        if self.swapchain.out_of_date() {
            return Ok(None);
        }

        unsafe {
            self.core.device.logical.begin_command_buffer(
                frame.command_buffer,
                &vk::CommandBufferBeginInfo::default(),
            )?;
        }

        self.stats = RenderStats::default();

        Ok(Some(frame.command_buffer))
    }

    /// Finish recording, submit, present, and advance the ring.
    pub fn end_frame(&mut self) -> Result<()> {
        let frame = &self.frames[self.ring.index()];
        let device = &self.core.device.logical;

        unsafe {
            device.end_command_buffer(frame.command_buffer)?;
        }

        let wait_semaphores = [frame.present_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            // Reset immediately before submit, so the wait in begin_frame
            // can never observe a stale signaled state.
            device.reset_fences(&[frame.render_fence])?;
            device.queue_submit(
                self.core.device.graphics_queue,
                &[submit_info],
                frame.render_fence,
            )?;
        }

        self.swapchain
            .present_image(self.core.device.present_queue, frame.render_semaphore);

        self.ring.advance();

        Ok(())
    }

    pub fn allocate_descriptor_set(
        &mut self,
        layout: &DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        self.descriptors.allocate(layout)
    }

    pub fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        update_descriptor_set(&self.core.device.logical, set, writes);
    }

    pub fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe {
            self.core.device.logical.cmd_bind_pipeline(cmd, bind_point, pipeline);
        }
    }

    pub fn cmd_draw(&mut self, cmd: vk::CommandBuffer, vertex_count: u32) {
        unsafe {
            self.core.device.logical.cmd_draw(cmd, vertex_count, 1, 0, 0);
        }
        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_count;
        self.stats.triangles += vertex_count / 3;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Sync objects and the swapchain must not be destroyed while the
        // GPU still references them.
        if let Err(err) = self.core.device.wait_idle() {
            log::error!("Device wait failed during renderer teardown: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn ring_advances_modulo_len() {
        let mut ring = FrameRing::new(3);
        let observed: Vec<usize> = (0..7)
            .map(|_| {
                let index = ring.index();
                ring.advance();
                index
            })
            .collect();
        assert_eq!(observed, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn in_flight_is_one_less_than_image_count() {
        for image_count in 2..8 {
            assert_eq!(in_flight_count(image_count), image_count - 1);
        }
    }

    #[test]
    fn dispatch_groups_round_up() {
        assert_eq!(dispatch_group_count(1280, 8), 160);
        assert_eq!(dispatch_group_count(1281, 8), 161);
        assert_eq!(dispatch_group_count(7, 8), 1);
        assert_eq!(dispatch_group_count(8, 8), 1);
    }

    /// Simulates the begin/end-frame discipline against a GPU that retires
    /// submissions in order but arbitrarily late. A slot must never be
    /// resubmitted while its previous submission is still in flight, and
    /// the number of outstanding submissions must never exceed the ring
    /// length.
    #[test]
    fn ring_slot_never_reused_before_fence_signals() {
        for len in 1..=4 {
            let mut ring = FrameRing::new(len);
            let mut fence_signaled = vec![true; len];
            let mut in_flight: VecDeque<usize> = VecDeque::new();

            for _ in 0..64 {
                let slot = ring.index();

                // begin_frame: block until this slot's fence signals. The
                // mock GPU retires the oldest submission on each wait step.
                while !fence_signaled[slot] {
                    let retired = in_flight
                        .pop_front()
                        .expect("fence wait would deadlock with nothing in flight");
                    fence_signaled[retired] = true;
                }

                // end_frame: reset the fence and submit.
                fence_signaled[slot] = false;
                assert!(
                    !in_flight.contains(&slot),
                    "slot {slot} submitted while its prior submission is in flight"
                );
                in_flight.push_back(slot);
                assert!(
                    in_flight.len() <= len,
                    "more submissions in flight than ring slots"
                );

                ring.advance();
            }
        }
    }
}
