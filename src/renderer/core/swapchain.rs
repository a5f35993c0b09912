use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::{QueueFamilyIndices, RenderCore};

/// Presentable image chain plus the per-image framebuffers and the shared
/// render pass.
///
/// Steady state cycles `acquire_next_image` / `present_image`. When either
/// reports the chain stale, the sticky `out_of_date` flag is raised and the
/// caller is expected to poll it once per loop iteration and call
/// [`recreate`](Self::recreate) before the next acquire. The render pass
/// survives recreation, so pipelines built against it stay valid across
/// resizes.
pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,

    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    image_count: u32,
    image_index: u32,
    out_of_date: bool,

    queue_families: QueueFamilyIndices,
    device: Arc<ash::Device>,
}

impl Swapchain {
    pub fn new(
        core: &RenderCore,
        extent: vk::Extent2D,
        image_count: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(
            &core.instance.instance,
            &core.device.logical,
        );

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            render_pass: vk::RenderPass::null(),

            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: preferred_present_mode,
            extent,
            image_count,
            image_index: 0,
            out_of_date: false,

            queue_families: core.device.queue_families,
            device: core.device.logical.clone(),
        };

        swapchain.create_swapchain(core, extent, preferred_present_mode)?;
        swapchain.create_image_views()?;
        swapchain.create_render_pass()?;
        swapchain.create_framebuffers()?;

        Ok(swapchain)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    pub fn current_image_index(&self) -> u32 {
        self.image_index
    }

    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index as usize]
    }

    pub fn current_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.image_index as usize]
    }

    pub fn out_of_date(&self) -> bool {
        self.out_of_date
    }

    /// Acquire the next presentable image, signalling `semaphore` when the
    /// presentation engine releases it.
    ///
    /// An out-of-date chain is an expected, recoverable condition: the flag
    /// is raised, no error is returned, and the caller must not record
    /// render work against the returned index until after a recreate.
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<u32> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, _suboptimal)) => {
                self.image_index = index;
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.out_of_date = true;
            }
            Err(err) => return Err(err.into()),
        }

        Ok(self.image_index)
    }

    /// Queue the current image for presentation after `semaphore` signals.
    ///
    /// Out-of-date and suboptimal results fold into the sticky flag; other
    /// failures are logged but do not abort the frame loop.
    pub fn present_image(&mut self, queue: vk::Queue, semaphore: vk::Semaphore) {
        let wait_semaphores = [semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [self.image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.out_of_date = true;
            }
            Err(err) => {
                log::error!("Failed to present swapchain image: {}", err);
            }
        }
    }

    /// Rebuild the image-dependent resources at a new extent.
    ///
    /// Blocks until the device is idle, then replaces the swapchain (the old
    /// handle is chained into the new create-info and destroyed only after
    /// success), image views, and framebuffers. The render pass is kept; the
    /// surface format is assumed stable across resizes.
    pub fn recreate(&mut self, core: &RenderCore, extent: vk::Extent2D) -> Result<()> {
        core.device.wait_idle()?;

        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
        }

        self.create_swapchain(core, extent, self.present_mode)?;
        self.create_image_views()?;
        self.create_framebuffers()?;
        self.out_of_date = false;

        log::info!(
            "Swapchain recreated at {}x{}",
            self.extent.width,
            self.extent.height
        );

        Ok(())
    }

    fn create_swapchain(
        &mut self,
        core: &RenderCore,
        extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<()> {
        let instance = &core.instance;
        let physical = core.device.physical;

        let capabilities = unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_capabilities(physical, instance.surface)?
        };
        let formats = unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_formats(physical, instance.surface)?
        };
        let present_modes = unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_present_modes(physical, instance.surface)?
        };

        self.surface_format = choose_surface_format(&formats);
        self.present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        self.extent = choose_extent(&capabilities, extent);
        self.image_index = 0;

        let queue_family_indices = [
            self.queue_families.graphics,
            self.queue_families.present,
        ];
        let mut swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(instance.surface)
            .min_image_count(self.image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        if self.queue_families.graphics != self.queue_families.present {
            swapchain_info = swapchain_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices);
        } else {
            swapchain_info = swapchain_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        }

        let old_swapchain = self.swapchain;
        self.swapchain = unsafe { self.loader.create_swapchain(&swapchain_info, None)? };

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.loader.destroy_swapchain(old_swapchain, None);
            }
        }

        Ok(())
    }

    fn create_image_views(&mut self) -> Result<()> {
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain)? };

        self.image_views = self
            .images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image(*image);
                unsafe { self.device.create_image_view(&view_info, None) }
            })
            .collect::<VkResult<Vec<_>>>()?;

        Ok(())
    }

    fn create_render_pass(&mut self) -> Result<()> {
        let color_attachment = vk::AttachmentDescription::default()
            .format(self.surface_format.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_attachment_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)];

        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_subpass(0)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let attachments = [color_attachment];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass = unsafe {
            self.device.create_render_pass(&render_pass_info, None)?
        };

        Ok(())
    }

    fn create_framebuffers(&mut self) -> Result<()> {
        self.framebuffers = self
            .image_views
            .iter()
            .map(|view| {
                let attachments = [*view];
                let framebuffer_info = vk::FramebufferCreateInfo::default()
                    .render_pass(self.render_pass)
                    .attachments(&attachments)
                    .width(self.extent.width)
                    .height(self.extent.height)
                    .layers(1);
                unsafe { self.device.create_framebuffer(&framebuffer_info, None) }
            })
            .collect::<VkResult<Vec<_>>>()?;

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Clamp the requested image count into the surface's supported range.
/// A reported maximum of zero means the surface imposes no upper bound.
pub fn clamp_image_count(requested: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    let clamped = requested.max(min);
    if max > 0 { clamped.min(max) } else { clamped }
}

/// Prefer SRGB-nonlinear 8-bit BGRA. A single UNDEFINED entry means the
/// surface accepts anything, in which case a BGRA8 default is substituted;
/// otherwise fall back to the first reported format.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
    }

    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(formats[0])
}

/// The preferred mode if the surface reports it, else FIFO, which is
/// guaranteed to be available.
fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed current extent when it reports one, otherwise the
/// requested extent clamped componentwise into the supported range.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_fixed_current_extent_verbatim() {
        let caps = capabilities((1920, 1080), (1, 1), (800, 600));
        let extent = choose_extent(&caps, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn extent_clamps_componentwise_when_unconstrained() {
        let caps = capabilities((u32::MAX, u32::MAX), (640, 480), (1920, 1080));

        let below = choose_extent(&caps, vk::Extent2D { width: 10, height: 10 });
        assert_eq!((below.width, below.height), (640, 480));

        let above = choose_extent(&caps, vk::Extent2D { width: 4096, height: 4096 });
        assert_eq!((above.width, above.height), (1920, 1080));

        let inside = choose_extent(&caps, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!((inside.width, inside.height), (1280, 720));

        let mixed = choose_extent(&caps, vk::Extent2D { width: 100, height: 4000 });
        assert_eq!((mixed.width, mixed.height), (640, 1080));
    }

    #[test]
    fn image_count_clamps_into_reported_range() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 4,
            ..Default::default()
        };
        assert_eq!(clamp_image_count(1, &caps), 2);
        assert_eq!(clamp_image_count(3, &caps), 3);
        assert_eq!(clamp_image_count(9, &caps), 4);
    }

    #[test]
    fn image_count_treats_zero_max_as_unbounded() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(clamp_image_count(64, &caps), 64);
        assert_eq!(clamp_image_count(1, &caps), 2);
    }

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn surface_format_falls_back_to_first_reported() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn undefined_surface_format_gets_bgra_default() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }
}
