use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::RenderDevice;
use crate::renderer::resources::Buffer;

/// A 2D device-local texture: image, backing memory, and a matching view.
/// Single mip, single layer.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    memory: vk::DeviceMemory,
    device: Arc<ash::Device>,
}

impl Image {
    pub fn new(
        device: &RenderDevice,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let handle = {
            let image_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.logical.create_image(&image_info, None)? }
        };

        let requirements = unsafe {
            device.logical.get_image_memory_requirements(handle)
        };
        let memory = {
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(device.find_memory_type(
                    requirements.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?);
            unsafe { device.logical.allocate_memory(&alloc_info, None)? }
        };
        unsafe {
            device.logical.bind_image_memory(handle, memory, 0)?;
        }

        let view = {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(handle)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { device.logical.create_image_view(&view_info, None)? }
        };

        Ok(Self {
            handle,
            view,
            format,
            extent,
            memory,
            device: device.logical.clone(),
        })
    }

    /// Upload raw bytes through a staging buffer and leave the image in
    /// `new_layout`.
    ///
    /// Blocking, setup-time path: the copy runs on a single-time command
    /// buffer and waits for the queue to drain. Not safe to call from
    /// multiple threads against the same device command pool.
    pub fn set_data(
        &self,
        device: &RenderDevice,
        data: &[u8],
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let staging = Buffer::new(
            device,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write(data)?;

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let cmd = device.begin_single_time_commands()?;
        unsafe {
            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .image(self.handle)
                .subresource_range(range);
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                });
            self.device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle,
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_final = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(new_layout)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
                .image(self.handle)
                .subresource_range(range);
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_final],
            );
        }
        device.end_single_time_commands(cmd)?;

        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.free_memory(self.memory, None);
            self.device.destroy_image(self.handle, None);
        }
    }
}

/// Filtering configuration: repeat addressing, no anisotropy, full LOD
/// range.
pub struct Sampler {
    pub handle: vk::Sampler,
    device: Arc<ash::Device>,
}

impl Sampler {
    pub fn new(
        device: &RenderDevice,
        mag_filter: vk::Filter,
        min_filter: vk::Filter,
    ) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(mag_filter)
            .min_filter(min_filter)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(-1000.0)
            .max_lod(1000.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0);

        let handle = unsafe { device.logical.create_sampler(&sampler_info, None)? };

        Ok(Self {
            handle,
            device: device.logical.clone(),
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.handle, None);
        }
    }
}
