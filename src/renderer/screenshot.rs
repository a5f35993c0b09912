use std::path::Path;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::OptionExt;
use crate::renderer::Renderer;

impl Renderer {
    /// Capture the most recently presented swapchain image to a PNG file.
    ///
    /// Blocking tooling path: the copy runs on a single-time command buffer
    /// and stalls the queue, so calling this inside the frame loop costs a
    /// visible hitch. Uses a format-converting blit when the device supports
    /// it for this format pair; otherwise a raw copy plus a manual BGR→RGB
    /// swizzle.
    pub fn save_screenshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let device = &self.core.device;
        let instance = &self.core.instance.instance;
        let extent = self.swapchain.extent();
        let surface_format = self.swapchain.surface_format().format;

        let optimal_props = unsafe {
            instance.get_physical_device_format_properties(device.physical, surface_format)
        };
        let linear_props = unsafe {
            instance.get_physical_device_format_properties(
                device.physical,
                vk::Format::R8G8B8A8_UNORM,
            )
        };
        let supports_blit = optimal_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_SRC)
            && linear_props
                .linear_tiling_features
                .contains(vk::FormatFeatureFlags::BLIT_DST);
        if !supports_blit {
            log::info!("Device cannot blit this format pair, using raw copy");
        }

        let src_image = self.swapchain.current_image();

        // Linear destination image the host can map directly.
        let dst_image = {
            let image_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(vk::Format::R8G8B8A8_UNORM)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::LINEAR)
                .usage(vk::ImageUsageFlags::TRANSFER_DST)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.logical.create_image(&image_info, None)? }
        };
        let requirements = unsafe {
            device.logical.get_image_memory_requirements(dst_image)
        };
        let dst_memory = {
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(device.find_memory_type(
                    requirements.memory_type_bits,
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                )?);
            unsafe { device.logical.allocate_memory(&alloc_info, None)? }
        };
        unsafe {
            device.logical.bind_image_memory(dst_image, dst_memory, 0)?;
        }

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };

        let cmd = device.begin_single_time_commands()?;
        unsafe {
            let barriers = [
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .image(dst_image)
                    .subresource_range(range),
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::MEMORY_READ)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .image(src_image)
                    .subresource_range(range),
            ];
            device.logical.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );

            if supports_blit {
                let offsets = [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: extent.width as i32,
                        y: extent.height as i32,
                        z: 1,
                    },
                ];
                let blit = vk::ImageBlit::default()
                    .src_subresource(layers)
                    .src_offsets(offsets)
                    .dst_subresource(layers)
                    .dst_offsets(offsets);
                device.logical.cmd_blit_image(
                    cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::NEAREST,
                );
            } else {
                let copy = vk::ImageCopy::default()
                    .src_subresource(layers)
                    .dst_subresource(layers)
                    .extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    });
                device.logical.cmd_copy_image(
                    cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
            }

            let barriers = [
                // GENERAL is the required layout for mapping the memory.
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::GENERAL)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                    .image(dst_image)
                    .subresource_range(range),
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                    .image(src_image)
                    .subresource_range(range),
            ];
            device.logical.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
        device.end_single_time_commands(cmd)?;

        let layout = unsafe {
            device.logical.get_image_subresource_layout(
                dst_image,
                vk::ImageSubresource {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    array_layer: 0,
                },
            )
        };

        let mut pixels = unsafe {
            let mapped = device.logical.map_memory(
                dst_memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?;
            let data = std::slice::from_raw_parts(
                mapped.cast::<u8>().add(layout.offset as usize),
                layout.size as usize,
            );
            let pixels = tighten_rows(
                data,
                layout.row_pitch as usize,
                extent.width as usize,
                extent.height as usize,
            );
            device.logical.unmap_memory(dst_memory);
            pixels
        };

        // The blit already converted to RGBA; a raw copy from a BGR-ordered
        // surface leaves the channels swapped.
        if !supports_blit && is_bgr_format(surface_format) {
            swizzle_bgra_in_place(&mut pixels);
        }

        unsafe {
            device.logical.free_memory(dst_memory, None);
            device.logical.destroy_image(dst_image, None);
        }

        let image = image::RgbaImage::from_raw(extent.width, extent.height, pixels)
            .ok_or_eyre("Screenshot pixel data has unexpected length")?;
        image.save(path)?;

        log::info!("Screenshot saved to {:?}", path);

        Ok(())
    }
}

/// BGR-ordered surface formats that need a manual channel swap after a raw
/// (non-converting) copy. Covers the common 8-bit BGRA surfaces only.
fn is_bgr_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SNORM
    )
}

/// Repack rows laid out with a driver-chosen pitch into tightly packed
/// RGBA8 rows.
fn tighten_rows(data: &[u8], row_pitch: usize, width: usize, height: usize) -> Vec<u8> {
    let row_bytes = width * 4;
    let mut out = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * row_pitch;
        out.extend_from_slice(&data[start..start + row_bytes]);
    }
    out
}

/// Swap the R and B channels of packed 4-byte pixels in place.
fn swizzle_bgra_in_place(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_formats_are_recognized() {
        assert!(is_bgr_format(vk::Format::B8G8R8A8_SRGB));
        assert!(is_bgr_format(vk::Format::B8G8R8A8_UNORM));
        assert!(is_bgr_format(vk::Format::B8G8R8A8_SNORM));
        assert!(!is_bgr_format(vk::Format::R8G8B8A8_UNORM));
        assert!(!is_bgr_format(vk::Format::R8G8B8A8_SRGB));
    }

    #[test]
    fn rows_are_tightened_from_padded_pitch() {
        // 2x2 image, 8 bytes of pixels per row, pitch of 12.
        let mut data = Vec::new();
        for row in 0..2u8 {
            for px in 0..8u8 {
                data.push(row * 10 + px);
            }
            data.extend_from_slice(&[0xEE; 4]);
        }
        let tight = tighten_rows(&data, 12, 2, 2);
        assert_eq!(
            tight,
            vec![0, 1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 16, 17]
        );
    }

    #[test]
    fn tighten_is_identity_for_packed_rows() {
        let data: Vec<u8> = (0..16).collect();
        assert_eq!(tighten_rows(&data, 8, 2, 2), data);
    }

    #[test]
    fn swizzle_swaps_red_and_blue() {
        let mut pixels = vec![1, 2, 3, 4, 5, 6, 7, 8];
        swizzle_bgra_in_place(&mut pixels);
        assert_eq!(pixels, vec![3, 2, 1, 4, 7, 6, 5, 8]);
        // A second swizzle restores the original bytes.
        swizzle_bgra_in_place(&mut pixels);
        assert_eq!(pixels, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
