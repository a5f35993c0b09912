use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crate::renderer::core::RenderDevice;

/// A linear GPU allocation: one `vk::Buffer` paired with its backing
/// memory. Non-copyable; both handles are released in `Drop`.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    memory: vk::DeviceMemory,
    host_visible: bool,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        device: &RenderDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let handle = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.logical.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe {
            device.logical.get_buffer_memory_requirements(handle)
        };
        let memory = {
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(
                    device.find_memory_type(requirements.memory_type_bits, memory_flags)?,
                );
            unsafe { device.logical.allocate_memory(&alloc_info, None)? }
        };
        unsafe {
            device.logical.bind_buffer_memory(handle, memory, 0)?;
        }

        Ok(Self {
            handle,
            size,
            memory,
            host_visible: memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            device: device.logical.clone(),
        })
    }

    /// Copy `data` to the start of the buffer through a scoped mapping.
    ///
    /// The mapping must not be live across a GPU submission that touches
    /// this memory; writes here are only safe against setup-time or
    /// fence-protected buffers.
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<()> {
        if !self.host_visible {
            return Err(eyre!("Cannot write to a buffer without host-visible memory"));
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(eyre!(
                "Write of {} bytes exceeds buffer size {}",
                bytes.len(),
                self.size
            ));
        }

        unsafe {
            let mapped = self.device.map_memory(
                self.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.handle)
            .offset(0)
            .range(self.size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.free_memory(self.memory, None);
            self.device.destroy_buffer(self.handle, None);
        }
    }
}
