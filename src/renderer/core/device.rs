use std::collections::BTreeSet;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, eyre};
use crate::renderer::core::instance::RenderInstance;

/// Queue family indices discovered once at device-selection time.
///
/// The graphics family is guaranteed to support both graphics and compute;
/// the present family is guaranteed to present to the window surface. They
/// may name the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

/// Owns the logical device, its queues, and the shared command pool. The
/// root allocation authority every other GPU object borrows.
pub struct RenderDevice {
    pub physical: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub logical: Arc<ash::Device>,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    command_pool: vk::CommandPool,
}

impl RenderDevice {
    pub fn new(instance: &RenderInstance) -> Result<Self> {
        let (physical, queue_families) = Self::select_physical_device(instance)?;

        let memory_properties = unsafe {
            instance.instance.get_physical_device_memory_properties(physical)
        };

        let logical = Self::create_logical_device(&instance.instance, physical, queue_families)?;

        let graphics_queue = unsafe {
            logical.get_device_queue(queue_families.graphics, 0)
        };
        let present_queue = unsafe {
            logical.get_device_queue(queue_families.present, 0)
        };

        let command_pool = {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_families.graphics);
            unsafe { logical.create_command_pool(&pool_info, None)? }
        };

        Ok(Self {
            physical,
            memory_properties,
            queue_families,
            logical: Arc::new(logical),
            graphics_queue,
            present_queue,
            command_pool,
        })
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    /// First memory type index matching the filter and property flags.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type_index(type_filter, flags, &self.memory_properties)
            .ok_or_eyre("No suitable memory type found")
    }

    /// Allocate and begin a one-shot command buffer on the graphics queue.
    ///
    /// Pair with [`end_single_time_commands`](Self::end_single_time_commands),
    /// which submits and blocks until the queue drains. Setup-time transfers
    /// only; never call this on the per-frame hot path.
    pub fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);
        let cmd = unsafe { self.logical.allocate_command_buffers(&alloc_info)?[0] };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.logical.begin_command_buffer(cmd, &begin_info)?;
        }

        Ok(cmd)
    }

    pub fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.logical.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default()
                .command_buffers(&command_buffers);
            self.logical.queue_submit(
                self.graphics_queue,
                &[submit_info],
                vk::Fence::null(),
            )?;
            self.logical.queue_wait_idle(self.graphics_queue)?;

            self.logical.free_command_buffers(self.command_pool, &command_buffers);
        }
        Ok(())
    }

    fn select_physical_device(
        instance: &RenderInstance,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(eyre!("No GPU with Vulkan support found"));
        }

        let best = devices
            .into_iter()
            .filter_map(|device| {
                let families = unsafe {
                    instance
                        .instance
                        .get_physical_device_queue_family_properties(device)
                };
                let indices = select_queue_families(&families, |index| unsafe {
                    instance
                        .surface_loader
                        .get_physical_device_surface_support(
                            device,
                            index,
                            instance.surface,
                        )
                        .unwrap_or(false)
                })?;
                Some((device, indices))
            })
            .max_by_key(|(device, _)| {
                let props = unsafe {
                    instance.instance.get_physical_device_properties(*device)
                };
                device_type_score(props.device_type)
            });

        let (device, indices) = best
            .ok_or_eyre("No GPU with the required queue families found")?;

        let props = unsafe {
            instance.instance.get_physical_device_properties(device)
        };
        log::info!(
            "Selected GPU: {:?} (graphics family {}, present family {})",
            props.device_name_as_c_str().unwrap_or(c"unknown"),
            indices.graphics,
            indices.present,
        );

        Ok((device, indices))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
    ) -> Result<ash::Device> {
        // One queue per unique family; graphics and present may coincide.
        let unique_families: BTreeSet<u32> =
            [queue_families.graphics, queue_families.present].into();

        let queue_priorities = [1.0];
        let queue_create_infos = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
        let enabled_features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&enabled_features);

        Ok(unsafe { instance.create_device(physical, &device_create_info, None)? })
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            self.logical.destroy_command_pool(self.command_pool, None);
            self.logical.destroy_device(None);
        }
    }
}

/// Rank device classes: discrete > integrated > virtual > cpu > other.
fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// First family supporting graphics+compute, first family able to present.
fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let graphics = families.iter().position(|family| {
        family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    })? as u32;

    let present = (0..families.len() as u32).find(|&index| supports_present(index))?;

    Some(QueueFamilyIndices { graphics, present })
}

fn find_memory_type_index(
    type_filter: u32,
    flags: vk::MemoryPropertyFlags,
    props: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_filter & (1 << i) != 0
            && props.memory_types[i as usize].property_flags.contains(flags)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn device_scoring_prefers_discrete() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::VIRTUAL_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::VIRTUAL_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::CPU)
                > device_type_score(vk::PhysicalDeviceType::OTHER)
        );
    }

    #[test]
    fn queue_selection_allows_shared_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 0 });
    }

    #[test]
    fn queue_selection_allows_split_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Only the transfer-only family can present.
        let indices = select_queue_families(&families, |i| i == 0).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 0 });
    }

    #[test]
    fn queue_selection_requires_combined_graphics_compute() {
        // Graphics without compute must not qualify.
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(select_queue_families(&families, |_| true).is_none());
    }

    #[test]
    fn queue_selection_requires_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        assert!(select_queue_families(&families, |_| false).is_none());
    }

    #[test]
    fn memory_type_honors_filter_and_flags() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;

        // First match wins.
        assert_eq!(find_memory_type_index(0b111, host, &props), Some(1));
        // The filter can exclude the first candidate.
        assert_eq!(find_memory_type_index(0b100, host, &props), Some(2));
        // No match at all.
        assert_eq!(
            find_memory_type_index(0b001, host, &props),
            None
        );
    }
}
