use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crate::renderer::core::RenderDevice;

/// Descriptor resource kinds this application binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    StorageImage,
    CombinedImageSampler,
}

impl DescriptorKind {
    const ALL: [DescriptorKind; 4] = [
        DescriptorKind::UniformBuffer,
        DescriptorKind::StorageBuffer,
        DescriptorKind::StorageImage,
        DescriptorKind::CombinedImageSampler,
    ];

    pub fn vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorKind::CombinedImageSampler => {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
        }
    }

    fn budget_index(self) -> usize {
        match self {
            DescriptorKind::UniformBuffer => 0,
            DescriptorKind::StorageBuffer => 1,
            DescriptorKind::StorageImage => 2,
            DescriptorKind::CombinedImageSampler => 3,
        }
    }
}

/// One binding slot of a set layout. The binding index is implicit: it is
/// the position of this entry in the slice passed to
/// [`DescriptorSetLayout::new`].
#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub count: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

/// Reusable layout object, independent of any pool.
pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
    device: Arc<ash::Device>,
}

impl DescriptorSetLayout {
    pub fn new(device: &RenderDevice, bindings: &[DescriptorBinding]) -> Result<Self> {
        let vk_bindings = layout_bindings(bindings);
        let layout_info =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let handle = unsafe {
            device.logical.create_descriptor_set_layout(&layout_info, None)?
        };

        Ok(Self {
            handle,
            bindings: bindings.to_vec(),
            device: device.logical.clone(),
        })
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

fn layout_bindings(
    bindings: &[DescriptorBinding],
) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    bindings
        .iter()
        .enumerate()
        .map(|(index, binding)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(index as u32)
                .descriptor_count(binding.count)
                .descriptor_type(binding.kind.vk())
                .stage_flags(binding.stages)
        })
        .collect()
}

/// Remaining capacity of the fixed-size pool, tracked host-side so
/// exhaustion is a deterministic typed error rather than a driver-dependent
/// failure.
#[derive(Debug, Clone)]
struct PoolBudget {
    sets_left: u32,
    descriptors_left: [u32; 4],
}

impl PoolBudget {
    fn new(max_sets: u32, max_descriptors_per_kind: u32) -> Self {
        Self {
            sets_left: max_sets,
            descriptors_left: [max_descriptors_per_kind; 4],
        }
    }

    fn take(&mut self, bindings: &[DescriptorBinding]) -> Result<()> {
        if self.sets_left == 0 {
            return Err(eyre!("Descriptor pool exhausted: no sets left"));
        }
        for binding in bindings {
            let left = self.descriptors_left[binding.kind.budget_index()];
            if left < binding.count {
                return Err(eyre!(
                    "Descriptor pool exhausted: no {:?} descriptors left",
                    binding.kind
                ));
            }
        }

        self.sets_left -= 1;
        for binding in bindings {
            self.descriptors_left[binding.kind.budget_index()] -= binding.count;
        }
        Ok(())
    }
}

/// Central pool handing out descriptor sets. Sized generously at
/// construction; sets are never recycled individually and the pool is freed
/// in bulk on drop. Suitable only for a bounded, known-at-startup resource
/// set.
pub struct DescriptorAllocator {
    pool: vk::DescriptorPool,
    budget: PoolBudget,
    device: Arc<ash::Device>,
}

impl DescriptorAllocator {
    const MAX_SETS: u32 = 1000;
    const MAX_DESCRIPTORS_PER_KIND: u32 = 1000;

    pub fn new(device: &RenderDevice) -> Result<Self> {
        let pool_sizes = DescriptorKind::ALL.map(|kind| {
            vk::DescriptorPoolSize::default()
                .ty(kind.vk())
                .descriptor_count(Self::MAX_DESCRIPTORS_PER_KIND)
        });
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(Self::MAX_SETS)
            .pool_sizes(&pool_sizes);
        let pool = unsafe {
            device.logical.create_descriptor_pool(&pool_info, None)?
        };

        Ok(Self {
            pool,
            budget: PoolBudget::new(Self::MAX_SETS, Self::MAX_DESCRIPTORS_PER_KIND),
            device: device.logical.clone(),
        })
    }

    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        self.budget.take(layout.bindings())?;

        let set_layouts = [layout.handle];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&set_layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// One slot of a descriptor-set update; exactly one of `buffer` and `image`
/// is set, matching the kind.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub buffer: Option<vk::DescriptorBufferInfo>,
    pub image: Option<vk::DescriptorImageInfo>,
}

impl DescriptorWrite {
    pub fn buffer(binding: u32, kind: DescriptorKind, info: vk::DescriptorBufferInfo) -> Self {
        Self {
            binding,
            kind,
            buffer: Some(info),
            image: None,
        }
    }

    pub fn image(binding: u32, kind: DescriptorKind, info: vk::DescriptorImageInfo) -> Self {
        Self {
            binding,
            kind,
            buffer: None,
            image: Some(info),
        }
    }
}

pub fn update_descriptor_set(
    device: &ash::Device,
    set: vk::DescriptorSet,
    writes: &[DescriptorWrite],
) {
    let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
        .iter()
        .map(|write| [write.buffer.unwrap_or_default()])
        .collect();
    let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
        .iter()
        .map(|write| [write.image.unwrap_or_default()])
        .collect();

    let vk_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .enumerate()
        .map(|(i, write)| {
            let mut vk_write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(write.kind.vk());
            if write.buffer.is_some() {
                vk_write = vk_write.buffer_info(&buffer_infos[i]);
            }
            if write.image.is_some() {
                vk_write = vk_write.image_info(&image_infos[i]);
            }
            vk_write
        })
        .collect();

    unsafe {
        device.update_descriptor_sets(&vk_writes, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(count: u32, kind: DescriptorKind) -> DescriptorBinding {
        DescriptorBinding {
            count,
            kind,
            stages: vk::ShaderStageFlags::COMPUTE,
        }
    }

    #[test]
    fn binding_index_is_slice_position() {
        let bindings = [
            binding(1, DescriptorKind::UniformBuffer),
            binding(1, DescriptorKind::StorageBuffer),
            binding(2, DescriptorKind::StorageImage),
        ];
        let vk_bindings = layout_bindings(&bindings);
        assert_eq!(vk_bindings.len(), 3);
        for (i, vk_binding) in vk_bindings.iter().enumerate() {
            assert_eq!(vk_binding.binding, i as u32);
        }
        assert_eq!(vk_bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(vk_bindings[1].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(vk_bindings[2].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(vk_bindings[2].descriptor_count, 2);
    }

    #[test]
    fn budget_rejects_set_exhaustion() {
        let mut budget = PoolBudget::new(2, 1000);
        let bindings = [binding(1, DescriptorKind::UniformBuffer)];
        assert!(budget.take(&bindings).is_ok());
        assert!(budget.take(&bindings).is_ok());
        assert!(budget.take(&bindings).is_err());
    }

    #[test]
    fn budget_rejects_per_kind_exhaustion() {
        let mut budget = PoolBudget::new(1000, 3);
        let bindings = [binding(2, DescriptorKind::StorageImage)];
        assert!(budget.take(&bindings).is_ok());
        // 1 left, 2 requested.
        assert!(budget.take(&bindings).is_err());
        // Other kinds are unaffected.
        assert!(budget.take(&[binding(2, DescriptorKind::StorageBuffer)]).is_ok());
    }

    #[test]
    fn budget_failure_leaves_counts_untouched() {
        let mut budget = PoolBudget::new(1, 4);
        let too_big = [binding(5, DescriptorKind::UniformBuffer)];
        assert!(budget.take(&too_big).is_err());
        // The failed take consumed nothing.
        let fits = [binding(4, DescriptorKind::UniformBuffer)];
        assert!(budget.take(&fits).is_ok());
    }
}
