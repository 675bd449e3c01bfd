//! Descriptor pool allocation.
//!
//! Grounded on `original_source/src/gfx/DescriptorAllocator.cpp`: a
//! growable list of `vk::DescriptorPool`s sized from a fixed default
//! pool-size table, allocating from the newest pool and rolling to a
//! freshly created one on `eErrorOutOfPoolMemory`/`eErrorFragmentedPool`,
//! retrying exactly once before giving up.

use ash::vk;

const DEFAULT_DESCRIPTOR_COUNT: u32 = 1000;
const DEFAULT_SAMPLER_DESCRIPTOR_COUNT: u32 = 100;
const DEFAULT_ACCELERATION_STRUCTURE_COUNT: u32 = 100;
const MAX_SETS_PER_POOL: u32 = 1000;

fn default_pool_sizes() -> Vec<vk::DescriptorPoolSize> {
    vec![
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: DEFAULT_SAMPLER_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            descriptor_count: DEFAULT_DESCRIPTOR_COUNT,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: DEFAULT_ACCELERATION_STRUCTURE_COUNT,
        },
    ]
}

/// Allocates descriptor sets out of a growable list of pools, rolling
/// forward to a new pool when the current one runs out.
pub struct DescriptorAllocator {
    pools: Vec<vk::DescriptorPool>,
}

impl DescriptorAllocator {
    pub fn new() -> Self {
        DescriptorAllocator { pools: Vec::new() }
    }

    fn create_pool(&self, device: &ash::Device) -> vk::DescriptorPool {
        let sizes = default_pool_sizes();
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(MAX_SETS_PER_POOL)
            .pool_sizes(&sizes);
        unsafe {
            device
                .create_descriptor_pool(&info, None)
                .expect("descriptor pool creation should not fail with stock sizes")
        }
    }

    /// Allocates one descriptor set with `layout`, creating a new pool
    /// and retrying once if the current pool is exhausted or fragmented.
    /// Panics if the retry also fails — this mirrors the assertion the
    /// original makes after its single retry rather than propagating a
    /// `Result` for what should never happen with stock pool sizes.
    pub fn allocate(&mut self, device: &ash::Device, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        if self.pools.is_empty() {
            self.pools.push(self.create_pool(device));
        }

        let layouts = [layout];
        let pool = *self.pools.last().unwrap();
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        match unsafe { device.allocate_descriptor_sets(&info) } {
            Ok(sets) => sets[0],
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                log::debug!("descriptor pool exhausted, rolling to a new pool");
                self.pools.push(self.create_pool(device));
                let pool = *self.pools.last().unwrap();
                let info = vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts);
                let sets = unsafe { device.allocate_descriptor_sets(&info) }
                    .expect("descriptor set allocation failed twice in a row on a fresh pool");
                sets[0]
            }
            Err(e) => panic!("descriptor set allocation failed: {e:?}"),
        }
    }

    /// Resets every pool, freeing all descriptor sets allocated from
    /// this allocator at once. Called at the start of a frame that no
    /// longer needs last frame's transient descriptor sets.
    pub fn reset_pools(&mut self, device: &ash::Device) {
        for &pool in &self.pools {
            unsafe {
                device
                    .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                    .expect("descriptor pool reset should not fail");
            }
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe {
                device.destroy_descriptor_pool(pool, None);
            }
        }
    }
}

impl Default for DescriptorAllocator {
    fn default() -> Self {
        Self::new()
    }
}
