//! GPU memory allocation via VMA.
//!
//! Grounded on `original_source/src/gfx/Device.hpp`'s `m_allocatorMutex`
//! guarding `m_allocator`: VMA itself is not internally synchronised
//! against concurrent calls from multiple threads, so every entry point
//! here takes the lock only for the duration of the single `vk-mem` call
//! it wraps, matching the locking discipline ("no long-held locks; any
//! introduced mutex is strictly for the duration of a single
//! allocation"). `MemoryAllocationBytes`'s per-kind atomics are carried
//! over as `tracked_bytes()` so a caller can report live GPU memory use
//! without walking every resource collection.
//!
//! This wraps allocation only; `Device.hpp` is explicit that resource
//! lifetime (views, debug names, barrier state) is handled one layer up,
//! which this crate does in `collection` and `device::DeviceFacade`.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
pub struct TrackedBytes {
    pub images: u64,
    pub buffers: u64,
    pub texel_buffers: u64,
}

#[derive(Default)]
struct Counters {
    images: AtomicU64,
    buffers: AtomicU64,
    texel_buffers: AtomicU64,
}

/// A resource kind's byte counter to add to or subtract from on
/// allocation/free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Image,
    Buffer,
    TexelBuffer,
}

impl Counters {
    fn counter(&self, kind: MemoryKind) -> &AtomicU64 {
        match kind {
            MemoryKind::Image => &self.images,
            MemoryKind::Buffer => &self.buffers,
            MemoryKind::TexelBuffer => &self.texel_buffers,
        }
    }

    fn add(&self, kind: MemoryKind, bytes: u64) {
        self.counter(kind).fetch_add(bytes, Ordering::Relaxed);
    }

    fn subtract(&self, kind: MemoryKind, bytes: u64) {
        self.counter(kind).fetch_sub(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TrackedBytes {
        TrackedBytes {
            images: self.images.load(Ordering::Relaxed),
            buffers: self.buffers.load(Ordering::Relaxed),
            texel_buffers: self.texel_buffers.load(Ordering::Relaxed),
        }
    }
}

/// A VMA allocation plus the byte size it was tracked under, so `free`
/// can subtract the matching counter without the caller needing to
/// remember it.
pub struct Allocation {
    pub allocation: vk_mem::Allocation,
    pub(crate) kind: MemoryKind,
    pub(crate) size: u64,
}

/// Wraps a `vk_mem::Allocator` behind a mutex, serialising the handful
/// of calls VMA itself isn't safe to make concurrently while leaving
/// everything else about resource ownership to `collection`.
pub struct GpuAllocator {
    inner: Mutex<vk_mem::Allocator>,
    counters: Counters,
}

impl GpuAllocator {
    pub fn new(allocator: vk_mem::Allocator) -> Self {
        GpuAllocator {
            inner: Mutex::new(allocator),
            counters: Counters::default(),
        }
    }

    /// Creates a buffer and its backing allocation in one VMA call,
    /// tracking `size` bytes under `kind` for `tracked_bytes()`.
    pub fn create_buffer(
        &self,
        buffer_info: &ash::vk::BufferCreateInfo,
        allocation_info: &vk_mem::AllocationCreateInfo,
        kind: MemoryKind,
    ) -> ash::prelude::VkResult<(ash::vk::Buffer, Allocation)> {
        let size = buffer_info.size;
        let (buffer, allocation) = {
            let allocator = self.inner.lock();
            unsafe { allocator.create_buffer(buffer_info, allocation_info)? }
        };
        self.counters.add(kind, size);
        Ok((
            buffer,
            Allocation {
                allocation,
                kind,
                size,
            },
        ))
    }

    pub fn create_image(
        &self,
        image_info: &ash::vk::ImageCreateInfo,
        allocation_info: &vk_mem::AllocationCreateInfo,
        byte_size: u64,
    ) -> ash::prelude::VkResult<(ash::vk::Image, Allocation)> {
        let (image, allocation) = {
            let allocator = self.inner.lock();
            unsafe { allocator.create_image(image_info, allocation_info)? }
        };
        self.counters.add(MemoryKind::Image, byte_size);
        Ok((
            image,
            Allocation {
                allocation,
                kind: MemoryKind::Image,
                size: byte_size,
            },
        ))
    }

    pub fn destroy_buffer(&self, buffer: ash::vk::Buffer, allocation: Allocation) {
        {
            let allocator = self.inner.lock();
            unsafe { allocator.destroy_buffer(buffer, &allocation.allocation) };
        }
        self.counters.subtract(allocation.kind, allocation.size);
    }

    pub fn destroy_image(&self, image: ash::vk::Image, allocation: Allocation) {
        {
            let allocator = self.inner.lock();
            unsafe { allocator.destroy_image(image, &allocation.allocation) };
        }
        self.counters.subtract(allocation.kind, allocation.size);
    }

    /// Maps an allocation's memory. Held only as long as the returned
    /// pointer is in use; VMA itself tracks the map count so nested
    /// `map_memory` calls on the same allocation are fine.
    ///
    /// # Safety
    /// The returned pointer is valid only until a matching `unmap_memory`
    /// call, and only while `allocation` stays alive.
    pub unsafe fn map_memory(&self, allocation: &mut Allocation) -> ash::prelude::VkResult<*mut u8> {
        let allocator = self.inner.lock();
        allocator.map_memory(&mut allocation.allocation)
    }

    /// # Safety
    /// Must be paired with a prior successful `map_memory` on the same
    /// allocation.
    pub unsafe fn unmap_memory(&self, allocation: &mut Allocation) {
        let allocator = self.inner.lock();
        allocator.unmap_memory(&mut allocation.allocation)
    }

    pub fn tracked_bytes(&self) -> TrackedBytes {
        self.counters.snapshot()
    }
}
