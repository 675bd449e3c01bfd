//! Transition/barrier batching.
//!
//! Collects the image and buffer barriers a pass needs into one
//! `SmallVec` rather than issuing `vkCmdPipelineBarrier` once per
//! resource, the same batching the teacher's hot frame paths prefer
//! `smallvec` for (`autograph-render`'s `Cargo.toml` pulls it in for
//! exactly this). Scheduling which resources need a transition before a
//! given pass is left to the caller — this module only turns "resource X
//! goes from state A to state B" requests into the minimal set of
//! `vk::ImageMemoryBarrier`/`vk::BufferMemoryBarrier` values and the
//! pipeline stage masks `vkCmdPipelineBarrier` needs.

use ash::vk;
use smallvec::SmallVec;

use crate::collection::{
    BufferCollection, BufferHandle, BufferState, ImageCollection, ImageHandle, ImageState,
    TexelBufferCollection, TexelBufferHandle,
};

/// A single recorded barrier, already split by kind since Vulkan's
/// `vkCmdPipelineBarrier` takes separate slices for each.
pub enum Barrier {
    Image(vk::ImageMemoryBarrier),
    Buffer(vk::BufferMemoryBarrier),
}

/// Accumulates barriers for one `vkCmdPipelineBarrier` call.
#[derive(Default)]
pub struct Batch {
    barriers: SmallVec<[Barrier; 8]>,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl Batch {
    pub fn new() -> Self {
        Batch {
            barriers: SmallVec::new(),
            src_stage: vk::PipelineStageFlags::empty(),
            dst_stage: vk::PipelineStageFlags::empty(),
        }
    }

    /// Requests that `handle` be in `new_state` after this batch is
    /// flushed. A no-op if the resource is already in that state — no
    /// barrier is recorded and the pipeline stage masks are untouched.
    pub fn transition_image(
        &mut self,
        collection: &mut ImageCollection,
        handle: ImageHandle,
        new_state: ImageState,
    ) {
        let old_state = collection.transition(handle, new_state);
        if old_state == new_state {
            return;
        }

        self.src_stage |= old_state.stage_mask;
        self.dst_stage |= new_state.stage_mask;

        self.barriers.push(Barrier::Image(
            vk::ImageMemoryBarrier::builder()
                .old_layout(old_state.layout)
                .new_layout(new_state.layout)
                .src_access_mask(old_state.access_mask)
                .dst_access_mask(new_state.access_mask)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(collection.raw(handle).image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                })
                .build(),
        ));
    }

    pub fn transition_buffer(
        &mut self,
        collection: &mut BufferCollection,
        handle: BufferHandle,
        new_state: BufferState,
    ) {
        let old_state = collection.transition(handle, new_state);
        if old_state == new_state {
            return;
        }

        self.src_stage |= old_state.stage_mask;
        self.dst_stage |= new_state.stage_mask;

        self.barriers.push(Barrier::Buffer(
            vk::BufferMemoryBarrier::builder()
                .src_access_mask(old_state.access_mask)
                .dst_access_mask(new_state.access_mask)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(collection.raw(handle).buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build(),
        ));
    }

    /// Texel buffers carry the same state machine as ordinary buffers —
    /// the extra `vk::BufferView` they own doesn't change access/stage
    /// semantics, only how a descriptor write binds them.
    pub fn transition_texel_buffer(
        &mut self,
        collection: &mut TexelBufferCollection,
        handle: TexelBufferHandle,
        new_state: BufferState,
    ) {
        let old_state = collection.transition(handle, new_state);
        if old_state == new_state {
            return;
        }

        self.src_stage |= old_state.stage_mask;
        self.dst_stage |= new_state.stage_mask;

        self.barriers.push(Barrier::Buffer(
            vk::BufferMemoryBarrier::builder()
                .src_access_mask(old_state.access_mask)
                .dst_access_mask(new_state.access_mask)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(collection.raw(handle).buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build(),
        ));
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Splits the batch into the triple `vkCmdPipelineBarrier` expects
    /// and records it, then clears the batch for reuse.
    pub fn flush(&mut self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        if self.barriers.is_empty() {
            return;
        }

        let mut image_barriers = SmallVec::<[vk::ImageMemoryBarrier; 8]>::new();
        let mut buffer_barriers = SmallVec::<[vk::BufferMemoryBarrier; 8]>::new();
        for barrier in self.barriers.drain(..) {
            match barrier {
                Barrier::Image(b) => image_barriers.push(b),
                Barrier::Buffer(b) => buffer_barriers.push(b),
            }
        }

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }

        self.src_stage = vk::PipelineStageFlags::empty();
        self.dst_stage = vk::PipelineStageFlags::empty();
    }
}

/// One call's worth of requested state transitions across all three
/// resource kinds, in the order they should be applied. Input order is
/// preserved in the resulting barrier arrays.
#[derive(Default)]
pub struct Transitions<'a> {
    pub images: &'a [(ImageHandle, ImageState)],
    pub buffers: &'a [(BufferHandle, BufferState)],
    pub texel_buffers: &'a [(TexelBufferHandle, BufferState)],
}

fn assert_no_duplicates<T: Copy + Eq + std::hash::Hash>(handles: impl Iterator<Item = T>) {
    let mut seen = std::collections::HashSet::new();
    for h in handles {
        debug_assert!(seen.insert(h), "the same handle was transitioned twice in one batch");
    }
}

/// Collects barriers for `transitions.images`/`buffers`/`texel_buffers` and
/// issues exactly one `vkCmdPipelineBarrier` call covering all of them.
/// Asserts (debug-only) that no handle appears twice within a single kind
/// in the same call — ordering between two transitions of the same
/// resource is otherwise ambiguous.
pub fn transition(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    images: &mut ImageCollection,
    buffers: &mut BufferCollection,
    texel_buffers: &mut TexelBufferCollection,
    transitions: Transitions<'_>,
) {
    assert_no_duplicates(transitions.images.iter().map(|(h, _)| *h));
    assert_no_duplicates(transitions.buffers.iter().map(|(h, _)| *h));
    assert_no_duplicates(transitions.texel_buffers.iter().map(|(h, _)| *h));

    let mut batch = Batch::new();
    for &(handle, state) in transitions.images {
        batch.transition_image(images, handle, state);
    }
    for &(handle, state) in transitions.buffers {
        batch.transition_buffer(buffers, handle, state);
    }
    for &(handle, state) in transitions.texel_buffers {
        batch.transition_texel_buffer(texel_buffers, handle, state);
    }
    batch.flush(device, command_buffer);
}
