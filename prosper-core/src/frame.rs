//! The per-frame loop and its swapchain handshake.
//!
//! Ties the resource collections, ring buffer and profiler together into
//! the sequence a caller drives once per frame: acquire an image from the
//! swapchain, advance the ring buffer and profiler to this frame, record
//! work, then present. Neither acquire nor present destroys anything —
//! resource teardown only ever happens through a collection's own
//! `destroy_resources`, which a caller invokes explicitly (typically when
//! `acquire_next_image`/`present` report the swapchain needs recreating).
//! The swapchain itself is an external collaborator (spec §6) —
//! `Swapchain` here is only the trait this crate's frame loop is written
//! against, mirroring `render/src/traits.rs`'s `Downcast`-based backend
//! object traits in the teacher.

use ash::vk;

use crate::collection::{BufferCollection, ImageCollection, TexelBufferCollection};
use crate::profiler::Profiler;
use crate::ring_buffer::RingBuffer;

pub trait Swapchain {
    /// Blocks until an image is available. `None` means the swapchain is
    /// out of date and must be recreated before this frame can proceed.
    fn acquire_next_image(&mut self) -> Option<(u32, vk::Semaphore)>;
    /// Presents `image_index`. Returns `false` if the swapchain is out of
    /// date or suboptimal and should be recreated before the next frame.
    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> bool;
    /// The fence the caller must wait on before reusing this frame's
    /// in-flight resources, i.e. the fence from the frame
    /// `MAX_FRAMES_IN_FLIGHT` acquisitions ago.
    fn current_fence(&self) -> vk::Fence;
    /// Advances the swapchain's own frame-in-flight index. Called once per
    /// frame, after `present`.
    fn next_frame(&mut self);
    fn extent(&self) -> vk::Extent2D;
}

/// Owns the three resource collections, the ring buffer and the
/// profiler, and drives them through one frame at a time.
///
/// Deliberately does not own a `vk::Device` or command pool — those stay
/// with the caller's `DeviceFacade` implementation, matching how
/// `RenderResourceCollection` takes a `Device *` back-pointer rather than
/// owning device bring-up (spec §6).
pub struct FrameContext {
    pub images: ImageCollection,
    pub buffers: BufferCollection,
    pub texel_buffers: TexelBufferCollection,
    pub ring_buffer: RingBuffer,
    pub profiler: Profiler,
}

impl FrameContext {
    pub fn new(ring_buffer_frame_size: u64, frames_in_flight: u32) -> Self {
        FrameContext {
            images: ImageCollection::new(),
            buffers: BufferCollection::new(),
            texel_buffers: TexelBufferCollection::new(),
            ring_buffer: RingBuffer::new(ring_buffer_frame_size, frames_in_flight),
            profiler: Profiler::new(),
        }
    }

    /// Advances every per-frame subsystem: asserts no collection leaked a
    /// resource, clears per-frame debug bookkeeping, and rolls the ring
    /// buffer over to its next region. Must be called exactly once per
    /// frame, before recording that frame's work.
    pub fn start_frame(&mut self) {
        self.images.start_frame();
        self.buffers.start_frame();
        self.texel_buffers.start_frame();
        self.ring_buffer.start_frame();
    }

    /// Tears down every resource the three collections own. Called when
    /// the swapchain needs recreating (signaled by `Swapchain`'s `None`/
    /// `false` returns) rather than on any per-frame schedule: the
    /// collections stay alive and usable afterward.
    pub fn destroy_all_resources(
        &mut self,
        destroy_image: impl FnMut(crate::device::RawImage),
        destroy_image_view: impl FnMut(vk::ImageView),
        destroy_buffer: impl FnMut(crate::device::RawBuffer),
        destroy_texel_buffer: impl FnMut(crate::device::RawTexelBuffer),
    ) {
        self.images.destroy_resources(destroy_image, destroy_image_view);
        self.buffers.destroy_resources(destroy_buffer);
        self.texel_buffers.destroy_resources(destroy_texel_buffer);
    }
}
