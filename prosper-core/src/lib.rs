//! Render-resource management core: generation-tagged GPU resource
//! pools, a compute-pass abstraction built on SPIR-V reflection,
//! frame-in-flight CPU/GPU profiling, a per-frame ring-buffer allocator,
//! and transition/barrier batching.
//!
//! Deliberately out of scope: concrete render passes, scene/asset
//! loading beyond the KTX texture format, non-Vulkan backends, and
//! automatic barrier/topological scheduling — callers decide what to
//! transition and when, this crate just turns that decision into
//! batched `vkCmdPipelineBarrier` calls.

pub mod allocator;
pub mod collection;
pub mod compute_pass;
pub mod config;
pub mod descriptor_pool;
pub mod device;
pub mod frame;
pub mod handle;
pub mod ktx;
pub mod math;
pub mod profiler;
pub mod ring_buffer;
pub mod transition;

/// Installs the `env_logger` subscriber, mirroring the teacher's
/// `pretty_env_logger::init()` call in `main.rs`. Safe to call more than
/// once; only the first call takes effect.
pub fn log_init() {
    let _ = env_logger::try_init();
}
