//! The device façade this crate is written against.
//!
//! `prosper-core` never brings up a `vk::Device` itself — the teacher's
//! `RenderResourceCollection` takes a `Device *` back-pointer without
//! owning device bring-up, and this crate does the same through the
//! `DeviceFacade` trait. A production implementation of this trait lives
//! outside this crate; only a `MockDevice` test double ships here.

use std::collections::HashSet;
use std::path::PathBuf;

use ash::vk;
use prosper_spirv::ShaderReflection;

use crate::collection::{BufferDescription, ImageDescription, TexelBufferDescription};

#[cfg(any(test, feature = "test-util"))]
use ash::vk::Handle as _;

/// Raw resources a `DeviceFacade` hands back from creation calls.
///
/// Collections store these opaquely; only the facade interprets them.
#[derive(Debug, Clone, Copy)]
pub struct RawImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

#[derive(Debug, Clone, Copy)]
pub struct RawBuffer {
    pub buffer: vk::Buffer,
}

#[derive(Debug, Clone, Copy)]
pub struct RawTexelBuffer {
    pub buffer: vk::Buffer,
    pub view: vk::BufferView,
}

/// A request to compile (or recompile) one shader module, resolved
/// through the caller's own include/define handling before it reaches the
/// compiler.
pub struct ShaderCompileRequest<'a> {
    pub rel_path: &'a str,
    pub debug_name: &'a str,
    pub defines: &'a [(&'a str, &'a str)],
}

/// The result of a successful compile: the module itself, its reflection,
/// and every source file the compiler reported as an input — the set
/// `recompile_shader` checks a changed-files list against to decide
/// whether a rebuild is even necessary.
pub struct CompiledShader {
    pub module: vk::ShaderModule,
    pub reflection: ShaderReflection,
    pub source_files: HashSet<PathBuf>,
}

/// Everything a resource collection needs from the device: allocate,
/// free, and tag with a debug name.
///
/// Implementations are expected to serialize calls that touch the VMA
/// allocator behind a single lock (spec's concurrency model limits
/// shared mutable state to that one call site); `prosper-core` itself
/// never assumes thread-safety beyond what this trait promises.
pub trait DeviceFacade {
    fn create_image(&self, description: &ImageDescription, debug_name: &str) -> RawImage;
    fn destroy_image(&self, raw: RawImage);

    fn create_buffer(&self, description: &BufferDescription, debug_name: &str) -> RawBuffer;
    fn destroy_buffer(&self, raw: RawBuffer);

    fn create_texel_buffer(
        &self,
        description: &TexelBufferDescription,
        debug_name: &str,
    ) -> RawTexelBuffer;
    fn destroy_texel_buffer(&self, raw: RawTexelBuffer);

    /// Re-applies a debug name to an already-created resource, used when
    /// two aliased descriptions collapse into one underlying allocation
    /// and their names get concatenated with `|`.
    fn set_debug_name(&self, object: vk::ObjectType, handle: u64, name: &str);

    /// Compiles GLSL/HLSL source named by `request.rel_path` into a shader
    /// module and reflects it. Returns `None` on a failed compile/
    /// validation — a failed recompile during hot-reload is expected
    /// steady-state behavior, not an exceptional one, so this is not a
    /// `Result`.
    fn compile_shader_module(&self, request: ShaderCompileRequest<'_>) -> Option<CompiledShader>;

    /// Begins recording a primary graphics command buffer for this frame.
    fn begin_graphics_commands(&self) -> vk::CommandBuffer;
    /// Ends and submits the command buffer `begin_graphics_commands`
    /// returned.
    fn end_graphics_commands(&self, command_buffer: vk::CommandBuffer);
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Hands out monotonically increasing fake handles instead of talking
    /// to a real Vulkan instance, so collection/transition/ring-buffer
    /// tests can run without a GPU.
    #[derive(Default)]
    pub struct MockDevice {
        next: Cell<u64>,
        pub names: Mutex<HashMap<u64, String>>,
    }

    impl MockDevice {
        pub fn new() -> Self {
            MockDevice {
                next: Cell::new(1),
                names: Mutex::new(HashMap::new()),
            }
        }

        fn fresh(&self) -> u64 {
            let id = self.next.get();
            self.next.set(id + 1);
            id
        }
    }

    impl DeviceFacade for MockDevice {
        fn create_image(&self, _description: &ImageDescription, debug_name: &str) -> RawImage {
            let id = self.fresh();
            self.names.lock().unwrap().insert(id, debug_name.to_owned());
            RawImage {
                image: vk::Image::from_raw(id),
                view: vk::ImageView::from_raw(id),
            }
        }
        fn destroy_image(&self, raw: RawImage) {
            self.names.lock().unwrap().remove(&raw.image.as_raw());
        }

        fn create_buffer(&self, _description: &BufferDescription, debug_name: &str) -> RawBuffer {
            let id = self.fresh();
            self.names.lock().unwrap().insert(id, debug_name.to_owned());
            RawBuffer {
                buffer: vk::Buffer::from_raw(id),
            }
        }
        fn destroy_buffer(&self, raw: RawBuffer) {
            self.names.lock().unwrap().remove(&raw.buffer.as_raw());
        }

        fn create_texel_buffer(
            &self,
            _description: &TexelBufferDescription,
            debug_name: &str,
        ) -> RawTexelBuffer {
            let id = self.fresh();
            self.names.lock().unwrap().insert(id, debug_name.to_owned());
            RawTexelBuffer {
                buffer: vk::Buffer::from_raw(id),
                view: vk::BufferView::from_raw(id),
            }
        }
        fn destroy_texel_buffer(&self, raw: RawTexelBuffer) {
            self.names.lock().unwrap().remove(&raw.buffer.as_raw());
        }

        fn set_debug_name(&self, _object: vk::ObjectType, handle: u64, name: &str) {
            self.names.lock().unwrap().insert(handle, name.to_owned());
        }

        fn compile_shader_module(&self, request: ShaderCompileRequest<'_>) -> Option<CompiledShader> {
            if request.rel_path.is_empty() {
                return None;
            }
            // A minimal, instruction-less module: header only, bound = 1.
            let words = vec![0x0723_0203, 0x0001_0300, 0, 1, 0];
            let module = prosper_spirv::Module::from_words(words).ok()?;
            let reflection = ShaderReflection::from_module(&module, []).ok()?;
            self.names
                .lock()
                .unwrap()
                .insert(self.fresh(), request.debug_name.to_owned());
            Some(CompiledShader {
                module: vk::ShaderModule::from_raw(self.fresh()),
                reflection,
                source_files: std::iter::once(PathBuf::from(request.rel_path)).collect(),
            })
        }

        fn begin_graphics_commands(&self) -> vk::CommandBuffer {
            vk::CommandBuffer::from_raw(self.fresh())
        }

        fn end_graphics_commands(&self, _command_buffer: vk::CommandBuffer) {}
    }
}
