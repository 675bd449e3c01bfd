//! Compute pass abstraction.
//!
//! Grounded on `original_source/src/ComputePass.cpp`: a compute pipeline
//! plus the descriptor set layout and push constant range it needs are
//! all derived from the shader's own SPIR-V reflection rather than
//! hand-written by the caller. The pass owns one descriptor set layout —
//! its "storage set", always the last set in the pipeline layout, after
//! whatever externally-owned layouts the caller supplies (material sets,
//! a global scene set, and so on). `record` binds the pipeline, the
//! caller's external sets plus this frame's storage set, pushes
//! constants, and dispatches.

use std::collections::HashSet;
use std::ffi::CString;
use std::path::PathBuf;

use ash::vk;
use fxhash::FxHashMap;
use smallvec::SmallVec;

use prosper_spirv::{DescriptorWriteInfo, ShaderReflection};

use crate::descriptor_pool::DescriptorAllocator;
use crate::profiler::MAX_FRAMES_IN_FLIGHT;

/// Hard cap on dynamic offsets per `record` call, the minimum portable
/// driver limit (`maxDescriptorSetUniformBuffersDynamic` /
/// `maxDescriptorSetStorageBuffersDynamic` combined headroom).
pub const MAX_DYNAMIC_OFFSETS: usize = 8;

/// Rounds `work_items` up to the next multiple of `group_size`, the
/// dispatch count `vkCmdDispatch` needs since Vulkan only dispatches
/// whole workgroups.
pub fn dispatch_group_count(work_items: u32, group_size: u32) -> u32 {
    (work_items + group_size - 1) / group_size
}

/// Everything a recompile needs to produce the next shader module: the
/// resolved source path, a debug name, preprocessor defines (including the
/// compile-time group size), and the group size the new module was built
/// against.
pub struct CompiledComputeShader {
    pub module: vk::ShaderModule,
    pub reflection: ShaderReflection,
    pub source_files: HashSet<PathBuf>,
    pub group_size: (u32, u32, u32),
}

/// One frame-in-flight's worth of storage descriptor sets for a compute
/// pass, since a set bound by an in-flight command buffer can't be
/// overwritten until that frame's fence has signaled.
struct FrameDescriptors {
    sets: Vec<vk::DescriptorSet>,
}

pub struct ComputePass {
    shader_module: vk::ShaderModule,
    reflection: ShaderReflection,
    storage_set_index: u32,
    storage_stage_flags: vk::ShaderStageFlags,
    external_ds_layouts: Vec<vk::DescriptorSetLayout>,
    storage_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    group_size: (u32, u32, u32),
    push_constants_bytesize: u32,
    per_frame_record_limit: u32,
    frames: Vec<FrameDescriptors>,
    current_frame: usize,
    records_this_frame: u32,
    /// Pipeline variants keyed by their specialization-constant data,
    /// lazily built the first time each byte pattern is requested. The
    /// variant for an empty slice (no specialization) is built eagerly in
    /// `new` and used by `record`.
    variants: FxHashMap<Vec<u8>, vk::Pipeline>,
}

impl ComputePass {
    /// Builds the storage set's layout from reflection, the pipeline
    /// layout (external layouts followed by the storage set, push
    /// constant range sized from reflection), and the base pipeline, then
    /// pre-allocates `per_frame_record_limit` storage sets per frame in
    /// flight.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &ash::Device,
        allocator: &mut DescriptorAllocator,
        shader_module: vk::ShaderModule,
        reflection: ShaderReflection,
        group_size: (u32, u32, u32),
        storage_set_index: u32,
        storage_stage_flags: vk::ShaderStageFlags,
        external_ds_layouts: Vec<vk::DescriptorSetLayout>,
        per_frame_record_limit: u32,
    ) -> Self {
        assert_eq!(
            storage_set_index as usize,
            external_ds_layouts.len(),
            "the storage set must be the last set in the pipeline layout"
        );
        assert!(per_frame_record_limit >= 1);

        let (bindings, _flags) =
            reflection.create_descriptor_set_layout(storage_set_index, storage_stage_flags, &[], &[]);
        let storage_set_layout = unsafe {
            device
                .create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
                    None,
                )
                .expect("descriptor set layout creation should not fail")
        };

        let push_constants_bytesize = reflection.push_constants_bytesize();
        let push_ranges = if push_constants_bytesize > 0 {
            vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: push_constants_bytesize,
            }]
        } else {
            Vec::new()
        };

        let mut set_layouts = external_ds_layouts.clone();
        set_layouts.push(storage_set_layout);
        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::builder()
                        .set_layouts(&set_layouts)
                        .push_constant_ranges(&push_ranges),
                    None,
                )
                .expect("pipeline layout creation should not fail")
        };

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameDescriptors {
                sets: (0..per_frame_record_limit)
                    .map(|_| allocator.allocate(device, storage_set_layout))
                    .collect(),
            })
            .collect();

        let mut pass = ComputePass {
            shader_module,
            reflection,
            storage_set_index,
            storage_stage_flags,
            external_ds_layouts,
            storage_set_layout,
            pipeline_layout,
            group_size,
            push_constants_bytesize,
            per_frame_record_limit,
            frames,
            current_frame: 0,
            records_this_frame: 0,
            variants: FxHashMap::default(),
        };
        pass.pipeline_variant(device, &[]);
        pass
    }

    /// Looks up (or lazily builds) the compute pipeline specialized with
    /// `spec_data`, caching the result by its exact bytes.
    pub fn pipeline_variant(&mut self, device: &ash::Device, spec_data: &[u8]) -> vk::Pipeline {
        if let Some(&pipeline) = self.variants.get(spec_data) {
            return pipeline;
        }

        let map_entries: Vec<vk::SpecializationMapEntry> = self
            .reflection
            .specialization_constants()
            .iter()
            .map(|c| vk::SpecializationMapEntry {
                constant_id: c.constant_id,
                offset: c.offset,
                size: c.size as usize,
            })
            .collect();

        let spec_info = vk::SpecializationInfo::builder()
            .map_entries(&map_entries)
            .data(spec_data);
        let entry_point = CString::new("main").unwrap();
        let mut stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.shader_module)
            .name(&entry_point);
        if !map_entries.is_empty() {
            stage = stage.specialization_info(&spec_info);
        }
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(self.pipeline_layout);

        let pipeline = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .expect("compute pipeline creation should not fail")[0]
        };
        self.variants.insert(spec_data.to_vec(), pipeline);
        pipeline
    }

    fn default_pipeline(&self) -> vk::Pipeline {
        *self.variants.get(&[] as &[u8]).expect("the empty-specialization variant is built in new")
    }

    /// Resets the per-frame descriptor-set counter. Must be called
    /// exactly once per frame.
    pub fn start_frame(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        self.records_this_frame = 0;
    }

    /// Writes `infos` into this record's storage set (peeked, not yet
    /// consumed) and returns its handle for the caller to inspect if
    /// needed; `record` itself performs the actual bind.
    pub fn update_storage_set(&self, device: &ash::Device, infos: &[DescriptorWriteInfo]) -> vk::DescriptorSet {
        let set = self.peek_storage_set();
        let writes = self
            .reflection
            .generate_descriptor_writes(self.storage_set_index, set, infos);
        if !writes.is_empty() {
            unsafe {
                device.update_descriptor_sets(&writes, &[]);
            }
        }
        set
    }

    fn peek_storage_set(&self) -> vk::DescriptorSet {
        self.frames[self.current_frame].sets[self.records_this_frame as usize]
    }

    fn consume_storage_set(&mut self) -> vk::DescriptorSet {
        assert!(
            self.records_this_frame < self.per_frame_record_limit,
            "compute pass recorded more than per_frame_record_limit ({}) times this frame",
            self.per_frame_record_limit
        );
        let set = self.peek_storage_set();
        self.records_this_frame += 1;
        set
    }

    fn bind_sets_and_pipeline(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        assert_eq!(
            descriptor_sets.len(),
            self.external_ds_layouts.len(),
            "one external descriptor set per external_ds_layouts entry"
        );
        assert!(
            dynamic_offsets.len() <= MAX_DYNAMIC_OFFSETS,
            "dynamic_offsets exceeds the portable driver limit of {MAX_DYNAMIC_OFFSETS}"
        );

        let storage_set = self.consume_storage_set();
        let mut sets: SmallVec<[vk::DescriptorSet; 4]> = SmallVec::from_slice(descriptor_sets);
        sets.push(storage_set);

        unsafe {
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &sets,
                dynamic_offsets,
            );
        }
    }

    /// Dispatches enough workgroups to cover `group_extent` work items on
    /// each axis. No push constants are pushed — use
    /// `record_with_push_constants` for a shader whose reflection reports
    /// a non-empty push-constant block.
    pub fn record(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        group_extent: (u32, u32, u32),
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        assert_eq!(
            self.push_constants_bytesize, 0,
            "shader expects push constants; use record_with_push_constants"
        );
        let pipeline = self.default_pipeline();
        self.bind_sets_and_pipeline(device, command_buffer, pipeline, descriptor_sets, dynamic_offsets);
        unsafe {
            device.cmd_dispatch(
                command_buffer,
                dispatch_group_count(group_extent.0, self.group_size.0),
                dispatch_group_count(group_extent.1, self.group_size.1),
                dispatch_group_count(group_extent.2, self.group_size.2),
            );
        }
    }

    /// Dispatches with the workgroup count read from `indirect_buffer` at
    /// `offset`, matching `vkCmdDispatchIndirect`'s `VkDispatchIndirectCommand`
    /// layout.
    pub fn record_indirect(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        indirect_buffer: vk::Buffer,
        offset: vk::DeviceSize,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        assert_eq!(
            self.push_constants_bytesize, 0,
            "shader expects push constants; use record_with_push_constants"
        );
        let pipeline = self.default_pipeline();
        self.bind_sets_and_pipeline(device, command_buffer, pipeline, descriptor_sets, dynamic_offsets);
        unsafe {
            device.cmd_dispatch_indirect(command_buffer, indirect_buffer, offset);
        }
    }

    /// Pushes `push_constants` (must match the reflected push-constant
    /// bytesize exactly) then dispatches enough workgroups to cover
    /// `group_extent` work items on each axis.
    pub fn record_with_push_constants(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        push_constants: &[u8],
        group_extent: (u32, u32, u32),
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        assert_eq!(
            push_constants.len() as u32,
            self.push_constants_bytesize,
            "push constant payload size does not match shader reflection"
        );
        let pipeline = self.default_pipeline();
        self.bind_sets_and_pipeline(device, command_buffer, pipeline, descriptor_sets, dynamic_offsets);
        unsafe {
            device.cmd_push_constants(
                command_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                push_constants,
            );
            device.cmd_dispatch(
                command_buffer,
                dispatch_group_count(group_extent.0, self.group_size.0),
                dispatch_group_count(group_extent.1, self.group_size.1),
                dispatch_group_count(group_extent.2, self.group_size.2),
            );
        }
    }

    pub fn bindings(&self) -> &[prosper_spirv::DescriptorSetMetadata] {
        self.reflection.descriptor_set(self.storage_set_index)
    }

    /// Rebuilds the pass from a fresh compile if any of `changed_files`
    /// intersects the current shader's recorded source-file set.
    /// Short-circuits to `false` without touching any GPU state if
    /// nothing affecting this pass changed. On success the old pipeline
    /// variants, pipeline layout and storage set layout are destroyed and
    /// replaced; `external_ds_layouts` lets the caller hand in layouts
    /// that themselves changed shape across the recompile.
    pub fn recompile_shader(
        &mut self,
        device: &ash::Device,
        allocator: &mut DescriptorAllocator,
        changed_files: &HashSet<PathBuf>,
        mut compile: impl FnMut() -> Option<CompiledComputeShader>,
        external_ds_layouts: Vec<vk::DescriptorSetLayout>,
    ) -> bool {
        if !self.reflection.affected(changed_files) {
            return false;
        }

        let Some(compiled) = compile() else {
            log::warn!("shader recompile failed; keeping the previous pipeline");
            return false;
        };

        let (bindings, _flags) = compiled.reflection.create_descriptor_set_layout(
            self.storage_set_index,
            self.storage_stage_flags,
            &[],
            &[],
        );
        let new_storage_set_layout = unsafe {
            device
                .create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
                    None,
                )
                .expect("descriptor set layout creation should not fail")
        };

        let push_constants_bytesize = compiled.reflection.push_constants_bytesize();
        let push_ranges = if push_constants_bytesize > 0 {
            vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: push_constants_bytesize,
            }]
        } else {
            Vec::new()
        };

        let mut set_layouts = external_ds_layouts.clone();
        set_layouts.push(new_storage_set_layout);
        let new_pipeline_layout = unsafe {
            device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::builder()
                        .set_layouts(&set_layouts)
                        .push_constant_ranges(&push_ranges),
                    None,
                )
                .expect("pipeline layout creation should not fail")
        };

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameDescriptors {
                sets: (0..self.per_frame_record_limit)
                    .map(|_| allocator.allocate(device, new_storage_set_layout))
                    .collect(),
            })
            .collect();

        self.destroy_pipeline_state(device);

        self.shader_module = compiled.module;
        self.reflection = compiled.reflection;
        self.group_size = compiled.group_size;
        self.push_constants_bytesize = push_constants_bytesize;
        self.external_ds_layouts = external_ds_layouts;
        self.storage_set_layout = new_storage_set_layout;
        self.pipeline_layout = new_pipeline_layout;
        self.frames = frames;
        self.current_frame = 0;
        self.records_this_frame = 0;
        self.variants = FxHashMap::default();
        self.pipeline_variant(device, &[]);
        true
    }

    fn destroy_pipeline_state(&mut self, device: &ash::Device) {
        unsafe {
            for &pipeline in self.variants.values() {
                device.destroy_pipeline(pipeline, None);
            }
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.storage_set_layout, None);
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        self.destroy_pipeline_state(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_group_count_rounds_up() {
        assert_eq!(dispatch_group_count(256, 256), 1);
        assert_eq!(dispatch_group_count(257, 256), 2);
        assert_eq!(dispatch_group_count(0, 256), 0);
        assert_eq!(dispatch_group_count(1, 64), 1);
    }
}
