//! Two-pass SPIR-V reflection: push-constant sizing, descriptor-set
//! metadata, and the specialization-constant map.
//!
//! Pass 1 builds a sparse, result-id indexed table of every type,
//! constant, variable and specialization constant the module declares.
//! Pass 2 folds `OpDecorate`/`OpMemberDecorate`/`OpName` back onto that
//! table. Grounded on `original_source/src/ShaderReflection.cpp`; the
//! table-of-entries shape mirrors `autograph-spirv::ast::parse_types`
//! without its arena/lifetime bookkeeping, since nothing here outlives a
//! single `ShaderReflection::from_module` call.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use ash::vk;
use fxhash::FxHashMap;
use spirv_headers::{Decoration, Dim, Op, StorageClass};

use crate::module::{parse_literal_string, Module};
use crate::ReflectError;

#[derive(Debug, Clone)]
struct StructMember {
    type_id: u32,
    offset: Option<u32>,
    matrix_stride: Option<u32>,
}

#[derive(Debug, Clone)]
enum TypeEntry {
    Bool,
    Int { width: u32 },
    Float { width: u32 },
    Vector { component_type: u32, count: u32 },
    Matrix { column_count: u32 },
    Image { dim: Dim, sampled: u32 },
    Sampler,
    SampledImage { image_type: u32 },
    Array { element_type: u32, length: u32 },
    RuntimeArray { element_type: u32 },
    Struct { members: Vec<StructMember> },
    Pointer { storage_class: StorageClass, pointee_type: u32 },
    AccelerationStructure,
}

#[derive(Debug, Clone)]
struct VariableEntry {
    pointer_type_id: u32,
    storage_class: StorageClass,
}

#[derive(Debug, Clone, Copy)]
enum SpecConstantKind {
    Bool32,
    Scalar32,
}

/// Vulkan descriptor type, restricted to what shader reflection can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    StorageBufferDynamic,
    AccelerationStructure,
}

impl DescriptorType {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
            DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            DescriptorType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

/// One piece of resource info to bind at a descriptor-set slot, fed
/// positionally to `ShaderReflection::generate_descriptor_writes`. A span
/// variant left empty means "leave this binding unbound" and emits no
/// write at all.
pub enum DescriptorWriteInfo {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
    TexelBufferView(vk::BufferView),
    ImageSpan(Vec<vk::DescriptorImageInfo>),
    BufferSpan(Vec<vk::DescriptorBufferInfo>),
}

/// One binding's worth of descriptor-set metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetMetadata {
    pub name: String,
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    /// `0` marks a runtime-sized array (including a flexible array member
    /// inside the bound struct — see `TESTABLE PROPERTIES` S3).
    pub descriptor_count: u32,
}

/// One specialization constant's slot in the pipeline's spec-info buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecializationConstant {
    pub constant_id: u32,
    pub offset: u32,
    pub size: u32,
}

/// The complete reflection of a single compiled SPIR-V shader stage.
#[derive(Debug, Clone)]
pub struct ShaderReflection {
    push_constants_bytesize: u32,
    sets: HashMap<u32, Vec<DescriptorSetMetadata>>,
    specialization_constants: Vec<SpecializationConstant>,
    source_files: HashSet<PathBuf>,
}

impl ShaderReflection {
    pub fn from_module(
        module: &Module,
        source_files: impl IntoIterator<Item = PathBuf>,
    ) -> Result<ShaderReflection, ReflectError> {
        let table = Pass1::run(module)?;
        let folded = fold_decorations(module, table);

        let push_constants_bytesize = folded.push_constant_struct.map_or(0, |id| {
            type_size(&folded.types, id, None)
        });

        let sets = descriptor_sets(&folded);
        let specialization_constants = specialization_map(&folded)?;

        Ok(ShaderReflection {
            push_constants_bytesize,
            sets,
            specialization_constants,
            source_files: source_files.into_iter().collect(),
        })
    }

    pub fn push_constants_bytesize(&self) -> u32 {
        self.push_constants_bytesize
    }

    pub fn descriptor_set(&self, set_index: u32) -> &[DescriptorSetMetadata] {
        self.sets.get(&set_index).map_or(&[], |v| v.as_slice())
    }

    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.specialization_constants
    }

    /// True iff this shader's source was among the files the compiler
    /// reports having touched — drives `ComputePass::recompile_shader`'s
    /// short-circuit.
    pub fn affected(&self, changed_files: &HashSet<PathBuf>) -> bool {
        self.source_files.iter().any(|f| changed_files.contains(f))
    }

    /// Builds the layout bindings for `set_index`, substituting
    /// `dynamic_counts` (in binding order) for each runtime-sized binding
    /// reflection reported with `descriptor_count == 0`. `binding_flags`,
    /// if non-empty, must have one entry per binding in the set.
    pub fn create_descriptor_set_layout(
        &self,
        set_index: u32,
        stage_flags: vk::ShaderStageFlags,
        dynamic_counts: &[u32],
        binding_flags: &[vk::DescriptorBindingFlags],
    ) -> (Vec<vk::DescriptorSetLayoutBinding>, Vec<vk::DescriptorBindingFlags>) {
        let metadata = self.descriptor_set(set_index);
        assert!(
            binding_flags.is_empty() || binding_flags.len() == metadata.len(),
            "binding_flags must be empty or have one entry per binding"
        );

        let mut dynamic_counts = dynamic_counts.iter();
        let bindings = metadata
            .iter()
            .map(|meta| {
                let count = if meta.descriptor_count == 0 {
                    *dynamic_counts
                        .next()
                        .expect("dynamic_counts needs one entry per runtime-sized binding")
                } else {
                    meta.descriptor_count
                };
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(meta.binding)
                    .descriptor_type(meta.descriptor_type.to_vk())
                    .descriptor_count(count)
                    .stage_flags(stage_flags)
                    .build()
            })
            .collect();

        let flags = if binding_flags.is_empty() {
            vec![vk::DescriptorBindingFlags::empty(); metadata.len()]
        } else {
            binding_flags.to_vec()
        };

        (bindings, flags)
    }

    /// Pairs each binding of `set_index`, in order, with an info variant
    /// from `infos` and produces the corresponding `WriteDescriptorSet`s.
    /// A binding paired with an empty span is skipped entirely, so callers
    /// can explicitly leave a slot unbound.
    pub fn generate_descriptor_writes(
        &self,
        set_index: u32,
        set_handle: vk::DescriptorSet,
        infos: &[DescriptorWriteInfo],
    ) -> Vec<vk::WriteDescriptorSet> {
        let metadata = self.descriptor_set(set_index);
        assert_eq!(
            metadata.len(),
            infos.len(),
            "generate_descriptor_writes needs exactly one info per binding"
        );

        let mut writes = Vec::with_capacity(metadata.len());
        for (meta, info) in metadata.iter().zip(infos) {
            let descriptor_type = meta.descriptor_type.to_vk();
            let write = match info {
                DescriptorWriteInfo::Image(info) => vk::WriteDescriptorSet::builder()
                    .dst_set(set_handle)
                    .dst_binding(meta.binding)
                    .descriptor_type(descriptor_type)
                    .image_info(std::slice::from_ref(info))
                    .build(),
                DescriptorWriteInfo::Buffer(info) => vk::WriteDescriptorSet::builder()
                    .dst_set(set_handle)
                    .dst_binding(meta.binding)
                    .descriptor_type(descriptor_type)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
                DescriptorWriteInfo::TexelBufferView(view) => vk::WriteDescriptorSet::builder()
                    .dst_set(set_handle)
                    .dst_binding(meta.binding)
                    .descriptor_type(descriptor_type)
                    .texel_buffer_view(std::slice::from_ref(view))
                    .build(),
                DescriptorWriteInfo::ImageSpan(span) => {
                    if span.is_empty() {
                        continue;
                    }
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set_handle)
                        .dst_binding(meta.binding)
                        .descriptor_type(descriptor_type)
                        .image_info(span)
                        .build()
                }
                DescriptorWriteInfo::BufferSpan(span) => {
                    if span.is_empty() {
                        continue;
                    }
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set_handle)
                        .dst_binding(meta.binding)
                        .descriptor_type(descriptor_type)
                        .buffer_info(span)
                        .build()
                }
            };
            writes.push(write);
        }
        writes
    }
}

// ---------------------------------------------------------------------
// Pass 1: build the sparse id -> entry table.
// ---------------------------------------------------------------------

struct Tables {
    types: FxHashMap<u32, TypeEntry>,
    constants_u32: FxHashMap<u32, u32>,
    variables: FxHashMap<u32, VariableEntry>,
    spec_constants: FxHashMap<u32, (SpecConstantKind, u32 /* result type id */)>,
    push_constant_struct: Option<u32>,
}

struct Pass1;

impl Pass1 {
    fn run(module: &Module) -> Result<Tables, ReflectError> {
        let mut types = FxHashMap::default();
        let mut constants_u32 = FxHashMap::default();
        let mut variables = FxHashMap::default();
        let mut spec_constants = FxHashMap::default();
        let mut push_constant_struct = None;

        for inst in module.instructions() {
            let op = Op::from_u32(inst.opcode as u32);
            let ops = inst.operands;
            match op {
                Some(Op::TypeVoid) => {}
                Some(Op::TypeBool) => {
                    types.insert(ops[0], TypeEntry::Bool);
                }
                Some(Op::TypeInt) => {
                    let width = ops.get(1).copied().unwrap_or(32);
                    types.insert(ops[0], TypeEntry::Int { width });
                }
                Some(Op::TypeFloat) => {
                    let width = ops.get(1).copied().unwrap_or(32);
                    types.insert(ops[0], TypeEntry::Float { width });
                }
                Some(Op::TypeVector) => {
                    types.insert(
                        ops[0],
                        TypeEntry::Vector {
                            component_type: ops[1],
                            count: ops[2],
                        },
                    );
                }
                Some(Op::TypeMatrix) => {
                    types.insert(
                        ops[0],
                        TypeEntry::Matrix {
                            column_count: ops[2],
                        },
                    );
                }
                Some(Op::TypeImage) => {
                    let dim = Dim::from_u32(ops[2]).unwrap_or(Dim::Dim2D);
                    let sampled = ops[6];
                    types.insert(ops[0], TypeEntry::Image { dim, sampled });
                }
                Some(Op::TypeSampler) => {
                    types.insert(ops[0], TypeEntry::Sampler);
                }
                Some(Op::TypeSampledImage) => {
                    types.insert(
                        ops[0],
                        TypeEntry::SampledImage {
                            image_type: ops[1],
                        },
                    );
                }
                Some(Op::TypeArray) => {
                    let length = *constants_u32.get(&ops[2]).unwrap_or(&0);
                    types.insert(
                        ops[0],
                        TypeEntry::Array {
                            element_type: ops[1],
                            length,
                        },
                    );
                }
                Some(Op::TypeRuntimeArray) => {
                    types.insert(
                        ops[0],
                        TypeEntry::RuntimeArray {
                            element_type: ops[1],
                        },
                    );
                }
                Some(Op::TypeStruct) => {
                    let members = ops[1..]
                        .iter()
                        .map(|&type_id| StructMember {
                            type_id,
                            offset: None,
                            matrix_stride: None,
                        })
                        .collect();
                    types.insert(ops[0], TypeEntry::Struct { members });
                }
                Some(Op::TypePointer) => {
                    let storage_class = StorageClass::from_u32(ops[1]).unwrap_or(StorageClass::Function);
                    if storage_class == StorageClass::PushConstant {
                        push_constant_struct = Some(ops[2]);
                    }
                    types.insert(
                        ops[0],
                        TypeEntry::Pointer {
                            storage_class,
                            pointee_type: ops[2],
                        },
                    );
                }
                // OpTypeAccelerationStructureKHR = 5341. Matched by raw
                // opcode rather than through `spirv_headers::Op` since
                // ray-tracing opcodes live outside that crate's core
                // enum.
                _ if inst.opcode as u32 == 5341 => {
                    types.insert(ops[0], TypeEntry::AccelerationStructure);
                }
                Some(Op::Constant) => {
                    // ops = [result_type, result_id, value...]
                    constants_u32.insert(ops[1], ops[2]);
                }
                Some(Op::Variable) => {
                    // ops = [result_type(pointer), result_id, storage_class, ...]
                    let storage_class = StorageClass::from_u32(ops[2]).unwrap_or(StorageClass::Function);
                    variables.insert(
                        ops[1],
                        VariableEntry {
                            pointer_type_id: ops[0],
                            storage_class,
                        },
                    );
                }
                Some(Op::SpecConstantTrue) | Some(Op::SpecConstantFalse) => {
                    spec_constants.insert(ops[1], (SpecConstantKind::Bool32, ops[0]));
                }
                Some(Op::SpecConstant) => {
                    spec_constants.insert(ops[1], (SpecConstantKind::Scalar32, ops[0]));
                }
                Some(Op::SpecConstantComposite) => {
                    return Err(ReflectError::CompositeSpecConstant);
                }
                _ => {}
            }
        }

        Ok(Tables {
            types,
            constants_u32,
            variables,
            spec_constants,
            push_constant_struct,
        })
    }
}

// ---------------------------------------------------------------------
// Pass 2: fold decorations and names back onto the table.
// ---------------------------------------------------------------------

struct Folded {
    types: FxHashMap<u32, TypeEntry>,
    variables: FxHashMap<u32, VariableEntry>,
    spec_constants: FxHashMap<u32, (SpecConstantKind, u32)>,
    push_constant_struct: Option<u32>,
    names: FxHashMap<u32, String>,
    descriptor_sets: FxHashMap<u32, u32>,
    bindings: FxHashMap<u32, u32>,
    spec_ids: FxHashMap<u32, u32>,
}

fn fold_decorations(module: &Module, tables: Tables) -> Folded {
    let Tables {
        mut types,
        variables,
        spec_constants,
        push_constant_struct,
        ..
    } = tables;

    let mut names = FxHashMap::default();
    let mut descriptor_sets = FxHashMap::default();
    let mut bindings = FxHashMap::default();
    let mut spec_ids = FxHashMap::default();

    for inst in module.instructions() {
        let op = Op::from_u32(inst.opcode as u32);
        let ops = inst.operands;
        match op {
            Some(Op::Name) => {
                let (name, _) = parse_literal_string(&ops[1..]);
                names.insert(ops[0], name);
            }
            Some(Op::Decorate) => {
                let target = ops[0];
                let deco = Decoration::from_u32(ops[1]);
                match deco {
                    Some(Decoration::DescriptorSet) => {
                        descriptor_sets.insert(target, ops[2]);
                    }
                    Some(Decoration::Binding) => {
                        bindings.insert(target, ops[2]);
                    }
                    Some(Decoration::SpecId) => {
                        spec_ids.insert(target, ops[2]);
                    }
                    _ => {}
                }
            }
            Some(Op::MemberDecorate) => {
                let struct_id = ops[0];
                let member = ops[1] as usize;
                let deco = Decoration::from_u32(ops[2]);
                if let Some(TypeEntry::Struct { members }) = types.get_mut(&struct_id) {
                    if let Some(m) = members.get_mut(member) {
                        match deco {
                            Some(Decoration::Offset) => m.offset = Some(ops[3]),
                            Some(Decoration::MatrixStride) => m.matrix_stride = Some(ops[3]),
                            _ => {}
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Folded {
        types,
        variables,
        spec_constants,
        push_constant_struct,
        names,
        descriptor_sets,
        bindings,
        spec_ids,
    }
}

// ---------------------------------------------------------------------
// Derived services.
// ---------------------------------------------------------------------

fn type_size(types: &FxHashMap<u32, TypeEntry>, type_id: u32, matrix_stride_hint: Option<u32>) -> u32 {
    match &types[&type_id] {
        TypeEntry::Bool => 4,
        TypeEntry::Int { width } | TypeEntry::Float { width } => width / 8,
        TypeEntry::Vector { component_type, count } => type_size(types, *component_type, None) * count,
        TypeEntry::Matrix { column_count } => {
            let stride = matrix_stride_hint.expect("matrix member is missing a MatrixStride decoration");
            stride * column_count
        }
        TypeEntry::Array { element_type, length } => type_size(types, *element_type, None) * length.max(&1),
        TypeEntry::Struct { members } => {
            let last = members.last().expect("push-constant struct has no members");
            last.offset.expect("struct member is missing an Offset decoration")
                + type_size(types, last.type_id, last.matrix_stride)
        }
        other => panic!("unsupported type in a sized block: {other:?}"),
    }
}

fn array_wrapper(types: &FxHashMap<u32, TypeEntry>, type_id: u32) -> (u32, u32) {
    match &types[&type_id] {
        TypeEntry::RuntimeArray { element_type } => (*element_type, 0),
        TypeEntry::Array { element_type, length } => (*element_type, *length),
        _ => (type_id, 1),
    }
}

fn descriptor_type_for_storage_buffer(types: &FxHashMap<u32, TypeEntry>, names: &FxHashMap<u32, String>, struct_id: u32) -> DescriptorType {
    let is_dynamic = names.get(&struct_id).is_some_and(|n| n.ends_with("DSB"));
    if is_dynamic {
        DescriptorType::StorageBufferDynamic
    } else {
        DescriptorType::StorageBuffer
    }
}

fn has_flexible_array_member(types: &FxHashMap<u32, TypeEntry>, struct_id: u32) -> bool {
    match types.get(&struct_id) {
        Some(TypeEntry::Struct { members }) => members
            .last()
            .is_some_and(|m| matches!(types.get(&m.type_id), Some(TypeEntry::RuntimeArray { .. }))),
        _ => false,
    }
}

fn descriptor_type_for_opaque(types: &FxHashMap<u32, TypeEntry>, type_id: u32) -> DescriptorType {
    match &types[&type_id] {
        TypeEntry::Sampler => DescriptorType::Sampler,
        TypeEntry::SampledImage { .. } => DescriptorType::CombinedImageSampler,
        TypeEntry::Image { dim, sampled } => {
            if *dim == Dim::DimBuffer {
                // Texel buffers are only ever used as storage here,
                // regardless of the `sampled` bit.
                DescriptorType::StorageTexelBuffer
            } else if *sampled == 2 {
                DescriptorType::StorageImage
            } else {
                DescriptorType::SampledImage
            }
        }
        TypeEntry::AccelerationStructure => DescriptorType::AccelerationStructure,
        other => panic!("unsupported UniformConstant pointee type: {other:?}"),
    }
}

fn descriptor_sets(folded: &Folded) -> HashMap<u32, Vec<DescriptorSetMetadata>> {
    let mut by_set: HashMap<u32, Vec<DescriptorSetMetadata>> = HashMap::new();

    for (&var_id, var) in &folded.variables {
        let Some(&set_index) = folded.descriptor_sets.get(&var_id) else {
            continue;
        };
        let Some(&binding) = folded.bindings.get(&var_id) else {
            continue;
        };
        let TypeEntry::Pointer { pointee_type, .. } = &folded.types[&var.pointer_type_id] else {
            continue;
        };

        let (base_type, mut count) = array_wrapper(&folded.types, *pointee_type);
        let name = folded
            .names
            .get(&base_type)
            .or_else(|| folded.names.get(&var_id))
            .cloned()
            .unwrap_or_default();

        let descriptor_type = match var.storage_class {
            StorageClass::StorageBuffer => {
                if count == 1 && has_flexible_array_member(&folded.types, base_type) {
                    count = 0;
                }
                descriptor_type_for_storage_buffer(&folded.types, &folded.names, base_type)
            }
            StorageClass::Uniform => DescriptorType::UniformBuffer,
            StorageClass::UniformConstant => descriptor_type_for_opaque(&folded.types, base_type),
            _ => continue,
        };

        by_set.entry(set_index).or_default().push(DescriptorSetMetadata {
            name,
            binding,
            descriptor_type,
            descriptor_count: count,
        });
    }

    for metadata in by_set.values_mut() {
        metadata.sort_by_key(|m| m.binding);
        collapse_aliased_storage_buffers(metadata);
    }

    by_set
}

/// Merges adjacent entries sharing a binding number, provided both sides
/// are storage buffers — pairwise only, per the Open Question in
/// `SPEC_FULL.md` §9.
fn collapse_aliased_storage_buffers(metadata: &mut Vec<DescriptorSetMetadata>) {
    let mut i = 0;
    while i + 1 < metadata.len() {
        let same_binding = metadata[i].binding == metadata[i + 1].binding;
        let both_storage = matches!(
            metadata[i].descriptor_type,
            DescriptorType::StorageBuffer | DescriptorType::StorageBufferDynamic
        ) && matches!(
            metadata[i + 1].descriptor_type,
            DescriptorType::StorageBuffer | DescriptorType::StorageBufferDynamic
        );
        if same_binding && both_storage {
            let second = metadata.remove(i + 1);
            metadata[i].name = format!("{}|{}", metadata[i].name, second.name);
        } else {
            i += 1;
        }
    }
}

fn specialization_map(folded: &Folded) -> Result<Vec<SpecializationConstant>, ReflectError> {
    let mut entries: Vec<(u32, u32)> = Vec::new(); // (spec_id, size)
    for (&const_id, &(kind, result_type)) in &folded.spec_constants {
        let Some(&spec_id) = folded.spec_ids.get(&const_id) else {
            continue;
        };
        let size = match kind {
            SpecConstantKind::Bool32 => 4,
            SpecConstantKind::Scalar32 => type_size(&folded.types, result_type, None),
        };
        entries.push((spec_id, size));
    }
    entries.sort_by_key(|&(spec_id, _)| spec_id);

    for (expected, &(spec_id, _)) in entries.iter().enumerate() {
        if spec_id != expected as u32 {
            return Err(ReflectError::SpecConstantIdGap(expected as u32));
        }
    }

    let mut offset = 0u32;
    let mut out = Vec::with_capacity(entries.len());
    for (spec_id, size) in entries {
        if offset % size != 0 {
            return Err(ReflectError::SpecConstantMisaligned {
                constant_id: spec_id,
                offset,
                size,
            });
        }
        out.push(SpecializationConstant {
            constant_id: spec_id,
            offset,
            size,
        });
        offset += size;
    }
    Ok(out)
}

/// Helper used by tests: resolve a source file path against the recorded
/// set without requiring an owned `Path`.
pub fn path_matches(set: &HashSet<PathBuf>, path: &Path) -> bool {
    set.contains(path)
}
