//! Reflection tests built from hand-assembled SPIR-V word streams.
//!
//! No `glslc`/`shaderc` invocation here — each test writes just enough of
//! the binary format to exercise one reflection rule, using the opcode and
//! decoration numbers from the SPIR-V specification directly rather than
//! trusting a particular enum's discriminant layout.

use ash::vk;
use ash::vk::Handle as _;

use prosper_spirv::{DescriptorType, DescriptorWriteInfo, Module, ReflectError, ShaderReflection};

const OP_NAME: u32 = 5;
const OP_TYPE_INT: u32 = 21;
const OP_TYPE_FLOAT: u32 = 22;
const OP_TYPE_VECTOR: u32 = 23;
const OP_TYPE_MATRIX: u32 = 24;
const OP_TYPE_RUNTIME_ARRAY: u32 = 29;
const OP_TYPE_STRUCT: u32 = 30;
const OP_TYPE_POINTER: u32 = 32;
const OP_VARIABLE: u32 = 59;
const OP_DECORATE: u32 = 71;
const OP_MEMBER_DECORATE: u32 = 72;
const OP_SPEC_CONSTANT: u32 = 50;

const DECORATION_SPEC_ID: u32 = 1;
const DECORATION_MATRIX_STRIDE: u32 = 7;
const DECORATION_OFFSET: u32 = 35;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;

const STORAGE_CLASS_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_CLASS_PUSH_CONSTANT: u32 = 9;
const STORAGE_CLASS_STORAGE_BUFFER: u32 = 12;

struct Builder {
    words: Vec<u32>,
    next_id: u32,
}

impl Builder {
    fn new() -> Self {
        Builder {
            // magic, version 1.3, generator, bound placeholder, schema
            words: vec![0x0723_0203, 0x0001_0300, 0, 0, 0],
            next_id: 1,
        }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn inst(&mut self, opcode: u32, operands: &[u32]) {
        let word_count = (operands.len() + 1) as u32;
        self.words.push((word_count << 16) | opcode);
        self.words.extend_from_slice(operands);
    }

    fn name(&mut self, target: u32, text: &str) {
        let mut operands = vec![target];
        let bytes = text.as_bytes();
        for chunk in bytes.chunks(4) {
            let mut word = 0u32;
            for (i, &b) in chunk.iter().enumerate() {
                word |= (b as u32) << (8 * i);
            }
            operands.push(word);
        }
        if bytes.len() % 4 == 0 {
            operands.push(0);
        }
        self.inst(OP_NAME, &operands);
    }

    fn finish(mut self) -> Module {
        self.words[3] = self.next_id;
        Module::from_words(self.words).expect("hand-built module should decode")
    }
}

#[test]
fn rejects_invalid_magic() {
    let words = vec![0xdead_beef, 0, 0, 1, 0];
    let err = Module::from_words(words).unwrap_err();
    assert!(matches!(err, ReflectError::InvalidMagic));
}

#[test]
fn rejects_truncated_header() {
    let words = vec![0x0723_0203, 0, 0];
    let err = Module::from_words(words).unwrap_err();
    assert!(matches!(err, ReflectError::TruncatedHeader));
}

#[test]
fn push_constant_size_accounts_for_matrix_stride() {
    let mut b = Builder::new();

    let float_ty = b.fresh_id();
    b.inst(OP_TYPE_FLOAT, &[float_ty]);
    let vec3_ty = b.fresh_id();
    b.inst(OP_TYPE_VECTOR, &[vec3_ty, float_ty, 3]);
    let vec4_ty = b.fresh_id();
    b.inst(OP_TYPE_VECTOR, &[vec4_ty, float_ty, 4]);
    let mat4_ty = b.fresh_id();
    b.inst(OP_TYPE_MATRIX, &[mat4_ty, vec4_ty, 4]);

    let struct_ty = b.fresh_id();
    b.inst(OP_TYPE_STRUCT, &[struct_ty, vec3_ty, float_ty, mat4_ty]);
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 0, DECORATION_OFFSET, 0]);
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 1, DECORATION_OFFSET, 12]);
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 2, DECORATION_OFFSET, 16]);
    b.inst(
        OP_MEMBER_DECORATE,
        &[struct_ty, 2, DECORATION_MATRIX_STRIDE, 16],
    );

    let ptr_ty = b.fresh_id();
    b.inst(
        OP_TYPE_POINTER,
        &[ptr_ty, STORAGE_CLASS_PUSH_CONSTANT, struct_ty],
    );

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();
    assert_eq!(reflection.push_constants_bytesize(), 80);
}

#[test]
fn specialization_constants_pack_by_declared_size() {
    let mut b = Builder::new();

    let int_ty = b.fresh_id();
    b.inst(OP_TYPE_INT, &[int_ty, 32, 1]);

    for spec_id in 0..3u32 {
        let const_id = b.fresh_id();
        b.inst(OP_SPEC_CONSTANT, &[int_ty, const_id, 0]);
        b.inst(OP_DECORATE, &[const_id, DECORATION_SPEC_ID, spec_id]);
    }

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();
    let specs = reflection.specialization_constants();
    assert_eq!(specs.len(), 3);
    let mut offsets: Vec<u32> = specs.iter().map(|s| s.offset).collect();
    offsets.sort();
    assert_eq!(offsets, vec![0, 4, 8]);
}

#[test]
fn misaligned_specialization_constant_is_rejected() {
    let mut b = Builder::new();

    let int_ty = b.fresh_id();
    b.inst(OP_TYPE_INT, &[int_ty, 32, 1]);
    let double_ty = b.fresh_id();
    b.inst(OP_TYPE_FLOAT, &[double_ty, 64]);

    let first = b.fresh_id();
    b.inst(OP_SPEC_CONSTANT, &[int_ty, first, 0]);
    b.inst(OP_DECORATE, &[first, DECORATION_SPEC_ID, 0]);

    let second = b.fresh_id();
    b.inst(OP_SPEC_CONSTANT, &[double_ty, second, 0]);
    b.inst(OP_DECORATE, &[second, DECORATION_SPEC_ID, 1]);

    let module = b.finish();
    let err = ShaderReflection::from_module(&module, []).unwrap_err();
    assert!(matches!(err, ReflectError::SpecConstantMisaligned { .. }));
}

#[test]
fn runtime_array_storage_buffer_reports_zero_descriptor_count() {
    let mut b = Builder::new();

    let uint_ty = b.fresh_id();
    b.inst(OP_TYPE_INT, &[uint_ty, 32, 0]);
    let runtime_array_ty = b.fresh_id();
    b.inst(OP_TYPE_RUNTIME_ARRAY, &[runtime_array_ty, uint_ty]);

    let struct_ty = b.fresh_id();
    b.inst(OP_TYPE_STRUCT, &[struct_ty, runtime_array_ty]);
    b.name(struct_ty, "RuntimeArrayDSB");
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 0, DECORATION_OFFSET, 0]);

    let ptr_ty = b.fresh_id();
    b.inst(
        OP_TYPE_POINTER,
        &[ptr_ty, STORAGE_CLASS_STORAGE_BUFFER, struct_ty],
    );
    let var_id = b.fresh_id();
    b.inst(
        OP_VARIABLE,
        &[ptr_ty, var_id, STORAGE_CLASS_STORAGE_BUFFER],
    );
    b.inst(OP_DECORATE, &[var_id, DECORATION_DESCRIPTOR_SET, 0]);
    b.inst(OP_DECORATE, &[var_id, DECORATION_BINDING, 3]);

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();
    let set0 = reflection.descriptor_set(0);
    assert_eq!(set0.len(), 1);
    assert_eq!(set0[0].binding, 3);
    assert_eq!(set0[0].descriptor_type, DescriptorType::StorageBufferDynamic);
    assert_eq!(set0[0].descriptor_count, 0);
}

#[test]
fn composite_specialization_constants_are_rejected() {
    let mut b = Builder::new();
    let int_ty = b.fresh_id();
    b.inst(OP_TYPE_INT, &[int_ty, 32, 1]);
    let vec_ty = b.fresh_id();
    b.inst(OP_TYPE_VECTOR, &[vec_ty, int_ty, 2]);
    let composite_id = b.fresh_id();
    // OpSpecConstantComposite = 51
    b.inst(51, &[vec_ty, composite_id, int_ty, int_ty]);

    let module = b.finish();
    let err = ShaderReflection::from_module(&module, []).unwrap_err();
    assert!(matches!(err, ReflectError::CompositeSpecConstant));
}

#[test]
fn opaque_uniform_constant_storage_texel_buffer_is_detected() {
    // A StorageBuffer-storage-class opaque image with Dim=Buffer and
    // sampled=2 reflects as a storage texel buffer binding.
    let mut b = Builder::new();
    let float_ty = b.fresh_id();
    b.inst(OP_TYPE_FLOAT, &[float_ty, 32]);

    let image_ty = b.fresh_id();
    // OpTypeImage = 25; operands: result_id, sampled_type, dim, depth, arrayed, ms, sampled, format
    const OP_TYPE_IMAGE: u32 = 25;
    const DIM_BUFFER: u32 = 5;
    b.inst(
        OP_TYPE_IMAGE,
        &[image_ty, float_ty, DIM_BUFFER, 0, 0, 0, 2, 0],
    );

    let ptr_ty = b.fresh_id();
    b.inst(
        OP_TYPE_POINTER,
        &[ptr_ty, STORAGE_CLASS_UNIFORM_CONSTANT, image_ty],
    );
    let var_id = b.fresh_id();
    b.inst(
        OP_VARIABLE,
        &[ptr_ty, var_id, STORAGE_CLASS_UNIFORM_CONSTANT],
    );
    b.inst(OP_DECORATE, &[var_id, DECORATION_DESCRIPTOR_SET, 1]);
    b.inst(OP_DECORATE, &[var_id, DECORATION_BINDING, 0]);

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();
    let set1 = reflection.descriptor_set(1);
    assert_eq!(set1.len(), 1);
    assert_eq!(set1[0].descriptor_type, DescriptorType::StorageTexelBuffer);
    assert_eq!(set1[0].descriptor_count, 1);
}

#[test]
fn create_descriptor_set_layout_and_generate_descriptor_writes_round_trip() {
    const STORAGE_CLASS_UNIFORM: u32 = 2;

    let mut b = Builder::new();
    let float_ty = b.fresh_id();
    b.inst(OP_TYPE_FLOAT, &[float_ty, 32]);
    let vec4_ty = b.fresh_id();
    b.inst(OP_TYPE_VECTOR, &[vec4_ty, float_ty, 4]);

    let struct_ty = b.fresh_id();
    b.inst(OP_TYPE_STRUCT, &[struct_ty, vec4_ty]);
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 0, DECORATION_OFFSET, 0]);

    let ptr_ty = b.fresh_id();
    b.inst(OP_TYPE_POINTER, &[ptr_ty, STORAGE_CLASS_UNIFORM, struct_ty]);
    let var_id = b.fresh_id();
    b.inst(OP_VARIABLE, &[ptr_ty, var_id, STORAGE_CLASS_UNIFORM]);
    b.inst(OP_DECORATE, &[var_id, DECORATION_DESCRIPTOR_SET, 0]);
    b.inst(OP_DECORATE, &[var_id, DECORATION_BINDING, 0]);

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();

    let (bindings, flags) =
        reflection.create_descriptor_set_layout(0, vk::ShaderStageFlags::COMPUTE, &[], &[]);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].binding, 0);
    assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    assert_eq!(bindings[0].descriptor_count, 1);
    assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::COMPUTE);
    assert_eq!(flags, vec![vk::DescriptorBindingFlags::empty()]);

    let fake_set = vk::DescriptorSet::from_raw(0xDEAD_BEEF);
    let buffer_info = vk::DescriptorBufferInfo::builder()
        .buffer(vk::Buffer::from_raw(1))
        .offset(0)
        .range(vk::WHOLE_SIZE)
        .build();
    let writes =
        reflection.generate_descriptor_writes(0, fake_set, &[DescriptorWriteInfo::Buffer(buffer_info)]);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].dst_binding, 0);
    assert_eq!(writes[0].dst_set, fake_set);
    assert_eq!(writes[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
}

#[test]
fn create_descriptor_set_layout_substitutes_dynamic_counts_for_runtime_arrays() {
    let mut b = Builder::new();
    let uint_ty = b.fresh_id();
    b.inst(OP_TYPE_INT, &[uint_ty, 32, 0]);
    let runtime_array_ty = b.fresh_id();
    b.inst(OP_TYPE_RUNTIME_ARRAY, &[runtime_array_ty, uint_ty]);

    let struct_ty = b.fresh_id();
    b.inst(OP_TYPE_STRUCT, &[struct_ty, runtime_array_ty]);
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 0, DECORATION_OFFSET, 0]);

    let ptr_ty = b.fresh_id();
    b.inst(
        OP_TYPE_POINTER,
        &[ptr_ty, STORAGE_CLASS_STORAGE_BUFFER, struct_ty],
    );
    let var_id = b.fresh_id();
    b.inst(
        OP_VARIABLE,
        &[ptr_ty, var_id, STORAGE_CLASS_STORAGE_BUFFER],
    );
    b.inst(OP_DECORATE, &[var_id, DECORATION_DESCRIPTOR_SET, 0]);
    b.inst(OP_DECORATE, &[var_id, DECORATION_BINDING, 3]);

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();

    let (bindings, _) =
        reflection.create_descriptor_set_layout(0, vk::ShaderStageFlags::COMPUTE, &[512], &[]);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].binding, 3);
    assert_eq!(bindings[0].descriptor_count, 512);
}

#[test]
#[should_panic(expected = "one entry per runtime-sized binding")]
fn create_descriptor_set_layout_panics_without_a_dynamic_count_for_a_runtime_array() {
    let mut b = Builder::new();
    let uint_ty = b.fresh_id();
    b.inst(OP_TYPE_INT, &[uint_ty, 32, 0]);
    let runtime_array_ty = b.fresh_id();
    b.inst(OP_TYPE_RUNTIME_ARRAY, &[runtime_array_ty, uint_ty]);

    let struct_ty = b.fresh_id();
    b.inst(OP_TYPE_STRUCT, &[struct_ty, runtime_array_ty]);
    b.inst(OP_MEMBER_DECORATE, &[struct_ty, 0, DECORATION_OFFSET, 0]);

    let ptr_ty = b.fresh_id();
    b.inst(
        OP_TYPE_POINTER,
        &[ptr_ty, STORAGE_CLASS_STORAGE_BUFFER, struct_ty],
    );
    let var_id = b.fresh_id();
    b.inst(
        OP_VARIABLE,
        &[ptr_ty, var_id, STORAGE_CLASS_STORAGE_BUFFER],
    );
    b.inst(OP_DECORATE, &[var_id, DECORATION_DESCRIPTOR_SET, 0]);
    b.inst(OP_DECORATE, &[var_id, DECORATION_BINDING, 3]);

    let module = b.finish();
    let reflection = ShaderReflection::from_module(&module, []).unwrap();
    reflection.create_descriptor_set_layout(0, vk::ShaderStageFlags::COMPUTE, &[], &[]);
}
