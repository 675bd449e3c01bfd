//! SPIR-V shader reflection: push-constant sizing, descriptor-set
//! metadata, and specialization-constant maps, decoded straight from the
//! compiled word stream rather than from a separate reflection JSON.
//!
//! Grounded on the teacher's `autograph-spirv` crate for word decoding and
//! opcode handling, and on `original_source/src/ShaderReflection.cpp` for
//! the folding rules `reflect` implements.

mod module;
mod reflect;

pub use module::{Instruction, Instructions, Module};
pub use reflect::{
    DescriptorSetMetadata, DescriptorType, DescriptorWriteInfo, ShaderReflection,
    SpecializationConstant,
};

use thiserror::Error;

/// Errors from decoding or reflecting a SPIR-V module.
///
/// These are the only `Result`-returning boundary in this crate; once a
/// module decodes successfully, reflection over it is pure computation
/// and any internal inconsistency is a bug, not a recoverable error.
#[derive(Debug, Error)]
pub enum ReflectError {
    #[error("not a SPIR-V module: bad magic number")]
    InvalidMagic,
    #[error("SPIR-V module is truncated before the 5-word header")]
    TruncatedHeader,
    #[error("composite specialization constants are not supported")]
    CompositeSpecConstant,
    #[error("specialization constant ids must be contiguous starting at 0, missing id {0}")]
    SpecConstantIdGap(u32),
    #[error(
        "specialization constant {constant_id} at offset {offset} is not aligned to its size {size}"
    )]
    SpecConstantMisaligned {
        constant_id: u32,
        offset: u32,
        size: u32,
    },
}
