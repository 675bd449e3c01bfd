use ash::vk;

use super::ResourceKind;
use crate::device::RawBuffer;
use crate::handle::Handle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDescription {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferState {
    pub access_mask: vk::AccessFlags,
    pub stage_mask: vk::PipelineStageFlags,
}

impl BufferState {
    pub const UNDEFINED: BufferState = BufferState {
        access_mask: vk::AccessFlags::empty(),
        stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
    };
}

pub struct Buffer;

impl ResourceKind for Buffer {
    type Description = BufferDescription;
    type Raw = RawBuffer;
    type State = BufferState;

    fn initial_state() -> BufferState {
        BufferState::UNDEFINED
    }
}

pub type BufferCollection = super::ResourceCollection<Buffer>;
pub type BufferHandle = Handle<Buffer>;
