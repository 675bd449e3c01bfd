use ash::vk;

use super::ResourceKind;
use crate::collection::buffer::BufferState;
use crate::device::RawTexelBuffer;
use crate::handle::Handle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TexelBufferDescription {
    pub size: vk::DeviceSize,
    pub format: vk::Format,
    pub usage: vk::BufferUsageFlags,
}

pub struct TexelBuffer;

impl ResourceKind for TexelBuffer {
    type Description = TexelBufferDescription;
    type Raw = RawTexelBuffer;
    type State = BufferState;

    fn initial_state() -> BufferState {
        BufferState::UNDEFINED
    }
}

pub type TexelBufferCollection = super::ResourceCollection<TexelBuffer>;
pub type TexelBufferHandle = Handle<TexelBuffer>;
