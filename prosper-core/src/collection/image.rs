use std::ops::{Deref, DerefMut};

use ash::vk;
use fxhash::FxHashMap;

use super::ResourceKind;
use crate::device::RawImage;
use crate::handle::Handle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDescription {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
}

/// The barrier-relevant state an image collection tracks per slot:
/// current layout, the access types and pipeline stage it was last
/// written/read under. `transition::Batch` diffs this against a
/// requested state to decide whether a barrier is needed at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageState {
    pub layout: vk::ImageLayout,
    pub access_mask: vk::AccessFlags,
    pub stage_mask: vk::PipelineStageFlags,
}

impl ImageState {
    pub const UNDEFINED: ImageState = ImageState {
        layout: vk::ImageLayout::UNDEFINED,
        access_mask: vk::AccessFlags::empty(),
        stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
    };
}

pub struct Image;

impl ResourceKind for Image {
    type Description = ImageDescription;
    type Raw = RawImage;
    type State = ImageState;

    fn initial_state() -> ImageState {
        ImageState::UNDEFINED
    }
}

pub type ImageHandle = Handle<Image>;

/// `ResourceCollection<Image>` plus a per-slot, per-mip subresource view
/// cache. A pass that only ever needs the whole-resource view (the one
/// `RawImage::view` already carries) never touches this; one that wants
/// to bind a single mip level — a mip-chain downsample pass, for instance
/// — asks `mip_view` once per (handle, level) and gets the same
/// `vk::ImageView` back on every later call for that pairing, until the
/// slot is actually destroyed.
pub struct ImageCollection {
    inner: super::ResourceCollection<Image>,
    mip_views: FxHashMap<u32, FxHashMap<u32, vk::ImageView>>,
}

impl ImageCollection {
    pub fn new() -> Self {
        ImageCollection {
            inner: super::ResourceCollection::new(),
            mip_views: FxHashMap::default(),
        }
    }

    /// Returns the cached subresource view for `handle`'s `mip_level`,
    /// creating it with `create_view` the first time this pairing is
    /// requested on a live slot.
    pub fn mip_view(
        &mut self,
        handle: ImageHandle,
        mip_level: u32,
        create_view: impl FnOnce(RawImage, u32) -> vk::ImageView,
    ) -> vk::ImageView {
        debug_assert!(self.inner.is_valid(handle), "mip_view requires a valid handle");
        let raw = self.inner.raw(handle);
        let per_slot = self.mip_views.entry(handle.index()).or_default();
        *per_slot
            .entry(mip_level)
            .or_insert_with(|| create_view(raw, mip_level))
    }

    /// Destroys every image's raw resource and every cached subresource
    /// view, then bumps every slot's generation the same way
    /// `ResourceCollection::destroy_resources` does. Safe to call more
    /// than once.
    pub fn destroy_resources(
        &mut self,
        destroy_image: impl FnMut(RawImage),
        mut destroy_view: impl FnMut(vk::ImageView),
    ) {
        for (_, views) in self.mip_views.drain() {
            for (_, view) in views {
                destroy_view(view);
            }
        }
        self.inner.destroy_resources(destroy_image);
    }
}

impl Default for ImageCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ImageCollection {
    type Target = super::ResourceCollection<Image>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ImageCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
