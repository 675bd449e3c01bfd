//! Generation-tagged resource handles.
//!
//! A `Handle<T>` names a slot in a `ResourceCollection<T>`. It carries a
//! generation counter so a stale handle from a freed slot can never alias
//! a later resource that reused the same index, the same scheme as
//! `RenderResourceCollection` in the C++ original. The `T` marker is a
//! zero-sized resource-kind tag (see the teacher's `render/src/handle.rs`
//! `OwnedHandle<T>` and `render/src/traits.rs` per-kind newtypes) so
//! `Handle<Image>` and `Handle<Buffer>` are distinct types at compile time
//! even though both are `(u32, u64)` underneath.

use std::fmt;
use std::marker::PhantomData;

/// Top bit of a slot's generation: clear while the slot is in use, set
/// once the handle holding it has been released.
pub(crate) const NOT_IN_USE_FLAG: u64 = 1u64 << 63;

/// Sentinel index for a null handle, matching the resource collection's
/// own "no such slot" representation.
pub(crate) const NULL_INDEX: u32 = 0xFFFF_FFFF;

pub struct Handle<T> {
    pub(crate) index: u32,
    pub(crate) generation: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32, generation: u64) -> Self {
        Handle {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// A handle that never names a live slot, returned by
    /// `ResourceCollection::active_debug_handle` when nothing is marked.
    pub fn null() -> Self {
        Handle {
            index: NULL_INDEX,
            generation: 0,
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == NULL_INDEX
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &(self.generation & !NOT_IN_USE_FLAG))
            .field("marked", &(self.generation & NOT_IN_USE_FLAG != 0))
            .finish()
    }
}
