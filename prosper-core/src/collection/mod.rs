//! Generation-tagged pools of transient GPU resources.
//!
//! Grounded on `original_source/src/render/RenderResourceCollection.hpp`:
//! `create`/`release` reuse a slot whose stored description matches the
//! requested one rather than always allocating; the only place physical
//! destruction happens is `destroy_resources`, which the caller invokes
//! explicitly (e.g. on swapchain recreation) rather than on any per-frame
//! timer — `start_frame` only asserts for leaks and resets per-frame
//! bookkeeping. `mark_for_debug` pins a resource by name, not handle, so
//! it can be armed before the named resource even exists.

mod buffer;
mod image;
mod texel_buffer;

pub use buffer::{Buffer, BufferCollection, BufferDescription, BufferHandle, BufferState};
pub use image::{Image, ImageCollection, ImageDescription, ImageHandle, ImageState};
pub use texel_buffer::{TexelBuffer, TexelBufferCollection, TexelBufferDescription, TexelBufferHandle};

use std::fmt;

use crate::handle::{Handle, NOT_IN_USE_FLAG};

pub trait ResourceKind: Sized {
    type Description: Clone + PartialEq + fmt::Debug;
    type Raw: Copy + fmt::Debug;
    type State: Copy;

    fn initial_state() -> Self::State;
}

struct Slot<K: ResourceKind> {
    generation: u64,
    description: K::Description,
    /// This frame's accumulated `name1|name2|...` for whoever aliased this
    /// slot, reset to empty by every `start_frame`.
    debug_name: String,
    raw: K::Raw,
    state: K::State,
    preserved: bool,
    /// A free index once `destroy_resources` has run; `raw` must not be
    /// read again until the slot is reused by `create`.
    destroyed: bool,
}

/// A pool of same-kind resources addressed by generation-tagged handles.
///
/// Not `Sync` and not meant to be: a single frame thread owns a
/// collection and drives it through `create`/`release`/`start_frame`.
pub struct ResourceCollection<K: ResourceKind> {
    slots: Vec<Slot<K>>,
    /// Names already handed to `create`/`append_debug_name` this frame,
    /// cleared by `start_frame`. Catches the same mistake the original's
    /// `assertUniqueDebugName` does: two live resources sharing a name make
    /// debug tooling and `setDebugUtilsObjectNameEXT` ambiguous.
    this_frame_debug_names: Vec<String>,
    /// Name of the resource the user wants to inspect. Armed by
    /// `mark_for_debug` before the resource necessarily exists; resolved to
    /// a handle the next time a `create`/`append_debug_name` call uses this
    /// exact name.
    marked_debug_name: Option<String>,
    marked_debug_handle: Option<Handle<K>>,
}

impl<K: ResourceKind> ResourceCollection<K> {
    pub fn new() -> Self {
        ResourceCollection {
            slots: Vec::new(),
            this_frame_debug_names: Vec::new(),
            marked_debug_name: None,
            marked_debug_handle: None,
        }
    }

    fn assert_unique_debug_name(&mut self, debug_name: &str) {
        debug_assert!(
            !self.this_frame_debug_names.iter().any(|n| n == debug_name),
            "duplicate debug name \"{debug_name}\" used twice in one frame"
        );
        self.this_frame_debug_names.push(debug_name.to_owned());
    }

    /// True if `slot`'s aliased name this frame ends with `|` + the
    /// currently marked debug name (or equals it outright), meaning this
    /// slot must not be handed back out by `create`'s aliasing scan even
    /// though it is free.
    fn aliased_name_is_marked(&self, slot: &Slot<K>) -> bool {
        let Some(marked) = self.marked_debug_name.as_deref() else {
            return false;
        };
        if marked.is_empty() {
            return false;
        }
        let name = slot.debug_name.as_str();
        let Some(start) = name.len().checked_sub(marked.len()) else {
            return false;
        };
        &name[start..] == marked && (start == 0 || name.as_bytes()[start - 1] == b'|')
    }

    fn resolve_marked_handle(&mut self, debug_name: &str, handle: Handle<K>) {
        if self.marked_debug_name.as_deref() == Some(debug_name) {
            self.marked_debug_handle = Some(handle);
        }
    }

    /// Creates a resource, reusing a released slot whose description
    /// matches exactly instead of allocating a new one. On reuse the two
    /// debug names are concatenated with `|`, matching the original's
    /// aliasing-name convention.
    pub fn create(
        &mut self,
        description: K::Description,
        debug_name: impl Into<String>,
        mut make_raw: impl FnMut(&K::Description, &str) -> K::Raw,
    ) -> Handle<K> {
        let debug_name = debug_name.into();

        if let Some(index) = self.slots.iter().position(|slot| {
            !slot.destroyed
                && slot.generation & NOT_IN_USE_FLAG != 0
                && slot.description == description
                && !self.aliased_name_is_marked(slot)
        }) {
            let slot = &mut self.slots[index];
            slot.generation &= !NOT_IN_USE_FLAG;
            slot.debug_name = if slot.debug_name.is_empty() {
                debug_name.clone()
            } else {
                format!("{}|{}", slot.debug_name, debug_name)
            };
            slot.preserved = false;
            slot.state = K::initial_state();
            let handle = Handle::new(index as u32, slot.generation);
            log::trace!("aliased resource slot {index} as \"{}\"", self.slots[index].debug_name);
            self.assert_unique_debug_name(&debug_name);
            self.resolve_marked_handle(&debug_name, handle);
            return handle;
        }

        if let Some(index) = self.slots.iter().position(|slot| slot.destroyed) {
            let raw = make_raw(&description, &debug_name);
            let slot = &mut self.slots[index];
            slot.generation &= !NOT_IN_USE_FLAG;
            slot.description = description;
            slot.debug_name = debug_name.clone();
            slot.raw = raw;
            slot.state = K::initial_state();
            slot.preserved = false;
            slot.destroyed = false;
            let handle = Handle::new(index as u32, slot.generation);
            log::trace!("reused free index {index} for a new resource");
            self.assert_unique_debug_name(&debug_name);
            self.resolve_marked_handle(&debug_name, handle);
            return handle;
        }

        let raw = make_raw(&description, &debug_name);
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            description,
            debug_name: debug_name.clone(),
            raw,
            state: K::initial_state(),
            preserved: false,
            destroyed: false,
        });
        log::trace!("created resource slot {index}");
        self.assert_unique_debug_name(&debug_name);
        let handle = Handle::new(index, 0);
        self.resolve_marked_handle(&debug_name, handle);
        handle
    }

    /// Concatenates `|name` onto `handle`'s aliased debug name, enforcing
    /// the same per-frame uniqueness `create` does.
    pub fn append_debug_name(&mut self, handle: Handle<K>, name: impl Into<String>) {
        let name = name.into();
        self.assert_unique_debug_name(&name);
        let slot = self.slot_mut(handle);
        slot.debug_name = if slot.debug_name.is_empty() {
            name.clone()
        } else {
            format!("{}|{}", slot.debug_name, name)
        };
        self.resolve_marked_handle(&name, handle);
    }

    /// Increments and then flags the slot's generation as not-in-use.
    /// Forbidden on preserved slots.
    pub fn release(&mut self, handle: Handle<K>) {
        let slot = self.slot_mut(handle);
        debug_assert!(!slot.preserved, "releasing a preserved resource");
        slot.generation = (slot.generation + 1) | NOT_IN_USE_FLAG;
    }

    /// Keeps `handle`'s resource alive through the next `start_frame`
    /// even though it looks released — used for resources a caller wants
    /// to carry across the frame boundary without re-describing.
    pub fn preserve(&mut self, handle: Handle<K>) {
        let slot = self.slot_mut(handle);
        debug_assert!(
            !slot.preserved,
            "resource is being preserved in two places, ownership gets muddy"
        );
        slot.preserved = true;
    }

    /// Arms debug tracking for the next resource named `name`, whether or
    /// not it exists yet. Replaces whatever was previously marked.
    pub fn mark_for_debug(&mut self, name: impl Into<String>) {
        self.marked_debug_name = Some(name.into());
        self.marked_debug_handle = None;
    }

    pub fn clear_debug(&mut self) {
        self.marked_debug_name = None;
        self.marked_debug_handle = None;
    }

    /// The handle currently marked for debug, or a null handle if nothing
    /// is marked or the marked resource is no longer valid.
    pub fn active_debug_handle(&self) -> Handle<K> {
        match self.marked_debug_handle {
            Some(handle) if self.is_valid(handle) => handle,
            _ => Handle::null(),
        }
    }

    pub fn active_debug_name(&self) -> Option<&str> {
        self.marked_debug_name.as_deref()
    }

    /// True if `handle` still names the resource it was issued for.
    ///
    /// The marked-for-debug handle additionally accepts a generation one
    /// behind the stored value: a caller that captured the handle just
    /// before releasing it can still resolve it through the debug view for
    /// the rest of the frame.
    pub fn is_valid(&self, handle: Handle<K>) -> bool {
        if handle.is_null() {
            return false;
        }
        let Some(slot) = self.slots.get(handle.index() as usize) else {
            return false;
        };
        if let Some(marked) = self.marked_debug_handle {
            if marked.index() == handle.index() {
                let stored = slot.generation & !NOT_IN_USE_FLAG;
                return handle.generation() == stored || handle.generation() + 1 == stored;
            }
        }
        handle.generation() == slot.generation
    }

    pub fn description(&self, handle: Handle<K>) -> &K::Description {
        &self.slot(handle).description
    }

    pub fn debug_name(&self, handle: Handle<K>) -> &str {
        &self.slot(handle).debug_name
    }

    pub fn raw(&self, handle: Handle<K>) -> K::Raw {
        self.slot(handle).raw
    }

    /// Records `new_state` as the slot's current transition state and
    /// returns whatever state it held before, for `transition::Batch` to
    /// diff against when deciding whether a barrier is needed.
    pub fn transition(&mut self, handle: Handle<K>, new_state: K::State) -> K::State {
        let slot = self.slot_mut(handle);
        let old = slot.state;
        slot.state = new_state;
        old
    }

    pub fn state(&self, handle: Handle<K>) -> K::State {
        self.slot(handle).state
    }

    /// Asserts every non-preserved in-use slot has been released, then
    /// clears per-frame bookkeeping (aliased names, the this-frame
    /// unique-name list) and flips `preserved` back to false. Destroys
    /// nothing — the only place resources actually go away is
    /// `destroy_resources`.
    pub fn start_frame(&mut self) {
        self.this_frame_debug_names.clear();

        for slot in &mut self.slots {
            if slot.destroyed {
                continue;
            }
            if slot.preserved {
                slot.preserved = false;
                continue;
            }
            debug_assert!(
                slot.generation & NOT_IN_USE_FLAG != 0,
                "resource \"{}\" leaked: still in use at start_frame",
                slot.debug_name
            );
            slot.debug_name.clear();
        }
    }

    /// Destroys every live resource, then bumps every slot's generation
    /// and sets its not-in-use flag, invalidating all outstanding handles
    /// (including ones for slots that were never released). Safe to call
    /// more than once over the collection's life, e.g. on swapchain
    /// recreation: a later `create` reuses the freed indices.
    pub fn destroy_resources(&mut self, mut destroy_raw: impl FnMut(K::Raw)) {
        for slot in &mut self.slots {
            if !slot.destroyed {
                destroy_raw(slot.raw);
                slot.destroyed = true;
            }
            slot.debug_name.clear();
            slot.preserved = false;
            slot.generation = (slot.generation + 1) | NOT_IN_USE_FLAG;
        }
        self.marked_debug_handle = None;
    }

    fn slot(&self, handle: Handle<K>) -> &Slot<K> {
        debug_assert!(self.is_valid(handle), "stale or out-of-range handle {handle:?}");
        &self.slots[handle.index() as usize]
    }

    fn slot_mut(&mut self, handle: Handle<K>) -> &mut Slot<K> {
        debug_assert!(self.is_valid(handle), "stale or out-of-range handle {handle:?}");
        let index = handle.index() as usize;
        &mut self.slots[index]
    }
}

impl<K: ResourceKind> Default for ResourceCollection<K> {
    fn default() -> Self {
        Self::new()
    }
}
