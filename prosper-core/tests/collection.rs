//! End-to-end coverage of the generation-tagged resource pool against a
//! mock device: handle validity, aliasing, leak detection and name
//! uniqueness, exercised through the public `ResourceCollection` API
//! rather than through its private slot bookkeeping.

use ash::vk;
use ash::vk::Handle as _;

use prosper_core::collection::{ImageCollection, ImageDescription, ImageState};
use prosper_core::device::mock::MockDevice;
use prosper_core::device::DeviceFacade;

fn image_desc(width: u32) -> ImageDescription {
    ImageDescription {
        format: vk::Format::R8G8B8A8_UNORM,
        extent: vk::Extent3D {
            width,
            height: width,
            depth: 1,
        },
        usage: vk::ImageUsageFlags::SAMPLED,
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
    }
}

fn create(collection: &mut ImageCollection, device: &MockDevice, desc: ImageDescription, name: &str) -> prosper_core::collection::ImageHandle {
    collection.create(desc, name, |d, n| device.create_image(d, n))
}

/// Invariant 1 / testable property 1: a released index handed to a later
/// `create` comes back with a different generation, and the old handle no
/// longer validates.
#[test]
fn released_index_gets_a_fresh_generation() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(64), "a");
    images.release(a);
    images.start_frame();
    images.destroy_resources(|raw| device.destroy_image(raw), |_view| {});

    let b = create(&mut images, &device, image_desc(128), "b");

    assert_eq!(b.index(), a.index());
    assert_ne!(b.generation(), a.generation());
    assert!(!images.is_valid(a));
    assert!(images.is_valid(b));
}

/// S1: create "A", release it, create an identically-described "B" —
/// the slot is aliased (same index) and debug names concatenate.
#[test]
fn s1_aliasing_reuses_slot_and_concatenates_names() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    images.release(a);

    let b = create(&mut images, &device, image_desc(128), "B");

    assert_eq!(a.index(), b.index());
    assert_eq!(images.debug_name(b), "A|B");
}

/// Testable property 2: aliasing preserves the underlying native handle —
/// no new GPU resource is created on an aliased reuse.
#[test]
fn aliasing_preserves_native_resource() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    let raw_a = images.raw(a);
    images.release(a);

    let b = create(&mut images, &device, image_desc(128), "B");
    let raw_b = images.raw(b);

    assert_eq!(raw_a.image, raw_b.image);
}

/// S2 / testable property 5: two `create` calls in one frame with the
/// same name must assert.
#[test]
#[should_panic(expected = "duplicate debug name")]
fn s2_duplicate_name_in_one_frame_asserts() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    create(&mut images, &device, image_desc(128), "A");
    create(&mut images, &device, image_desc(64), "A");
}

/// Testable property 4 / invariant 5: a non-preserved slot still in use
/// at `start_frame` is a leak and asserts.
#[test]
#[should_panic(expected = "leaked")]
fn frame_leak_is_detected() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    create(&mut images, &device, image_desc(128), "A");
    // Never released.
    images.start_frame();
}

/// Invariant 4: releasing a preserved resource is forbidden.
#[test]
#[should_panic(expected = "preserved")]
fn releasing_a_preserved_resource_asserts() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    images.preserve(a);
    images.release(a);
}

/// A preserved resource survives `start_frame` without tripping the leak
/// assertion and keeps its handle valid.
#[test]
fn preserved_resource_survives_start_frame() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    images.preserve(a);
    images.start_frame();

    assert!(images.is_valid(a));
}

/// S3 / testable property 3: `mark_for_debug` is armed by name before the
/// resource exists; once created and released, it is never handed back out
/// by `create`'s aliasing scan.
#[test]
fn s3_marked_for_debug_slot_is_excluded_from_aliasing() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    images.mark_for_debug("n1");
    let a = create(&mut images, &device, image_desc(128), "n1");
    assert_eq!(images.active_debug_handle(), a);
    images.release(a);

    let b = create(&mut images, &device, image_desc(128), "n2");

    assert_ne!(b.index(), a.index());
}

/// `clear_debug` un-arms tracking: the marked slot becomes an ordinary
/// aliasing candidate again.
#[test]
fn clear_debug_allows_the_slot_to_be_reused() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    images.mark_for_debug("n1");
    let a = create(&mut images, &device, image_desc(128), "n1");
    images.release(a);
    images.clear_debug();

    let b = create(&mut images, &device, image_desc(128), "n2");

    assert_eq!(b.index(), a.index());
    assert!(images.active_debug_name().is_none());
    assert!(images.active_debug_handle().is_null());
}

/// `destroy_resources` destroys every live resource, bumps every
/// generation and can be called again later without consuming the
/// collection (e.g. on swapchain recreation).
#[test]
fn destroy_resources_invalidates_everything_and_is_repeatable() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    let raw = images.raw(a);
    images.release(a);
    images.start_frame();

    images.destroy_resources(|raw| device.destroy_image(raw), |_view| {});
    assert!(!device.names.lock().unwrap().contains_key(&raw.image.as_raw()));
    assert!(!images.is_valid(a));

    // Calling it again with nothing live is a no-op, not a double free.
    images.destroy_resources(|raw| device.destroy_image(raw), |_view| {});

    let b = create(&mut images, &device, image_desc(128), "B");
    assert_eq!(b.index(), a.index());
}

/// S5: batching three image transitions issues barriers only for the
/// handles that actually changed state, carrying the old/new
/// (layout, access, stage) triple for each.
#[test]
fn s5_batched_transition_collects_one_barrier_per_changed_handle() {
    use prosper_core::transition::Batch;

    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    let b = create(&mut images, &device, image_desc(128), "B");
    let c = create(&mut images, &device, image_desc(128), "C");

    let color_write = ImageState {
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    };
    let depth_write = ImageState {
        layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
    };
    let fragment_read = ImageState {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        access_mask: vk::AccessFlags::SHADER_READ,
        stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
    };

    let mut batch = Batch::new();
    batch.transition_image(&mut images, a, color_write);
    batch.transition_image(&mut images, b, depth_write);
    batch.transition_image(&mut images, c, fragment_read);

    assert_eq!(batch.len(), 3);
    assert_eq!(images.state(a), color_write);
    assert_eq!(images.state(b), depth_write);
    assert_eq!(images.state(c), fragment_read);

    // Requesting the same state again is a no-op: no new barrier queued.
    let mut batch2 = Batch::new();
    batch2.transition_image(&mut images, a, color_write);
    assert!(batch2.is_empty());
}

/// Texel buffers share the ordinary buffer state machine; batching one
/// transition for a texel buffer alongside the usual image/buffer kinds
/// should still land exactly one barrier per changed handle.
#[test]
fn texel_buffer_transition_is_batched_like_a_buffer() {
    use prosper_core::collection::{BufferState, TexelBufferCollection, TexelBufferDescription};
    use prosper_core::transition::Batch;

    let device = MockDevice::new();
    let mut texel_buffers = TexelBufferCollection::new();

    let desc = TexelBufferDescription {
        size: 4096,
        format: vk::Format::R32_UINT,
        usage: vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
    };
    let handle = texel_buffers.create(desc, "scratch", |d, n| device.create_texel_buffer(d, n));

    let compute_read = BufferState {
        access_mask: vk::AccessFlags::SHADER_READ,
        stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
    };

    let mut batch = Batch::new();
    batch.transition_texel_buffer(&mut texel_buffers, handle, compute_read);
    assert_eq!(batch.len(), 1);
    assert_eq!(texel_buffers.state(handle), compute_read);

    let mut batch2 = Batch::new();
    batch2.transition_texel_buffer(&mut texel_buffers, handle, compute_read);
    assert!(batch2.is_empty(), "requesting the same state again records no barrier");
}

/// `mip_view` creates a subresource view once per (handle, mip level) and
/// returns the cached value on later calls; destroying the collection's
/// resources drops every cached view along with the images themselves.
#[test]
fn mip_view_is_cached_per_slot_and_level_until_destroyed() {
    let device = MockDevice::new();
    let mut images = ImageCollection::new();

    let a = create(&mut images, &device, image_desc(128), "A");
    let b = create(&mut images, &device, image_desc(128), "B");

    let mut created = 0u32;
    let mut make_view = |raw: prosper_core::device::RawImage, mip: u32| {
        created += 1;
        vk::ImageView::from_raw(raw.image.as_raw() * 16 + mip as u64)
    };

    let a_mip0_first = images.mip_view(a, 0, &mut make_view);
    let a_mip0_second = images.mip_view(a, 0, &mut make_view);
    let a_mip1 = images.mip_view(a, 1, &mut make_view);
    let b_mip0 = images.mip_view(b, 0, &mut make_view);

    assert_eq!(a_mip0_first, a_mip0_second, "the same (handle, level) pair reuses its cached view");
    assert_ne!(a_mip0_first, a_mip1, "different mip levels on the same handle get distinct views");
    assert_ne!(a_mip0_first, b_mip0, "the same mip level on different handles gets distinct views");
    assert_eq!(created, 3, "only the first request per (handle, level) pair invokes the creation closure");

    let mut destroyed_views = 0u32;
    images.destroy_resources(
        |raw| device.destroy_image(raw),
        |_view| destroyed_views += 1,
    );
    assert_eq!(destroyed_views, 3);
}
