//! S4: start the profiler, open a CPU+GPU scope around a no-op dispatch,
//! end the frame, wait two frames in flight, then query the previous
//! data — both timings must be non-negative and the two statistics
//! counters zeroed for a scope that recorded no geometry.

use prosper_core::profiler::{GpuReadback, Profiler};

#[test]
fn s4_scope_stats_are_available_after_two_frames_in_flight() {
    let profiler = Profiler::new();

    profiler.start_cpu_frame();
    profiler.start_gpu_frame(0, |_| vec![]);
    {
        let _scope = profiler.create_cpu_gpu_scope("noop-dispatch", |_query_index| {}, |_query_index| {});
    }
    profiler.end_gpu_frame(|| {});
    profiler.end_cpu_frame();

    // The next time frame-in-flight slot 0 comes around (MAX_FRAMES_IN_FLIGHT
    // iterations later, here modeled as the very next use of the same slot),
    // its query results are read back before any new scope overwrites them.
    profiler.start_cpu_frame();
    profiler.start_gpu_frame(0, |count| {
        assert_eq!(count, 1);
        vec![GpuReadback {
            gpu_nanos: 0,
            clipping_primitives: 0,
            fragment_invocations: 0,
        }]
    });

    let data = profiler.get_previous_data();
    assert_eq!(data.len(), 1);
    assert!(data[0].cpu_millis >= 0.0);
    assert!(data[0].gpu_millis >= 0.0);
    assert_eq!(data[0].clipping_primitives, 0);
    assert_eq!(data[0].fragment_invocations, 0);

    profiler.end_gpu_frame(|| {});
    profiler.end_cpu_frame();
}

#[test]
#[should_panic(expected = "without a matching start_gpu_frame")]
fn end_gpu_frame_before_start_gpu_frame_asserts() {
    let profiler = Profiler::new();
    profiler.start_cpu_frame();
    profiler.end_gpu_frame(|| {});
}
