//! Frame-in-flight CPU and GPU profiling.
//!
//! Grounded on `original_source/include/Profiler.hpp`: one `GpuFrameProfiler`
//! per frame in flight owns a timestamp query pool and a pipeline
//! statistics query pool; a `CpuFrameProfiler` times scopes with
//! `std::chrono`-equivalent wall-clock reads. Because query pool results
//! aren't ready until the GPU has finished the frame that wrote them, a
//! scope's GPU numbers surface `MAX_FRAMES_IN_FLIGHT` iterations after they
//! were recorded — this crate never reads a query pool result without
//! first confirming the frame it belongs to has retired, which is what the
//! state machine below enforces.
//!
//! Calls form a small state machine: `NewFrame -> StartCpuCalled ->
//! StartGpuCalled -> EndGpuCalled -> NewFrame`. `create_cpu_scope` is valid
//! in either of the two "started" states; `create_cpu_gpu_scope` only once
//! the GPU side has started. Calling an event out of its required state
//! panics — a profiler call out of order is a programming error in the
//! frame loop, not a recoverable condition.

use std::cell::{Cell, RefCell};
use std::time::Instant;

pub const MAX_FRAMES_IN_FLIGHT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    NewFrame,
    StartCpuCalled,
    StartGpuCalled,
    EndGpuCalled,
}

/// One scope's fully resolved timing, as returned by `get_previous_data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeData {
    pub name: String,
    pub cpu_millis: f64,
    pub gpu_millis: f64,
    pub clipping_primitives: u64,
    pub fragment_invocations: u64,
}

/// What the caller's query-pool readback reports for one GPU scope,
/// fed into `start_gpu_frame`'s snapshot step in the same order the
/// scopes were opened in the iteration being read back.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuReadback {
    pub gpu_nanos: u64,
    pub clipping_primitives: u64,
    pub fragment_invocations: u64,
}

#[derive(Default, Clone)]
struct FrameSlot {
    scopes: Vec<ScopeData>,
    /// Indices into `scopes` that carry a GPU query, in the order those
    /// queries were opened — the order `start_gpu_frame`'s readback must
    /// be supplied in the next time this slot comes around.
    gpu_scope_indices: Vec<usize>,
}

struct State {
    slots: Vec<FrameSlot>,
    current_index: usize,
    pending_names: Vec<String>,
    pending_cpu_nanos: Vec<u64>,
    pending_gpu_query: Vec<Option<u32>>,
    next_query_index: u32,
}

pub struct Profiler {
    phase: Cell<FramePhase>,
    state: RefCell<State>,
}

impl Profiler {
    pub fn new() -> Self {
        Profiler {
            phase: Cell::new(FramePhase::NewFrame),
            state: RefCell::new(State {
                slots: vec![FrameSlot::default(); MAX_FRAMES_IN_FLIGHT as usize],
                current_index: 0,
                pending_names: Vec::new(),
                pending_cpu_nanos: Vec::new(),
                pending_gpu_query: Vec::new(),
                next_query_index: 0,
            }),
        }
    }

    /// `NewFrame -> StartCpuCalled`. Clears this frame's scope
    /// accumulation buffers.
    pub fn start_cpu_frame(&self) {
        assert_eq!(
            self.phase.get(),
            FramePhase::NewFrame,
            "start_cpu_frame called out of sequence"
        );
        let mut state = self.state.borrow_mut();
        state.pending_names.clear();
        state.pending_cpu_nanos.clear();
        state.pending_gpu_query.clear();
        state.next_query_index = 0;
        self.phase.set(FramePhase::StartCpuCalled);
    }

    /// `StartCpuCalled -> StartGpuCalled`. Snapshots `frame_index`'s
    /// previous-iteration GPU data via `readback`, called once with the
    /// scope count that iteration recorded GPU queries for, then resets
    /// the query pools for this iteration's recording.
    pub fn start_gpu_frame(&self, frame_index: u32, mut readback: impl FnMut(usize) -> Vec<GpuReadback>) {
        assert_eq!(
            self.phase.get(),
            FramePhase::StartCpuCalled,
            "start_gpu_frame called out of sequence"
        );
        let mut state = self.state.borrow_mut();
        let index = frame_index as usize;
        assert!(index < state.slots.len(), "frame_index out of range of MAX_FRAMES_IN_FLIGHT");
        state.current_index = index;

        let gpu_scope_count = state.slots[index].gpu_scope_indices.len();
        if gpu_scope_count > 0 {
            let readings = readback(gpu_scope_count);
            assert_eq!(readings.len(), gpu_scope_count, "readback must supply one entry per GPU scope");
            let slot = &mut state.slots[index];
            for (&scope_index, reading) in slot.gpu_scope_indices.iter().zip(readings) {
                let scope = &mut slot.scopes[scope_index];
                scope.gpu_millis = reading.gpu_nanos as f64 * 1e-6;
                scope.clipping_primitives = reading.clipping_primitives;
                scope.fragment_invocations = reading.fragment_invocations;
            }
        }

        self.phase.set(FramePhase::StartGpuCalled);
    }

    /// Opens a CPU-only scope, valid while either the CPU or GPU side of
    /// the frame has started. The guard's drop records the elapsed wall
    /// time.
    pub fn create_cpu_scope(&self, name: impl Into<String>) -> CpuScopeGuard<'_> {
        let phase = self.phase.get();
        assert!(
            phase == FramePhase::StartCpuCalled || phase == FramePhase::StartGpuCalled,
            "create_cpu_scope called out of sequence"
        );
        let mut state = self.state.borrow_mut();
        state.pending_names.push(name.into());
        state.pending_cpu_nanos.push(0);
        state.pending_gpu_query.push(None);
        let index = state.pending_names.len() - 1;
        CpuScopeGuard {
            profiler: self,
            index,
            start: Instant::now(),
        }
    }

    /// Opens a CPU+GPU scope, valid only once the GPU side of the frame
    /// has started. `begin_query` is invoked immediately with a fresh
    /// query index (the caller's hook to write a `TopOfPipe` timestamp and
    /// begin a statistics query); the returned guard's drop invokes
    /// `end_query` with the same index (`BottomOfPipe` timestamp, end
    /// statistics query) and records elapsed CPU time.
    pub fn create_cpu_gpu_scope<F>(
        &self,
        name: impl Into<String>,
        mut begin_query: impl FnMut(u32),
        end_query: F,
    ) -> CpuGpuScopeGuard<'_, F>
    where
        F: FnMut(u32),
    {
        assert_eq!(
            self.phase.get(),
            FramePhase::StartGpuCalled,
            "create_cpu_gpu_scope is only valid once start_gpu_frame has run"
        );
        let mut state = self.state.borrow_mut();
        let query_index = state.next_query_index;
        state.next_query_index += 1;
        begin_query(query_index);

        state.pending_names.push(name.into());
        state.pending_cpu_nanos.push(0);
        state.pending_gpu_query.push(Some(query_index));
        let index = state.pending_names.len() - 1;
        drop(state);

        CpuGpuScopeGuard {
            profiler: self,
            index,
            query_index,
            start: Instant::now(),
            end_query,
        }
    }

    /// `StartGpuCalled -> EndGpuCalled`. `copy_query_results` is the
    /// caller's `vkCmdCopyQueryPoolResults` call into this iteration's
    /// readback buffer.
    pub fn end_gpu_frame(&self, mut copy_query_results: impl FnMut()) {
        assert_eq!(
            self.phase.get(),
            FramePhase::StartGpuCalled,
            "end_gpu_frame called without a matching start_gpu_frame"
        );
        copy_query_results();
        self.phase.set(FramePhase::EndGpuCalled);
    }

    /// `EndGpuCalled -> NewFrame`. Commits this iteration's scope names
    /// and CPU times into the current frame-in-flight slot; GPU fields are
    /// zeroed until `start_gpu_frame` snapshots them the next time this
    /// slot is reused.
    pub fn end_cpu_frame(&self) {
        assert_eq!(
            self.phase.get(),
            FramePhase::EndGpuCalled,
            "end_cpu_frame called without a matching end_gpu_frame"
        );
        let mut state = self.state.borrow_mut();
        let scopes: Vec<ScopeData> = state
            .pending_names
            .iter()
            .zip(&state.pending_cpu_nanos)
            .map(|(name, &nanos)| ScopeData {
                name: name.clone(),
                cpu_millis: nanos as f64 * 1e-6,
                gpu_millis: 0.0,
                clipping_primitives: 0,
                fragment_invocations: 0,
            })
            .collect();
        let gpu_scope_indices = state
            .pending_gpu_query
            .iter()
            .enumerate()
            .filter_map(|(i, q)| q.map(|_| i))
            .collect();

        let index = state.current_index;
        state.slots[index] = FrameSlot { scopes, gpu_scope_indices };
        self.phase.set(FramePhase::NewFrame);
    }

    /// The most recently fully resolved scope data for the frame-in-flight
    /// slot last passed to `start_gpu_frame` — complete as of that call's
    /// snapshot, valid to read any time afterwards.
    pub fn get_previous_data(&self) -> Vec<ScopeData> {
        let state = self.state.borrow();
        state.slots[state.current_index].scopes.clone()
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CpuScopeGuard<'a> {
    profiler: &'a Profiler,
    index: usize,
    start: Instant,
}

impl Drop for CpuScopeGuard<'_> {
    fn drop(&mut self) {
        let nanos = self.start.elapsed().as_nanos() as u64;
        self.profiler.state.borrow_mut().pending_cpu_nanos[self.index] = nanos;
    }
}

pub struct CpuGpuScopeGuard<'a, F: FnMut(u32)> {
    profiler: &'a Profiler,
    index: usize,
    query_index: u32,
    start: Instant,
    end_query: F,
}

impl<F: FnMut(u32)> Drop for CpuGpuScopeGuard<'_, F> {
    fn drop(&mut self) {
        let nanos = self.start.elapsed().as_nanos() as u64;
        self.profiler.state.borrow_mut().pending_cpu_nanos[self.index] = nanos;
        (self.end_query)(self.query_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_only_scope_round_trips_through_two_frames_in_flight() {
        let profiler = Profiler::new();
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            profiler.start_cpu_frame();
            profiler.start_gpu_frame(0, |_| vec![]);
            {
                let _scope = profiler.create_cpu_scope("main-pass");
            }
            profiler.end_gpu_frame(|| {});
            profiler.end_cpu_frame();
        }

        let data = profiler.get_previous_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name, "main-pass");
        assert_eq!(data[0].gpu_millis, 0.0);
    }

    #[test]
    fn gpu_scope_data_is_zero_until_its_frame_in_flight_slot_is_read_back() {
        let profiler = Profiler::new();

        profiler.start_cpu_frame();
        profiler.start_gpu_frame(0, |_| vec![]);
        {
            let _scope = profiler.create_cpu_gpu_scope("dispatch", |_| {}, |_| {});
        }
        profiler.end_gpu_frame(|| {});
        profiler.end_cpu_frame();

        let data = profiler.get_previous_data();
        assert_eq!(data[0].gpu_millis, 0.0, "not read back yet");

        // Two more iterations of slot 0 pass before its query results are
        // actually consumed.
        profiler.start_cpu_frame();
        profiler.start_gpu_frame(
            0,
            |count| {
                assert_eq!(count, 1);
                vec![GpuReadback {
                    gpu_nanos: 500_000,
                    clipping_primitives: 10,
                    fragment_invocations: 2000,
                }]
            },
        );
        let data = profiler.get_previous_data();
        assert_eq!(data[0].gpu_millis, 0.5);
        assert_eq!(data[0].clipping_primitives, 10);
        assert_eq!(data[0].fragment_invocations, 2000);
        profiler.end_gpu_frame(|| {});
        profiler.end_cpu_frame();
    }

    #[test]
    #[should_panic(expected = "only valid once start_gpu_frame has run")]
    fn create_cpu_gpu_scope_in_new_frame_asserts() {
        let profiler = Profiler::new();
        let _scope = profiler.create_cpu_gpu_scope("dispatch", |_| {}, |_| {});
    }

    #[test]
    #[should_panic(expected = "without a matching start_gpu_frame")]
    fn end_gpu_frame_before_start_gpu_frame_asserts() {
        let profiler = Profiler::new();
        profiler.start_cpu_frame();
        profiler.end_gpu_frame(|| {});
    }
}
