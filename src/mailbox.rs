//! Single-slot handoff of data cube frames from the audio thread to the UI.
//!
//! Publishing never blocks: a frame the UI has not collected yet is displaced
//! by the newer one (last one wins). Frames move whole, so the UI never sees a
//! partially written cube. Consumed frames can be handed back so the audio
//! thread reuses their buffers instead of allocating.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

/// Snapshot of the correlator output.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCubeFrame {
    /// Monotonic per session, starting at 0
    pub index: u64,
    /// Decaying peak of the raw input amplitude
    pub peak: f32,
    pub n_fast: usize,
    pub n_slow: usize,
    /// `n_fast * n_slow` non-negative cells, slow-time major
    pub data: Vec<f32>,
}

impl DataCubeFrame {
    /// Input level for the UI meter, in percent of full scale
    pub fn input_level(&self) -> u32 {
        (self.peak * 100.0).round() as u32
    }
}

const SPARE_BUFFERS: usize = 2;

pub struct FrameMailbox {
    slot: ArrayQueue<DataCubeFrame>,
    spare: ArrayQueue<Vec<f32>>,
    coalesced: AtomicU64,
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            slot: ArrayQueue::new(1),
            spare: ArrayQueue::new(SPARE_BUFFERS),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Leaves `frame` for the consumer, recycling the buffer of a frame it
    /// never collected.
    pub fn publish(&self, frame: DataCubeFrame) {
        if let Some(stale) = self.slot.force_push(frame) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            self.recycle(stale);
        }
    }

    pub fn take(&self) -> Option<DataCubeFrame> {
        self.slot.pop()
    }

    /// Returns a consumed frame's buffer to the producer side.
    pub fn recycle(&self, frame: DataCubeFrame) {
        let _ = self.spare.push(frame.data);
    }

    /// Fills the spare pool with empty buffers of `capacity` cells, so the
    /// producer does not allocate for its first frames either.
    pub fn reserve_buffers(&self, capacity: usize) {
        while self.spare.push(Vec::with_capacity(capacity)).is_ok() {}
    }

    pub fn spare_buffer(&self) -> Option<Vec<f32>> {
        self.spare.pop()
    }

    /// Frames that were overwritten before the consumer took them
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
