//! Target-latency-driven sizing of commit batches.

use crate::average::MovingAverage;

/// Entities per commit before any latency data is available. A batch of this
/// size generally completes within the RPC deadline even in adverse
/// conditions.
pub const BATCH_SIZE_START: usize = 50;
/// Hard ceiling on entities per commit imposed by the Store.
pub const BATCH_SIZE_LIMIT: usize = 500;
/// Floor on the adaptive batch size.
pub const BATCH_SIZE_MIN: usize = 5;
/// Target wall-clock time for one commit RPC.
pub const BATCH_TARGET_LATENCY_MS: u64 = 6_000;

/// Chooses the size of the next commit batch from recent RPC latency.
///
/// Keeps a rolling average of milliseconds-per-mutation and sizes the next
/// batch so the whole RPC lands near `BATCH_TARGET_LATENCY_MS`: large batches
/// on cheap workloads for amortization, small batches on expensive ones so a
/// single RPC cannot outgrow its deadline.
#[derive(Clone, Debug)]
pub struct WriteBatcher {
    mean_latency_per_mutation_ms: MovingAverage,
}

impl WriteBatcher {
    pub fn new() -> Self {
        Self {
            mean_latency_per_mutation_ms: MovingAverage::new(120_000, 10_000, 1, 1),
        }
    }

    /// Reset the latency window. Called at bundle start.
    pub fn start(&mut self) {
        self.mean_latency_per_mutation_ms = MovingAverage::new(120_000, 10_000, 1, 1);
    }

    /// Record the latency of a finished commit RPC and the number of
    /// mutations it carried.
    pub fn add_request_latency(&mut self, now_ms: u64, latency_ms: u64, num_mutations: usize) {
        if num_mutations == 0 {
            return;
        }
        self.mean_latency_per_mutation_ms
            .add(now_ms, (latency_ms / num_mutations as u64) as i64);
    }

    /// Number of mutations to pack into the next commit.
    pub fn next_batch_size(&self, now_ms: u64) -> usize {
        if !self.mean_latency_per_mutation_ms.has_value(now_ms) {
            return BATCH_SIZE_START;
        }
        let recent_mean = self.mean_latency_per_mutation_ms.get(now_ms).max(1) as u64;
        let target = (BATCH_TARGET_LATENCY_MS / recent_mean) as usize;
        target.clamp(BATCH_SIZE_MIN, BATCH_SIZE_LIMIT)
    }
}

impl Default for WriteBatcher {
    fn default() -> Self {
        Self::new()
    }
}
