//! In-process counters and distributions for the connector's RPC paths.
//!
//! Cells are cheap atomics so they can be bumped on hot paths and cloned
//! freely; clones share the underlying value, which is how per-worker
//! components and their embedder observe the same counters. Aggregation
//! across workers is the pipeline runtime's business, not ours.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Monotonic counter cell. Clones share the value.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `by` to the counter.
    pub fn inc(&self, by: u64) {
        self.value.fetch_add(by, Ordering::Relaxed);
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct DistributionInner {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for DistributionInner {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

/// Point-in-time view of a distribution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistributionSnapshot {
    pub count: u64,
    pub sum: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Count/sum/min/max distribution cell. Clones share the value.
#[derive(Clone, Debug, Default)]
pub struct Distribution {
    inner: Arc<DistributionInner>,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation.
    pub fn update(&self, value: u64) {
        self.inner.count.fetch_add(1, Ordering::Relaxed);
        self.inner.sum.fetch_add(value, Ordering::Relaxed);
        self.inner.min.fetch_min(value, Ordering::Relaxed);
        self.inner.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Snapshot the current aggregates.
    pub fn snapshot(&self) -> DistributionSnapshot {
        let count = self.inner.count.load(Ordering::Relaxed);
        let min = self.inner.min.load(Ordering::Relaxed);
        DistributionSnapshot {
            count,
            sum: self.inner.sum.load(Ordering::Relaxed),
            min: if count == 0 { None } else { Some(min) },
            max: if count == 0 {
                None
            } else {
                Some(self.inner.max.load(Ordering::Relaxed))
            },
        }
    }
}

/// Per-status-code attempt counter for one Store method.
///
/// Keyed by the stable status string ("ok", "UNAVAILABLE", ...). One entry is
/// recorded per RPC attempt, including retried ones.
#[derive(Clone, Debug, Default)]
pub struct ServiceCallCounter {
    calls: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl ServiceCallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt with the given status.
    pub fn record(&self, status: &str) {
        let mut calls = self.calls.lock().expect("service call counter poisoned");
        *calls.entry(status.to_string()).or_insert(0) += 1;
    }

    /// Snapshot all per-status counts.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.calls
            .lock()
            .expect("service call counter poisoned")
            .clone()
    }

    /// Count recorded for one status.
    pub fn count(&self, status: &str) -> u64 {
        self.calls
            .lock()
            .expect("service call counter poisoned")
            .get(status)
            .copied()
            .unwrap_or(0)
    }
}

/// Metric cells owned by the mutation writer.
#[derive(Clone, Debug, Default)]
pub struct WriterMetrics {
    pub rpc_successes: Counter,
    pub rpc_errors: Counter,
    pub entities_mutated: Counter,
    pub throttling_msecs: Counter,
    pub batch_size: Distribution,
    pub latency_ms_per_mutation: Distribution,
    pub service_calls: ServiceCallCounter,
}

impl WriterMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Metric cells owned by the paginated reader.
#[derive(Clone, Debug, Default)]
pub struct ReaderMetrics {
    pub rpc_successes: Counter,
    pub rpc_errors: Counter,
    pub service_calls: ServiceCallCounter,
}

impl ReaderMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
