//! Batching mutation writer: accumulates idempotent mutations and commits
//! them in adaptively sized, non-transactional batches.
//!
//! Commits may be retried whole; correctness rests on the connector emitting
//! only upsert and delete mutations. Within one bundle, mutations are
//! committed in arrival order and no key appears twice in one commit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use strata_core::{
    CommitRequest, ErrorCode, Key, Mutation, StoreError, StoreFactory, StoreResult, StoreRpc,
    WriteSuccessSummary,
};
use tokio::time::Instant;

use crate::backoff::ExponentialBackoff;
use crate::batcher::{WriteBatcher, BATCH_TARGET_LATENCY_MS};
use crate::config::WriteConfig;
use crate::metrics::WriterMetrics;
use crate::throttle::AdaptiveThrottler;

/// Flush once the pending batch would reach this many serialized bytes. Set
/// below the Store's 10 MB RPC cap to leave room for the request envelope.
pub const BATCH_BYTES_LIMIT: usize = 9_000_000;

/// Receives one summary per successful commit RPC.
pub trait SummarySink<W> {
    /// `commit_time` is the commit-completion instant; `window` is the
    /// window of the last mutation in the committed batch.
    fn emit(&mut self, summary: WriteSuccessSummary, commit_time: SystemTime, window: &W);
}

impl<W, F: FnMut(WriteSuccessSummary, SystemTime, &W)> SummarySink<W> for F {
    fn emit(&mut self, summary: WriteSuccessSummary, commit_time: SystemTime, window: &W) {
        self(summary, commit_time, window)
    }
}

/// Milliseconds since the Unix epoch (saturating).
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

/// Batching writer for one worker.
///
/// `W` tags each mutation with the window it originated in; the runtime
/// driving this writer decides what a window is. The write batcher and the
/// adaptive throttler are injected: the batcher belongs to this writer
/// instance and survives bundles, the throttler is shared across all writers
/// of the worker.
pub struct MutationWriter<W> {
    project_id: String,
    database_id: String,
    factory: Arc<dyn StoreFactory>,
    store: Option<Arc<dyn StoreRpc>>,
    batcher: WriteBatcher,
    throttler: Arc<AdaptiveThrottler>,
    metrics: WriterMetrics,
    pending: Vec<(Mutation, W)>,
    pending_bytes: usize,
    pending_keys: HashSet<Key>,
}

impl<W: Clone> MutationWriter<W> {
    /// Build a writer. Fails synchronously on invalid configuration.
    pub fn new(
        config: &WriteConfig,
        factory: Arc<dyn StoreFactory>,
        batcher: WriteBatcher,
        throttler: Arc<AdaptiveThrottler>,
    ) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            project_id: config.project_id.clone(),
            database_id: config.database_id.clone(),
            factory,
            store: None,
            batcher,
            throttler,
            metrics: WriterMetrics::new(),
            pending: Vec::new(),
            pending_bytes: 0,
            pending_keys: HashSet::new(),
        })
    }

    /// Metric cells of this writer instance.
    pub fn metrics(&self) -> &WriterMetrics {
        &self.metrics
    }

    /// Build the Store client for an incoming bundle and reset the batcher's
    /// latency window.
    pub async fn start_bundle(&mut self) -> StoreResult<()> {
        self.store = Some(self.factory.connect().await?);
        self.batcher.start();
        Ok(())
    }

    /// Accept one mutation, flushing the pending batch as the dedup, byte,
    /// and count limits dictate.
    pub async fn process(
        &mut self,
        mutation: Mutation,
        window: W,
        sink: &mut (dyn SummarySink<W> + Send),
    ) -> StoreResult<()> {
        let size = mutation.byte_size();

        // The same key cannot appear twice in one commit.
        if self.pending_keys.contains(mutation.key()) {
            self.flush_batch(sink).await?;
        }

        if !self.pending.is_empty() && self.pending_bytes + size >= BATCH_BYTES_LIMIT {
            self.flush_batch(sink).await?;
        }

        self.pending_keys.insert(mutation.key().clone());
        self.pending.push((mutation, window));
        self.pending_bytes += size;

        if self.pending.len() >= self.batcher.next_batch_size(epoch_millis()) {
            self.flush_batch(sink).await?;
        }
        Ok(())
    }

    /// Flush whatever is pending and drop the per-bundle client. No mutation
    /// is left pending after a bundle completes.
    pub async fn finish_bundle(&mut self, sink: &mut (dyn SummarySink<W> + Send)) -> StoreResult<()> {
        if !self.pending.is_empty() {
            self.flush_batch(sink).await?;
        }
        self.store = None;
        Ok(())
    }

    /// Commit the pending batch.
    ///
    /// Before each attempt the adaptive throttler is consulted; a throttled
    /// decision sleeps for the target RPC latency and re-decides without
    /// consuming a retry. A failed commit is retried with backoff unless its
    /// code is permanent; on retry all mutations are re-sent. On success the
    /// observed latency feeds the batcher, the summary is emitted, and the
    /// batch state clears.
    async fn flush_batch(&mut self, sink: &mut (dyn SummarySink<W> + Send)) -> StoreResult<()> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| StoreError::rpc(ErrorCode::FailedPrecondition, "bundle not started"))?;
        // Attributed to the window of the last mutation in the batch.
        let Some((_, last_window)) = self.pending.last() else {
            return Ok(());
        };
        let window = last_window.clone();
        let num_mutations = self.pending.len();
        tracing::debug!(num_mutations, "writing batch of mutations");

        let mut backoff = ExponentialBackoff::rpc_default();
        self.metrics.batch_size.update(num_mutations as u64);

        let (response, commit_time) = loop {
            let start_ms = epoch_millis();
            if self.throttler.throttle_request(start_ms) {
                tracing::info!("delaying request due to previous failures");
                self.metrics.throttling_msecs.inc(BATCH_TARGET_LATENCY_MS);
                tokio::time::sleep(Duration::from_millis(BATCH_TARGET_LATENCY_MS)).await;
                continue;
            }

            let request = CommitRequest {
                project_id: self.project_id.clone(),
                database_id: self.database_id.clone(),
                mutations: self.pending.iter().map(|(m, _)| m.clone()).collect(),
            };
            let started = Instant::now();

            match store.commit(request).await {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.metrics.service_calls.record("ok");
                    self.batcher
                        .add_request_latency(epoch_millis(), latency_ms, num_mutations);
                    self.throttler.successful_request(start_ms);
                    self.metrics
                        .latency_ms_per_mutation
                        .update(latency_ms / num_mutations as u64);
                    self.metrics.rpc_successes.inc(1);
                    self.metrics.entities_mutated.inc(num_mutations as u64);
                    break (response, SystemTime::now());
                }
                Err(err) => {
                    self.metrics.service_calls.record(
                        err.code().map(|c| c.as_str()).unwrap_or("TRANSPORT"),
                    );
                    if err.code() == Some(ErrorCode::DeadlineExceeded) {
                        // Most errors say nothing about batch sizing, but a
                        // missed deadline does: feed it back so oversized
                        // batches shrink.
                        let latency_ms = started.elapsed().as_millis() as u64;
                        self.batcher
                            .add_request_latency(epoch_millis(), latency_ms, num_mutations);
                        self.metrics
                            .latency_ms_per_mutation
                            .update(latency_ms / num_mutations as u64);
                    }
                    tracing::error!(
                        num_mutations,
                        code = err.code().map(|c| c.as_str()).unwrap_or("TRANSPORT"),
                        error = %err,
                        "error writing batch of mutations"
                    );
                    self.metrics.rpc_errors.inc(1);

                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if backoff.sleep().await.is_err() {
                        tracing::error!(
                            retries = crate::backoff::RPC_MAX_RETRIES,
                            "aborting write after retries"
                        );
                        return Err(err);
                    }
                }
            }
        };

        let summary = WriteSuccessSummary {
            num_writes: num_mutations as u64,
            num_bytes: response.byte_size() as u64,
        };
        tracing::debug!(num_mutations, "successfully wrote mutations");
        sink.emit(summary, commit_time, &window);

        self.pending.clear();
        self.pending_keys.clear();
        self.pending_bytes = 0;
        Ok(())
    }
}
