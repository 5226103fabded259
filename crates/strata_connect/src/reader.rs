//! Cursor-driven paginated reads of one query split.

use std::sync::Arc;

use strata_core::{
    Entity, ErrorCode, MoreResults, Partition, Query, ReadOptions, RunQueryRequest,
    RunQueryResponse, StoreError, StoreFactory, StoreResult, StoreRpc,
};

use crate::backoff::ExponentialBackoff;
use crate::metrics::ReaderMetrics;

/// Maximum number of results requested per query RPC. A page limit must
/// always be set or the Store may reject the read.
pub const QUERY_BATCH_LIMIT: i32 = 500;

/// Receives entities as pages arrive.
pub trait EntitySink {
    fn emit(&mut self, entity: Entity);
}

impl<F: FnMut(Entity)> EntitySink for F {
    fn emit(&mut self, entity: Entity) {
        self(entity)
    }
}

/// Reads every entity of one split query, page by page.
///
/// One Store client is built per bundle; `process` is then called once per
/// split assigned to the bundle and drives the cursor loop with retry.
pub struct QueryReader {
    factory: Arc<dyn StoreFactory>,
    partition: Partition,
    read_options: Option<ReadOptions>,
    store: Option<Arc<dyn StoreRpc>>,
    metrics: ReaderMetrics,
}

impl QueryReader {
    pub fn new(
        factory: Arc<dyn StoreFactory>,
        partition: Partition,
        read_options: Option<ReadOptions>,
    ) -> Self {
        Self {
            factory,
            partition,
            read_options,
            store: None,
            metrics: ReaderMetrics::new(),
        }
    }

    /// Metric cells of this reader instance.
    pub fn metrics(&self) -> &ReaderMetrics {
        &self.metrics
    }

    /// Build the Store client for an incoming bundle.
    pub async fn start_bundle(&mut self) -> StoreResult<()> {
        self.store = Some(self.factory.connect().await?);
        Ok(())
    }

    /// Drop the per-bundle client.
    pub fn finish_bundle(&mut self) {
        self.store = None;
    }

    /// Read and emit all entities matched by `query`.
    pub async fn process(&mut self, query: &Query, sink: &mut dyn EntitySink) -> StoreResult<()> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| StoreError::rpc(ErrorCode::FailedPrecondition, "bundle not started"))?;

        // Absent user limit reads until the Store reports exhaustion.
        let mut remaining_user_limit: Option<i64> = query.limit.map(i64::from);
        let mut end_cursor: Option<Vec<u8>> = None;

        loop {
            let mut page = query.clone();
            page.limit = Some(match remaining_user_limit {
                Some(remaining) => (remaining.min(QUERY_BATCH_LIMIT as i64)) as i32,
                None => QUERY_BATCH_LIMIT,
            });
            if let Some(cursor) = &end_cursor {
                if !cursor.is_empty() {
                    page.start_cursor = Some(cursor.clone());
                }
            }

            let request =
                RunQueryRequest::structured(self.partition.clone(), page, self.read_options);
            let response = self.run_query_with_retries(store.as_ref(), request).await?;

            let batch = response.batch;
            let num_fetch = batch.entity_results.len() as i64;
            if let Some(remaining) = remaining_user_limit.as_mut() {
                // The page limit never exceeds the remaining user limit, so a
                // larger page is a protocol violation.
                if num_fetch > *remaining {
                    return Err(StoreError::rpc(
                        ErrorCode::Internal,
                        format!("expected at most {remaining} results, got {num_fetch}"),
                    ));
                }
                *remaining -= num_fetch;
            }

            for result in batch.entity_results {
                sink.emit(result.entity);
            }

            let limit_satisfied = matches!(remaining_user_limit, Some(remaining) if remaining <= 0);
            let may_have_more = num_fetch == QUERY_BATCH_LIMIT as i64
                || batch.more_results == MoreResults::NotFinished;
            if limit_satisfied || !may_have_more {
                return Ok(());
            }
            end_cursor = Some(batch.end_cursor);
        }
    }

    /// Issue one RunQuery with the standard retry policy, recording per
    /// attempt metrics.
    async fn run_query_with_retries(
        &self,
        store: &dyn StoreRpc,
        request: RunQueryRequest,
    ) -> StoreResult<RunQueryResponse> {
        let mut backoff = ExponentialBackoff::rpc_default();
        loop {
            match store.run_query(request.clone()).await {
                Ok(response) => {
                    self.metrics.service_calls.record("ok");
                    self.metrics.rpc_successes.inc(1);
                    return Ok(response);
                }
                Err(err) => {
                    self.metrics.rpc_errors.inc(1);
                    self.metrics.service_calls.record(
                        err.code().map(|c| c.as_str()).unwrap_or("TRANSPORT"),
                    );
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if backoff.sleep().await.is_err() {
                        tracing::error!(
                            retries = crate::backoff::RPC_MAX_RETRIES,
                            "aborting read after retries"
                        );
                        return Err(err);
                    }
                }
            }
        }
    }
}
