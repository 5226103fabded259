//! Query planning: GQL translation, size estimation, and split selection.
//!
//! The planner leans on the Store's statistics tables for sizing. Statistics
//! are updated periodically by the Store; the freshest snapshot is located
//! through the total-statistics kind, then the per-kind row at that exact
//! snapshot timestamp supplies byte and entity counts.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::thread_rng;
use strata_core::{
    Direction, Entity, FilterOp, GqlQuery, Partition, PropertyFilter, Query, ReadOptions,
    RunQueryRequest, StoreError, StoreResult, StoreRpc, Value,
};

use crate::splitter;

/// Upper bound on the number of splits for a query.
pub const NUM_QUERY_SPLITS_MAX: u32 = 50_000;
/// Lower bound on the number of splits for a query.
pub const NUM_QUERY_SPLITS_MIN: u32 = 12;
/// Target bytes served by one split: 64 MiB.
pub const DEFAULT_BUNDLE_SIZE_BYTES: i64 = 64 * 1024 * 1024;

/// Total-statistics kind for the default namespace.
const STAT_TOTAL_KIND: &str = "__Stat_Total__";
/// Total-statistics kind scoped to a namespace.
const STAT_NS_TOTAL_KIND: &str = "__Stat_Ns_Total__";
/// Per-kind statistics kind for the default namespace.
const STAT_KIND_KIND: &str = "__Stat_Kind__";
/// Per-kind statistics kind scoped to a namespace.
const STAT_NS_KIND_KIND: &str = "__Stat_Ns_Kind__";

/// Plans reads against one partition: translates textual queries, estimates
/// result sizes from the statistics tables, and fans a query out into
/// parallel splits.
pub struct QueryPlanner {
    store: Arc<dyn StoreRpc>,
    partition: Partition,
    read_options: Option<ReadOptions>,
}

impl QueryPlanner {
    pub fn new(
        store: Arc<dyn StoreRpc>,
        partition: Partition,
        read_options: Option<ReadOptions>,
    ) -> Self {
        Self {
            store,
            partition,
            read_options,
        }
    }

    /// Translate a textual query into its structured form.
    ///
    /// The only way to translate is to run the text and take the structured
    /// query echoed in the response. To avoid reading data the text is
    /// augmented with `LIMIT 0`; if the Store rejects that with
    /// `INVALID_ARGUMENT` the text presumably already carries a limit, and
    /// the translation is retried once without the suffix.
    pub async fn translate_gql(&self, gql: &str) -> StoreResult<Query> {
        let with_zero_limit = format!("{gql} LIMIT 0");
        match self.run_gql(with_zero_limit.clone()).await {
            Ok(mut query) => {
                // Clear the limit we appended ourselves.
                query.limit = None;
                Ok(query)
            }
            Err(err) if err.code() == Some(strata_core::ErrorCode::InvalidArgument) => {
                tracing::warn!(query = %with_zero_limit, error = %err, "zero-limit translation rejected");
                tracing::warn!("user query might have a limit already set, retrying without zero limit");
                self.run_gql(gql.to_string()).await
            }
            Err(err) => Err(err),
        }
    }

    async fn run_gql(&self, gql: String) -> StoreResult<Query> {
        let request = RunQueryRequest::gql(
            self.partition.clone(),
            GqlQuery::new(gql),
            self.read_options,
        );
        let response = self.store.run_query(request).await?;
        response.query.ok_or_else(|| {
            StoreError::Transport("translation response missing structured query".to_string())
        })
    }

    /// Microsecond timestamp of the freshest statistics snapshot.
    async fn latest_statistics_timestamp(&self) -> StoreResult<i64> {
        let stat_kind = if self.partition.is_default_namespace() {
            STAT_TOTAL_KIND
        } else {
            STAT_NS_TOTAL_KIND
        };
        let query = Query::new(stat_kind)
            .with_order("timestamp", Direction::Descending)
            .with_limit(1);
        let request =
            RunQueryRequest::structured(self.partition.clone(), query, self.read_options);
        let response = self.store.run_query(request).await?;
        let entity = response
            .batch
            .entity_results
            .into_iter()
            .next()
            .map(|result| result.entity)
            .ok_or_else(|| StoreError::StatisticsUnavailable("total statistics".to_string()))?;
        let timestamp = entity
            .property("timestamp")
            .and_then(Value::as_timestamp)
            .ok_or_else(|| {
                StoreError::StatisticsUnavailable("total statistics timestamp".to_string())
            })?;
        // Statistics rows key their snapshot by microseconds since epoch.
        Ok(timestamp.as_seconds() * 1_000_000)
    }

    /// Freshest per-kind statistics row for `kind`.
    async fn latest_kind_stats(&self, kind: &str) -> StoreResult<Entity> {
        let latest_timestamp = self.latest_statistics_timestamp().await?;
        tracing::info!(kind, latest_timestamp, "latest statistics snapshot");

        let stat_kind = if self.partition.is_default_namespace() {
            STAT_KIND_KIND
        } else {
            STAT_NS_KIND_KIND
        };
        let query = Query::new(stat_kind)
            .with_filter(PropertyFilter::new(
                "kind_name",
                FilterOp::Equal,
                Value::Text(kind.to_string()),
            ))
            .with_filter(PropertyFilter::new(
                "timestamp",
                FilterOp::Equal,
                Value::Integer(latest_timestamp),
            ));
        let request =
            RunQueryRequest::structured(self.partition.clone(), query, self.read_options);
        let response = self.store.run_query(request).await?;
        response
            .batch
            .entity_results
            .into_iter()
            .next()
            .map(|result| result.entity)
            .ok_or_else(|| StoreError::StatisticsUnavailable(format!("statistics for kind {kind}")))
    }

    /// Estimated byte size of the query's result set, from the per-kind
    /// statistics row.
    pub async fn estimated_size_bytes(&self, query: &Query) -> StoreResult<i64> {
        let stats = self.latest_kind_stats(&query.kind).await?;
        stats
            .property("entity_bytes")
            .and_then(Value::as_integer)
            .ok_or_else(|| {
                StoreError::StatisticsUnavailable(format!("entity_bytes for kind {}", query.kind))
            })
    }

    /// Entity count of `kind` according to the statistics tables.
    pub async fn num_entities(&self, kind: &str) -> StoreResult<i64> {
        let stats = self.latest_kind_stats(kind).await?;
        stats
            .property("count")
            .and_then(Value::as_integer)
            .ok_or_else(|| StoreError::StatisticsUnavailable(format!("count for kind {kind}")))
    }

    /// Split count derived from the estimated size, one split per 64 MiB,
    /// clamped to `[NUM_QUERY_SPLITS_MIN, NUM_QUERY_SPLITS_MAX]`. Any
    /// estimation failure falls back to the minimum.
    pub async fn estimated_num_splits(&self, query: &Query) -> u32 {
        let num_splits = match self.estimated_size_bytes(query).await {
            Ok(estimated_size_bytes) => {
                tracing::info!(estimated_size_bytes, "estimated size for query");
                let splits =
                    (estimated_size_bytes as f64 / DEFAULT_BUNDLE_SIZE_BYTES as f64).round();
                (splits as i64).clamp(0, NUM_QUERY_SPLITS_MAX as i64) as u32
            }
            Err(err) => {
                tracing::warn!(kind = %query.kind, error = %err, "failed to estimate query size");
                NUM_QUERY_SPLITS_MIN
            }
        };
        num_splits.max(NUM_QUERY_SPLITS_MIN)
    }

    /// Fan `query` out into parallel splits.
    ///
    /// A query with a user limit must be read by a single consumer and is
    /// returned as-is. A splitter failure degrades to one un-split query.
    /// The returned order is shuffled so downstream workers do not inherit
    /// the splitter's key ordering.
    pub async fn plan_splits(&self, query: &Query, num_query_splits: u32) -> StoreResult<Vec<Query>> {
        if query.limit.is_some() {
            tracing::info!(kind = %query.kind, "query has a user limit, not splitting");
            return Ok(vec![query.clone()]);
        }

        let num_splits = if num_query_splits > 0 {
            num_query_splits.min(NUM_QUERY_SPLITS_MAX)
        } else {
            self.estimated_num_splits(query).await
        };
        tracing::info!(num_splits, kind = %query.kind, "splitting query");

        let mut splits = match splitter::split_query(
            self.store.as_ref(),
            &self.partition,
            query,
            num_splits,
            self.read_options,
        )
        .await
        {
            Ok(splits) => splits,
            Err(err) => {
                tracing::warn!(kind = %query.kind, error = %err, "unable to parallelize query");
                vec![query.clone()]
            }
        };

        splits.shuffle(&mut thread_rng());
        Ok(splits)
    }
}
