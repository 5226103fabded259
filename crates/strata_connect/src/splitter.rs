//! Scatter-based query splitting.
//!
//! The Store maintains a reserved `__scatter__` property over a small random
//! sample of every kind's entities. Sampling keys in scatter order and then
//! sorting them in key order yields approximately uniform split points, and
//! each split becomes the base query fenced by `__key__` range filters. The
//! resulting splits partition the kind: ranges are half-open, so every entity
//! lands in exactly one split.

use strata_core::{
    FilterOp, Key, MoreResults, Partition, PropertyFilter, Query, ReadOptions, RunQueryRequest,
    StoreError, StoreResult, StoreRpc, Value, KEY_PROPERTY, SCATTER_PROPERTY,
};

/// Scatter keys sampled per requested split. Oversampling smooths out the
/// randomness of the scatter population.
const KEYS_PER_SPLIT: u32 = 32;

/// Page size used while collecting scatter keys.
const SCATTER_PAGE_LIMIT: i32 = 500;

/// Split `query` into at most `num_splits` disjoint sub-queries.
///
/// Fails on queries the scatter scheme cannot handle (inequality filters,
/// orderings, user limits); the caller degrades to a single split on error.
pub async fn split_query(
    store: &dyn StoreRpc,
    partition: &Partition,
    query: &Query,
    num_splits: u32,
    read_options: Option<ReadOptions>,
) -> StoreResult<Vec<Query>> {
    validate_splittable(query)?;
    if num_splits <= 1 {
        return Ok(vec![query.clone()]);
    }

    let scatter_keys = collect_scatter_keys(store, partition, query, num_splits, read_options).await?;
    let split_points = pick_split_points(scatter_keys);
    if split_points.is_empty() {
        // Not enough scatter population to split: serve the query whole.
        return Ok(vec![query.clone()]);
    }

    Ok(build_ranges(query, split_points))
}

/// Reject queries whose semantics a key-range fence would change.
fn validate_splittable(query: &Query) -> StoreResult<()> {
    if query.kind.is_empty() {
        return Err(StoreError::Config(
            "query to split must have exactly one kind".to_string(),
        ));
    }
    if query.limit.is_some() {
        return Err(StoreError::Config(
            "query with a user limit cannot be split".to_string(),
        ));
    }
    if query.filters.iter().any(|f| f.op.is_inequality()) {
        return Err(StoreError::Config(
            "query with inequality filters cannot be split".to_string(),
        ));
    }
    if !query.orders.is_empty() {
        return Err(StoreError::Config(
            "query with sort orders cannot be split".to_string(),
        ));
    }
    Ok(())
}

/// Sample `(num_splits - 1) * KEYS_PER_SPLIT` keys in scatter order.
///
/// The scatter query deliberately drops the base query's filters: split
/// points only need to cover the kind's key space, and the fences are
/// half-open, so over-covering is harmless.
async fn collect_scatter_keys(
    store: &dyn StoreRpc,
    partition: &Partition,
    query: &Query,
    num_splits: u32,
    read_options: Option<ReadOptions>,
) -> StoreResult<Vec<Key>> {
    let wanted = (num_splits - 1).saturating_mul(KEYS_PER_SPLIT) as usize;
    let mut keys = Vec::with_capacity(wanted.min(4096));
    let mut cursor: Option<Vec<u8>> = None;

    while keys.len() < wanted {
        let remaining = (wanted - keys.len()) as i32;
        let mut page = Query::new(query.kind.clone())
            .with_order(SCATTER_PROPERTY, strata_core::Direction::Ascending)
            .with_limit(remaining.min(SCATTER_PAGE_LIMIT));
        page.start_cursor = cursor.clone();

        let request = RunQueryRequest::structured(partition.clone(), page, read_options);
        let response = store.run_query(request).await?;
        let batch = response.batch;
        let num_fetch = batch.entity_results.len();
        keys.extend(batch.entity_results.into_iter().map(|r| r.entity.key));

        if num_fetch == 0 || batch.more_results != MoreResults::NotFinished {
            break;
        }
        cursor = Some(batch.end_cursor);
    }

    tracing::debug!(sampled = keys.len(), wanted, "collected scatter keys");
    Ok(keys)
}

/// Sort the sample in key order and keep every `KEYS_PER_SPLIT`-th key as a
/// split point, deduplicating equal neighbors.
fn pick_split_points(mut scatter_keys: Vec<Key>) -> Vec<Key> {
    scatter_keys.sort();
    let mut points: Vec<Key> = Vec::new();
    let mut index = KEYS_PER_SPLIT as usize - 1;
    while index < scatter_keys.len() {
        let key = &scatter_keys[index];
        if points.last() != Some(key) {
            points.push(key.clone());
        }
        index += KEYS_PER_SPLIT as usize;
    }
    points
}

/// Fence the base query into half-open `__key__` ranges between consecutive
/// split points.
fn build_ranges(query: &Query, split_points: Vec<Key>) -> Vec<Query> {
    let mut splits = Vec::with_capacity(split_points.len() + 1);
    let mut lower: Option<Key> = None;
    for point in split_points {
        splits.push(range_query(query, lower.as_ref(), Some(&point)));
        lower = Some(point);
    }
    splits.push(range_query(query, lower.as_ref(), None));
    splits
}

fn range_query(base: &Query, lower: Option<&Key>, upper: Option<&Key>) -> Query {
    let mut query = base.clone();
    if let Some(lower) = lower {
        query.filters.push(PropertyFilter::new(
            KEY_PROPERTY,
            FilterOp::GreaterThanOrEqual,
            Value::Key(lower.clone()),
        ));
    }
    if let Some(upper) = upper {
        query.filters.push(PropertyFilter::new(
            KEY_PROPERTY,
            FilterOp::LessThan,
            Value::Key(upper.clone()),
        ));
    }
    query
}
